//! Configuration for stentor.
//!
//! On disk the configuration is a flat `key=value` file (`stentor.conf` in
//! the user config root). Blank lines and `#` comments are ignored; values
//! may be wrapped in double quotes. Every key is also honored as an
//! environment variable override.

use crate::defaults;
use crate::error::{Result, StentorError};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration, shared by the worker and client sides.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    // ── Worker side ─────────────────────────────────────────────────────
    /// Root of the queue state directories (inbox/, processing/, ...).
    pub harvesting_root: PathBuf,
    /// Root under which per-job run directories are created.
    pub runs_root: PathBuf,
    /// Directory holding `ggml-<model>.bin` artifacts.
    pub models_dir: PathBuf,

    // ── External tools ──────────────────────────────────────────────────
    pub stt_bin: PathBuf,
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    pub downloader_bin: PathBuf,
    pub rsync_bin: PathBuf,
    /// Mount/unmount helper command lines (whitespace-split), if any.
    pub mount_cmd: Option<String>,
    pub unmount_cmd: Option<String>,

    // ── Client side ─────────────────────────────────────────────────────
    pub remote_user: Option<String>,
    pub remote_host: Option<String>,
    /// Inbox path as seen on the worker host.
    pub remote_inbox: Option<PathBuf>,
    /// Where the remote inbox is mounted locally. When set, harvesting
    /// requires the mount to be healthy; when unset, harvesting stages
    /// directly into the local inbox.
    pub local_mount_point: Option<PathBuf>,
    /// Optional retrieval directory for finished transcripts.
    pub local_transcript_dir: Option<PathBuf>,
    /// Display label for the mounted volume.
    pub volume_name: Option<String>,
    pub ssh_key_path: Option<PathBuf>,
    /// URL list consumed by the harvester.
    pub sources_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let cache = dirs::cache_dir().unwrap_or_else(|| home.join(".cache"));
        Self {
            harvesting_root: home.join("stentor").join("harvesting"),
            runs_root: home.join("stentor").join("runs"),
            models_dir: cache.join("stentor").join("models"),
            stt_bin: PathBuf::from("whisper-cli"),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            downloader_bin: PathBuf::from("yt-dlp"),
            rsync_bin: PathBuf::from("rsync"),
            mount_cmd: None,
            unmount_cmd: None,
            remote_user: None,
            remote_host: None,
            remote_inbox: None,
            local_mount_point: None,
            local_transcript_dir: None,
            volume_name: None,
            ssh_key_path: None,
            sources_file: config_root().join("content_sources.txt"),
        }
    }
}

/// User config root: `~/.config/stentor` on Linux.
///
/// Also hosts the lock files, client logs, and download scratch area.
pub fn config_root() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("stentor")
}

impl Config {
    /// Default config file path: `<config_root>/stentor.conf`.
    pub fn default_path() -> PathBuf {
        config_root().join("stentor.conf")
    }

    /// Load configuration from a `key=value` file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StentorError::ConfigFileNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                StentorError::Io(e)
            }
        })?;
        let mut config = Self::default();
        config.apply_lines(&contents)?;
        Ok(config)
    }

    /// Load from a file, or fall back to defaults if the file is missing.
    /// A present-but-malformed file is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(StentorError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    fn apply_lines(&mut self, contents: &str) -> Result<()> {
        for (lineno, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                StentorError::ConfigInvalidValue {
                    key: format!("line {}", lineno + 1),
                    message: format!("expected key=value, got '{raw}'"),
                }
            })?;
            self.set(key.trim(), unquote(value.trim()))?;
        }
        Ok(())
    }

    /// Apply environment variable overrides. Each recognized key is also an
    /// environment variable of the same name.
    pub fn with_env_overrides(mut self) -> Self {
        for key in RECOGNIZED_KEYS {
            if let Ok(value) = std::env::var(key)
                && !value.is_empty()
            {
                // set() only fails on unknown keys, which these are not.
                let _ = self.set(key, &value);
            }
        }
        self
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "STENTOR_HARVESTING_ROOT" => self.harvesting_root = PathBuf::from(value),
            "STENTOR_RUNS_ROOT" => self.runs_root = PathBuf::from(value),
            "STENTOR_MODELS_DIR" => self.models_dir = PathBuf::from(value),
            "STENTOR_STT_BIN" => self.stt_bin = PathBuf::from(value),
            "STENTOR_FFMPEG_BIN" => self.ffmpeg_bin = PathBuf::from(value),
            "STENTOR_FFPROBE_BIN" => self.ffprobe_bin = PathBuf::from(value),
            "STENTOR_DOWNLOADER_BIN" => self.downloader_bin = PathBuf::from(value),
            "STENTOR_RSYNC_BIN" => self.rsync_bin = PathBuf::from(value),
            "STENTOR_MOUNT_CMD" => self.mount_cmd = Some(value.to_string()),
            "STENTOR_UNMOUNT_CMD" => self.unmount_cmd = Some(value.to_string()),
            "STENTOR_REMOTE_USER" => self.remote_user = Some(value.to_string()),
            "STENTOR_REMOTE_HOST" => self.remote_host = Some(value.to_string()),
            "STENTOR_REMOTE_AUDIO_INBOX_DIR" => {
                self.remote_inbox = Some(PathBuf::from(value))
            }
            "LOCAL_MOUNT_POINT" => self.local_mount_point = Some(PathBuf::from(value)),
            "LOCAL_TRANSCRIPT_DIR" => {
                self.local_transcript_dir = Some(PathBuf::from(value))
            }
            "STENTOR_VOLUME_NAME" => self.volume_name = Some(value.to_string()),
            "STENTOR_SSH_KEY_PATH" => self.ssh_key_path = Some(PathBuf::from(value)),
            "STENTOR_SOURCES_FILE" => self.sources_file = PathBuf::from(value),
            other => {
                return Err(StentorError::ConfigInvalidValue {
                    key: other.to_string(),
                    message: "unrecognized configuration key".to_string(),
                });
            }
        }
        Ok(())
    }

    // ── Derived worker paths ────────────────────────────────────────────

    pub fn inbox_dir(&self) -> PathBuf {
        self.harvesting_root.join(defaults::INBOX_DIR)
    }

    pub fn processing_dir(&self) -> PathBuf {
        self.harvesting_root.join(defaults::PROCESSING_DIR)
    }

    pub fn completed_dir(&self) -> PathBuf {
        self.harvesting_root.join(defaults::COMPLETED_DIR)
    }

    pub fn failed_dir(&self) -> PathBuf {
        self.harvesting_root.join(defaults::FAILED_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.harvesting_root.join(defaults::LOGS_DIR)
    }

    pub fn history_file(&self) -> PathBuf {
        self.harvesting_root.join(defaults::HISTORY_FILE)
    }

    // ── Derived client paths ────────────────────────────────────────────

    /// Directory the harvester stages finished downloads into: the mounted
    /// remote inbox when a mount point is configured, the local inbox
    /// otherwise.
    pub fn client_inbox(&self) -> PathBuf {
        match &self.local_mount_point {
            Some(mount) => mount.clone(),
            None => self.inbox_dir(),
        }
    }

    /// True when harvesting must verify the remote mount before and after
    /// every URL.
    pub fn remote_required(&self) -> bool {
        self.local_mount_point.is_some()
    }

    /// The shared download archive inside the (possibly remote) inbox.
    pub fn archive_file(&self) -> PathBuf {
        self.client_inbox().join(defaults::ARCHIVE_FILE)
    }

    /// Scratch root for per-URL download directories.
    pub fn scratch_root(&self) -> PathBuf {
        config_root().join("temp_downloads")
    }
}

/// Strip one level of matching double quotes.
fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

const RECOGNIZED_KEYS: &[&str] = &[
    "STENTOR_HARVESTING_ROOT",
    "STENTOR_RUNS_ROOT",
    "STENTOR_MODELS_DIR",
    "STENTOR_STT_BIN",
    "STENTOR_FFMPEG_BIN",
    "STENTOR_FFPROBE_BIN",
    "STENTOR_DOWNLOADER_BIN",
    "STENTOR_RSYNC_BIN",
    "STENTOR_MOUNT_CMD",
    "STENTOR_UNMOUNT_CMD",
    "STENTOR_REMOTE_USER",
    "STENTOR_REMOTE_HOST",
    "STENTOR_REMOTE_AUDIO_INBOX_DIR",
    "LOCAL_MOUNT_POINT",
    "LOCAL_TRANSCRIPT_DIR",
    "STENTOR_VOLUME_NAME",
    "STENTOR_SSH_KEY_PATH",
    "STENTOR_SOURCES_FILE",
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_conf(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write conf");
        file
    }

    #[test]
    fn load_parses_key_value_lines() {
        let file = write_conf(
            "# stentor config\n\
             STENTOR_REMOTE_USER=transcriber\n\
             STENTOR_REMOTE_HOST=worker.local\n\
             \n\
             STENTOR_HARVESTING_ROOT=/srv/stentor\n",
        );
        let config = Config::load(file.path()).expect("load");
        assert_eq!(config.remote_user.as_deref(), Some("transcriber"));
        assert_eq!(config.remote_host.as_deref(), Some("worker.local"));
        assert_eq!(config.harvesting_root, PathBuf::from("/srv/stentor"));
    }

    #[test]
    fn load_strips_double_quotes() {
        let file = write_conf("STENTOR_VOLUME_NAME=\"Worker Inbox\"\n");
        let config = Config::load(file.path()).expect("load");
        assert_eq!(config.volume_name.as_deref(), Some("Worker Inbox"));
    }

    #[test]
    fn load_rejects_unknown_key() {
        let file = write_conf("STENTOR_BOGUS=1\n");
        let err = Config::load(file.path()).unwrap_err();
        match err {
            StentorError::ConfigInvalidValue { key, .. } => {
                assert_eq!(key, "STENTOR_BOGUS")
            }
            other => panic!("expected ConfigInvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn load_rejects_line_without_equals() {
        let file = write_conf("just some words\n");
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn load_or_default_missing_file_uses_defaults() {
        let config =
            Config::load_or_default(Path::new("/nonexistent/stentor.conf")).expect("defaults");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn derived_paths_hang_off_harvesting_root() {
        let mut config = Config::default();
        config.harvesting_root = PathBuf::from("/srv/stentor");
        assert_eq!(config.inbox_dir(), PathBuf::from("/srv/stentor/inbox"));
        assert_eq!(
            config.processing_dir(),
            PathBuf::from("/srv/stentor/processing")
        );
        assert_eq!(
            config.history_file(),
            PathBuf::from("/srv/stentor/processed_files.txt")
        );
    }

    #[test]
    fn client_inbox_prefers_mount_point() {
        let mut config = Config::default();
        assert_eq!(config.client_inbox(), config.inbox_dir());
        assert!(!config.remote_required());

        config.local_mount_point = Some(PathBuf::from("/mnt/worker-inbox"));
        assert_eq!(config.client_inbox(), PathBuf::from("/mnt/worker-inbox"));
        assert!(config.remote_required());
        assert_eq!(
            config.archive_file(),
            PathBuf::from("/mnt/worker-inbox/download_archive.txt")
        );
    }

    #[test]
    fn unquote_only_strips_matching_pairs() {
        assert_eq!(unquote("\"hello\""), "hello");
        assert_eq!(unquote("\"hello"), "\"hello");
        assert_eq!(unquote("hello\""), "hello\"");
        assert_eq!(unquote("hello"), "hello");
    }
}
