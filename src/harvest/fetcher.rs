//! Media fetcher: one URL in, staged files in the inbox out.
//!
//! The external downloader runs inside a private scratch directory; only
//! a successful run's files are rsynced into the (possibly remote) inbox.
//! Downloader output is streamed to the operator and captured, because
//! classification depends on what the tool printed, not just its exit
//! code.

use crate::config::{Config, config_root};
use crate::defaults;
use crate::error::{Result, StentorError};
use crate::harvest::sources::SourceEntry;
use crate::lock::{LockState, NamedLock};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Per-URL result, soft failures included. Transport loss is an `Err`
/// because the whole batch must stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// New files staged and transferred into the inbox.
    Transferred(usize),
    /// The downloader reported the URL as already in the archive.
    AlreadyArchived,
    /// Clean run, but nothing new was produced.
    NothingNew,
    /// Download or transfer failed; the batch continues.
    SoftFailed,
}

/// Classification of the downloader's run.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DownloadClass {
    Clean,
    ArchiveHit,
    TransportLost(String),
    Failed(i32),
}

/// Subset of the downloader's `.info.json` sidecar worth logging.
#[derive(Debug, Deserialize)]
struct InfoSidecar {
    title: Option<String>,
    id: Option<String>,
    duration: Option<f64>,
}

pub struct Fetcher<'a> {
    config: &'a Config,
    scratch_root: PathBuf,
    lock_dir: PathBuf,
}

impl<'a> Fetcher<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            scratch_root: config.scratch_root(),
            lock_dir: config_root(),
        }
    }

    /// Use a different scratch root (tests).
    pub fn with_scratch_root(mut self, dir: PathBuf) -> Self {
        self.scratch_root = dir;
        self
    }

    /// Use a different lock directory (tests).
    pub fn with_lock_dir(mut self, dir: PathBuf) -> Self {
        self.lock_dir = dir;
        self
    }

    /// Download one URL and stage its files into `inbox`.
    pub async fn fetch(&self, entry: &SourceEntry, inbox: &Path) -> Result<FetchOutcome> {
        // One downloader at a time per host; a busy peer is a soft skip,
        // the next pass retries the URL.
        let mut lock = NamedLock::new(&self.lock_dir, defaults::LOCK_DOWNLOADER);
        if lock.acquire()? == LockState::Held {
            tracing::warn!(url = %entry.url, "downloader lock held by a peer; skipping");
            return Ok(FetchOutcome::SoftFailed);
        }

        std::fs::create_dir_all(&self.scratch_root)?;
        let scratch = tempfile::Builder::new()
            .prefix("dl-")
            .tempdir_in(&self.scratch_root)?;

        let label = entry.label.as_deref().unwrap_or(&entry.url);
        tracing::info!(url = %entry.url, label, "fetching");

        let class = self
            .download(entry, scratch.path(), &self.config.archive_file())
            .await?;
        match class {
            DownloadClass::TransportLost(reason) => {
                // Save whatever landed before the transport died, then let
                // the TempDir cleanup remove the scratch.
                self.salvage(scratch.path(), inbox).await;
                Err(StentorError::TransportLost { message: reason })
            }
            DownloadClass::ArchiveHit => {
                tracing::info!(url = %entry.url, "already recorded in archive");
                Ok(FetchOutcome::AlreadyArchived)
            }
            DownloadClass::Failed(code) => {
                tracing::warn!(url = %entry.url, code, "download failed; continuing with next URL");
                Ok(FetchOutcome::SoftFailed)
            }
            DownloadClass::Clean => {
                let staged = staged_files(scratch.path())?;
                if staged.is_empty() {
                    tracing::info!(url = %entry.url, "no new files produced");
                    return Ok(FetchOutcome::NothingNew);
                }
                self.log_info_sidecar(&staged);
                if self.transfer(scratch.path(), inbox).await? {
                    tracing::info!(url = %entry.url, files = staged.len(), "transferred to inbox");
                    Ok(FetchOutcome::Transferred(staged.len()))
                } else {
                    tracing::warn!(url = %entry.url, "rsync transfer failed");
                    Ok(FetchOutcome::SoftFailed)
                }
            }
        }
    }

    /// Run the downloader in the scratch directory, streaming and
    /// capturing its combined output.
    async fn download(
        &self,
        entry: &SourceEntry,
        scratch: &Path,
        archive: &Path,
    ) -> Result<DownloadClass> {
        let mut child = Command::new(&self.config.downloader_bin)
            .current_dir(scratch)
            .arg("-f")
            .arg("bestaudio")
            .arg("-o")
            .arg("%(title)s [%(id)s].%(ext)s")
            .arg("--write-description")
            .arg("--write-info-json")
            .arg("--write-subs")
            .arg("--sub-langs")
            .arg("en.*")
            .arg("--download-archive")
            .arg(archive)
            .arg(&entry.url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    StentorError::MissingDependency {
                        tool: self.config.downloader_bin.display().to_string(),
                    }
                } else {
                    StentorError::Io(e)
                }
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (captured_out, captured_err) =
            tokio::join!(stream_and_capture(stdout), stream_and_capture(stderr));
        let status = child.wait().await?;

        let mut captured = captured_out;
        captured.push_str(&captured_err);
        Ok(classify_download(
            status.code(),
            &captured,
            self.config
                .local_mount_point
                .as_deref()
                .and_then(Path::to_str),
        ))
    }

    /// rsync the scratch into the inbox, consuming the sources on success.
    async fn transfer(&self, scratch: &Path, inbox: &Path) -> Result<bool> {
        std::fs::create_dir_all(inbox)?;
        let status = Command::new(&self.config.rsync_bin)
            .arg("-a")
            .arg("--remove-source-files")
            .arg("--exclude")
            .arg("*.part")
            .arg("--exclude")
            .arg("*.ytdl")
            .arg(format!("{}/", scratch.display()))
            .arg(format!("{}/", inbox.display()))
            .status()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    StentorError::MissingDependency {
                        tool: self.config.rsync_bin.display().to_string(),
                    }
                } else {
                    StentorError::Io(e)
                }
            })?;
        Ok(status.success())
    }

    /// Best-effort, no-delete rsync used when a batch is cut short.
    async fn salvage(&self, scratch: &Path, inbox: &Path) {
        let result = Command::new(&self.config.rsync_bin)
            .arg("-a")
            .arg("--exclude")
            .arg("*.part")
            .arg("--exclude")
            .arg("*.ytdl")
            .arg(format!("{}/", scratch.display()))
            .arg(format!("{}/", inbox.display()))
            .status()
            .await;
        if !matches!(result, Ok(status) if status.success()) {
            tracing::warn!("salvage rsync did not complete");
        }
    }

    /// Log title/id/duration from the downloader's info sidecar, if any.
    fn log_info_sidecar(&self, staged: &[PathBuf]) {
        let Some(path) = staged
            .iter()
            .find(|p| p.to_string_lossy().ends_with(".info.json"))
        else {
            return;
        };
        let parsed = std::fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str::<InfoSidecar>(&text).ok());
        if let Some(info) = parsed {
            tracing::info!(
                title = info.title.as_deref().unwrap_or("?"),
                id = info.id.as_deref().unwrap_or("?"),
                duration_secs = info.duration.unwrap_or(0.0),
                "downloaded"
            );
        }
    }
}

/// Regular files the downloader produced, minus partials and journals.
fn staged_files(scratch: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for dir_entry in std::fs::read_dir(scratch)? {
        let dir_entry = dir_entry?;
        if !dir_entry.file_type()?.is_file() {
            continue;
        }
        let path = dir_entry.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.ends_with(".part") || name.ends_with(".ytdl") {
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

/// Decide what the downloader run meant.
///
/// Output markers outrank the exit code: an archive hit is a success even
/// when the tool exits non-zero, and a transport-loss phrase is fatal even
/// on exit 0.
fn classify_download(
    exit_code: Option<i32>,
    output: &str,
    mount_point: Option<&str>,
) -> DownloadClass {
    let lower = output.to_lowercase();

    if let Some(marker) = defaults::TRANSPORT_LOSS_MARKERS
        .iter()
        .find(|m| lower.contains(*m))
    {
        return DownloadClass::TransportLost(format!("downloader reported '{marker}'"));
    }
    if let Some(mount) = mount_point
        && lower.contains("no such file")
        && lower.contains(&mount.to_lowercase())
    {
        return DownloadClass::TransportLost(format!("mount path {mount} vanished"));
    }
    if lower.contains(defaults::ARCHIVE_HIT_MARKER) {
        return DownloadClass::ArchiveHit;
    }
    match exit_code {
        Some(0) => DownloadClass::Clean,
        Some(code) => DownloadClass::Failed(code),
        None => DownloadClass::Failed(-1),
    }
}

/// Forward lines to the operator via the logger while accumulating them
/// for classification.
async fn stream_and_capture<R>(reader: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return String::new();
    };
    let mut captured = String::new();
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::info!("[downloader] {line}");
        captured.push_str(&line);
        captured.push('\n');
    }
    captured
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn classify_clean_run() {
        assert_eq!(
            classify_download(Some(0), "[download] 100% done\n", None),
            DownloadClass::Clean
        );
    }

    #[test]
    fn classify_archive_hit_overrides_exit_code() {
        let output = "video abc123 has already been recorded in the archive\n";
        assert_eq!(
            classify_download(Some(1), output, None),
            DownloadClass::ArchiveHit
        );
        assert_eq!(
            classify_download(Some(0), output, None),
            DownloadClass::ArchiveHit
        );
    }

    #[test]
    fn classify_transport_markers_are_fatal_even_on_exit_zero() {
        for marker in ["Device not configured", "Socket is not connected"] {
            let output = format!("ERROR: {marker} while writing\n");
            assert!(matches!(
                classify_download(Some(0), &output, None),
                DownloadClass::TransportLost(_)
            ));
        }
    }

    #[test]
    fn classify_missing_mount_path_is_transport_loss() {
        let output = "ERROR: No such file or directory: /mnt/worker-inbox/archive\n";
        assert!(matches!(
            classify_download(Some(1), output, Some("/mnt/worker-inbox")),
            DownloadClass::TransportLost(_)
        ));
        // Same message without a configured mount stays a soft failure.
        assert_eq!(
            classify_download(Some(1), output, None),
            DownloadClass::Failed(1)
        );
    }

    #[test]
    fn classify_other_failures_are_soft() {
        assert_eq!(
            classify_download(Some(1), "ERROR: unsupported URL\n", None),
            DownloadClass::Failed(1)
        );
        assert_eq!(
            classify_download(None, "", None),
            DownloadClass::Failed(-1)
        );
    }

    #[test]
    fn staged_files_excludes_partials_and_journals() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("talk [abc].m4a"), b"audio").unwrap();
        std::fs::write(dir.path().join("talk [abc].info.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("talk [abc].m4a.part"), b"partial").unwrap();
        std::fs::write(dir.path().join("talk [abc].m4a.ytdl"), b"journal").unwrap();

        let names: Vec<String> = staged_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["talk [abc].info.json", "talk [abc].m4a"]);
    }

    // ── End-to-end with stub downloader and rsync ───────────────────────

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    /// Stub rsync: copies src/ into dest/ (the last two arguments) and
    /// deletes source files when --remove-source-files is present.
    fn stub_rsync(dir: &Path) -> PathBuf {
        write_script(
            dir,
            "stub-rsync",
            r#"remove=0
prev=""
src=""
for a in "$@"; do
  if [ "$a" = "--remove-source-files" ]; then remove=1; fi
  src="$prev"
  prev="$a"
done
dest="$prev"
cp -r "$src". "$dest"
if [ "$remove" = "1" ]; then find "$src" -type f -delete; fi"#,
        )
    }

    fn fetch_config(root: &Path, downloader: PathBuf, rsync: PathBuf) -> Config {
        let mut config = Config::default();
        config.harvesting_root = root.join("harvesting");
        config.downloader_bin = downloader;
        config.rsync_bin = rsync;
        config
    }

    #[tokio::test]
    async fn fetch_transfers_new_files_into_inbox() {
        let root = TempDir::new().unwrap();
        let downloader = write_script(
            root.path(),
            "stub-dl",
            "printf 'audio' > 'My Talk [abc].m4a'\n\
             printf '{\"title\":\"My Talk\",\"id\":\"abc\",\"duration\":12.5}' > 'My Talk [abc].info.json'\n\
             printf 'junk' > 'My Talk [abc].m4a.part'",
        );
        let rsync = stub_rsync(root.path());
        let config = fetch_config(root.path(), downloader, rsync);
        let inbox = config.inbox_dir();

        let entry = SourceEntry {
            url: "https://example.com/v/abc".to_string(),
            label: None,
        };
        let outcome = Fetcher::new(&config)
            .with_scratch_root(root.path().join("scratch"))
            .with_lock_dir(root.path().join("locks"))
            .fetch(&entry, &inbox)
            .await
            .unwrap();

        assert_eq!(outcome, FetchOutcome::Transferred(2));
        assert!(inbox.join("My Talk [abc].m4a").exists());
        assert!(inbox.join("My Talk [abc].info.json").exists());
        assert!(
            !inbox.join("My Talk [abc].m4a.part").exists(),
            "partials must not transfer"
        );
    }

    #[tokio::test]
    async fn fetch_archive_hit_transfers_nothing() {
        let root = TempDir::new().unwrap();
        let downloader = write_script(
            root.path(),
            "stub-dl",
            "echo 'abc has already been recorded in the archive'",
        );
        let rsync = stub_rsync(root.path());
        let config = fetch_config(root.path(), downloader, rsync);
        let inbox = config.inbox_dir();

        let entry = SourceEntry {
            url: "https://example.com/v/abc".to_string(),
            label: None,
        };
        let outcome = Fetcher::new(&config)
            .with_scratch_root(root.path().join("scratch"))
            .with_lock_dir(root.path().join("locks"))
            .fetch(&entry, &inbox)
            .await
            .unwrap();
        assert_eq!(outcome, FetchOutcome::AlreadyArchived);
        assert!(!inbox.exists() || std::fs::read_dir(&inbox).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn fetch_transport_loss_is_fatal() {
        let root = TempDir::new().unwrap();
        let downloader = write_script(
            root.path(),
            "stub-dl",
            "echo 'ERROR: Device not configured' >&2; exit 1",
        );
        let rsync = stub_rsync(root.path());
        let config = fetch_config(root.path(), downloader, rsync);
        let inbox = config.inbox_dir();

        let entry = SourceEntry {
            url: "https://example.com/v/abc".to_string(),
            label: None,
        };
        let err = Fetcher::new(&config)
            .with_scratch_root(root.path().join("scratch"))
            .with_lock_dir(root.path().join("locks"))
            .fetch(&entry, &inbox)
            .await
            .unwrap_err();
        assert!(matches!(err, StentorError::TransportLost { .. }));
        assert_eq!(err.exit_code(), defaults::EXIT_TRANSPORT_LOST);
    }

    #[tokio::test]
    async fn fetch_soft_failure_continues() {
        let root = TempDir::new().unwrap();
        let downloader = write_script(
            root.path(),
            "stub-dl",
            "echo 'ERROR: unsupported URL' >&2; exit 1",
        );
        let rsync = stub_rsync(root.path());
        let config = fetch_config(root.path(), downloader, rsync);

        let entry = SourceEntry {
            url: "https://example.com/v/zzz".to_string(),
            label: None,
        };
        let outcome = Fetcher::new(&config)
            .with_scratch_root(root.path().join("scratch"))
            .with_lock_dir(root.path().join("locks"))
            .fetch(&entry, &config.inbox_dir())
            .await
            .unwrap();
        assert_eq!(outcome, FetchOutcome::SoftFailed);
    }

    #[tokio::test]
    async fn fetch_clean_run_with_no_files_is_nothing_new() {
        let root = TempDir::new().unwrap();
        let downloader = write_script(root.path(), "stub-dl", "exit 0");
        let rsync = stub_rsync(root.path());
        let config = fetch_config(root.path(), downloader, rsync);

        let entry = SourceEntry {
            url: "https://example.com/v/empty".to_string(),
            label: None,
        };
        let outcome = Fetcher::new(&config)
            .with_scratch_root(root.path().join("scratch"))
            .with_lock_dir(root.path().join("locks"))
            .fetch(&entry, &config.inbox_dir())
            .await
            .unwrap();
        assert_eq!(outcome, FetchOutcome::NothingNew);
    }

    #[tokio::test]
    async fn scratch_is_removed_after_fetch() {
        let root = TempDir::new().unwrap();
        let downloader = write_script(root.path(), "stub-dl", "printf 'a' > 'x [1].m4a'");
        let rsync = stub_rsync(root.path());
        let config = fetch_config(root.path(), downloader, rsync);

        let entry = SourceEntry {
            url: "https://example.com/v/1".to_string(),
            label: None,
        };
        let scratch_root = root.path().join("scratch");
        Fetcher::new(&config)
            .with_scratch_root(scratch_root.clone())
            .with_lock_dir(root.path().join("locks"))
            .fetch(&entry, &config.inbox_dir())
            .await
            .unwrap();

        assert!(
            std::fs::read_dir(&scratch_root).unwrap().next().is_none(),
            "scratch directory left behind"
        );
    }
}
