//! Queue engine: drive inbox files through the state directories.
//!
//! One pass per invocation (cron-friendly): scan the inbox oldest-first,
//! claim each media group by renaming it into processing/, hand it to the
//! job runner, and commit the outcome with another rename plus a history
//! record. A held queue lock means a peer is already running, which is a
//! clean no-op exit, not an error.

use crate::config::{Config, config_root};
use crate::defaults;
use crate::error::Result;
use crate::history::{self, HistoryStore, Outcome};
use crate::lock::{LockState, NamedLock};
use crate::queue::runner::{JobRequest, JobRunner, JobStatus};
use crate::scan;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::watch;

/// Cleanup and passthrough flags from the command line.
#[derive(Debug, Clone, Default)]
pub struct QueueFlags {
    /// Pass `--cleanup-temp-audio` to the child.
    pub cleanup_wav_files: bool,
    /// Remove the per-job run directory after a success.
    pub cleanup_run_logs: bool,
    /// Delete the original media file from completed/ once the transcript
    /// is copied.
    pub cleanup_original_audio: bool,
    /// Model list passed through to the child.
    pub models: Vec<String>,
    /// Timeout multiplier passed through to the child.
    pub timeout_multiplier: Option<u32>,
}

/// Tally of one engine pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueSummary {
    pub completed: usize,
    pub failed: usize,
    pub retried: usize,
    /// Files whose fingerprint was already in history.
    pub skipped: usize,
}

/// How one file's pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Completed,
    Failed,
    Retried,
    AlreadyProcessed,
}

pub struct QueueEngine<R: JobRunner> {
    config: Config,
    flags: QueueFlags,
    runner: R,
    history: HistoryStore,
    shutdown: watch::Receiver<bool>,
    lock_dir: PathBuf,
}

impl<R: JobRunner> QueueEngine<R> {
    pub fn new(
        config: Config,
        flags: QueueFlags,
        runner: R,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let history = HistoryStore::new(config.history_file());
        Self {
            config,
            flags,
            runner,
            history,
            shutdown,
            lock_dir: config_root(),
        }
    }

    /// Use a different lock directory (tests).
    pub fn with_lock_dir(mut self, dir: PathBuf) -> Self {
        self.lock_dir = dir;
        self
    }

    /// One engine pass. Returns the tally; a held lock yields the empty
    /// tally and success.
    pub async fn run(&mut self) -> Result<QueueSummary> {
        let mut lock = NamedLock::new(&self.lock_dir, defaults::LOCK_QUEUE_ENGINE);
        match lock.acquire()? {
            LockState::Acquired => {}
            LockState::AcquiredStale => {
                tracing::info!("reclaimed stale queue-engine lock");
            }
            LockState::Held => {
                tracing::info!("another queue engine is running; nothing to do");
                return Ok(QueueSummary::default());
            }
        }

        self.ensure_layout()?;
        let files = scan::scan_inbox(&self.config.inbox_dir())?;
        tracing::info!(files = files.len(), "inbox scan complete");

        let mut summary = QueueSummary::default();
        for file in files {
            if *self.shutdown.borrow() {
                tracing::warn!("shutdown requested; leaving remaining files for next run");
                break;
            }
            match self.process_one(&file).await {
                Ok(Disposition::Completed) => summary.completed += 1,
                Ok(Disposition::Failed) => summary.failed += 1,
                Ok(Disposition::Retried) => summary.retried += 1,
                Ok(Disposition::AlreadyProcessed) => summary.skipped += 1,
                Err(e) => {
                    // Engine-side trouble is not the file's fault; it went
                    // back to the inbox for a future pass.
                    tracing::error!(file = %file.display(), "engine error: {e}");
                }
            }
        }

        tracing::info!(
            completed = summary.completed,
            failed = summary.failed,
            retried = summary.retried,
            skipped = summary.skipped,
            "queue pass finished"
        );
        lock.release();
        Ok(summary)
    }

    /// The four state directories plus logs, and an (empty) history file
    /// so operators can inspect it before the first terminal outcome.
    fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.config.inbox_dir(),
            self.config.processing_dir(),
            self.config.completed_dir(),
            self.config.failed_dir(),
            self.config.logs_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.config.history_file())?;
        Ok(())
    }

    async fn process_one(&mut self, primary: &Path) -> Result<Disposition> {
        let basename = primary
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let fingerprint = history::fingerprint_file(primary)?;
        if self.history.contains(&fingerprint)? {
            tracing::info!(%basename, "fingerprint already in history; moving to completed");
            scan::move_group(primary, &self.config.completed_dir())?;
            return Ok(Disposition::AlreadyProcessed);
        }

        // Claim: inbox -> processing. From here the group must always end
        // up in exactly one state directory.
        let claimed = scan::move_group(primary, &self.config.processing_dir())?;
        let timestamp = chrono::Local::now()
            .format(defaults::RUN_ID_TIMESTAMP_FORMAT)
            .to_string();
        let log_path = self
            .config
            .logs_dir()
            .join(format!("{timestamp}_{basename}.log"));

        let request = JobRequest {
            input: claimed.clone(),
            models: self.flags.models.clone(),
            timeout_multiplier: self.flags.timeout_multiplier,
            cleanup_temp_audio: self.flags.cleanup_wav_files,
        };
        let outcome = match self
            .runner
            .run(&request, &log_path, &mut self.shutdown)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                // Could not even run the job: undo the claim and surface
                // the error.
                scan::move_group(&claimed, &self.config.inbox_dir())?;
                return Err(e);
            }
        };

        match outcome.status {
            JobStatus::Success => {
                let completed = scan::move_group(&claimed, &self.config.completed_dir())?;
                self.install_transcript(&completed, outcome.clean_transcript.as_deref())?;
                self.history
                    .record(&fingerprint, Outcome::Success, &basename)?;
                if self.flags.cleanup_original_audio {
                    if let Err(e) = fs::remove_file(&completed) {
                        tracing::warn!("could not delete original audio: {e}");
                    }
                }
                tracing::info!(%basename, "job succeeded");
                Ok(Disposition::Completed)
            }
            JobStatus::Retryable => {
                scan::move_group(&claimed, &self.config.inbox_dir())?;
                tracing::info!(%basename, "job reported lock contention; requeued");
                Ok(Disposition::Retried)
            }
            JobStatus::Failed(code) => {
                scan::move_group(&claimed, &self.config.failed_dir())?;
                self.history
                    .record(&fingerprint, Outcome::Failed, &basename)?;
                tracing::warn!(%basename, code, "job failed; moved to failed/");
                Ok(Disposition::Failed)
            }
        }
    }

    /// Copy the clean transcript next to the completed media as
    /// `<base>.txt`, then apply the run-directory cleanup flag.
    fn install_transcript(
        &self,
        completed_primary: &Path,
        clean_transcript: Option<&Path>,
    ) -> Result<()> {
        let Some(source) = clean_transcript else {
            tracing::warn!(
                "job succeeded but reported no transcript path; skipping copy"
            );
            return Ok(());
        };
        if !source.is_file() {
            tracing::warn!(
                transcript = %source.display(),
                "reported transcript does not exist; skipping copy"
            );
            return Ok(());
        }
        let base = scan::group_base(completed_primary)?;
        let dest = self.config.completed_dir().join(format!("{base}.txt"));
        fs::copy(source, &dest)?;

        if self.flags.cleanup_run_logs
            && let Some(run_dir) = source.parent()
        {
            if let Err(e) = fs::remove_dir_all(run_dir) {
                tracing::warn!("could not remove run directory: {e}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::runner::MockJobRunner;
    use std::fs::File;
    use tempfile::TempDir;

    fn test_config(root: &Path) -> Config {
        let mut config = Config::default();
        config.harvesting_root = root.join("harvesting");
        config.runs_root = root.join("runs");
        config
    }

    fn seed_inbox(config: &Config, name: &str, contents: &[u8]) -> PathBuf {
        let inbox = config.inbox_dir();
        fs::create_dir_all(&inbox).unwrap();
        let path = inbox.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn engine_with(
        root: &TempDir,
        runner: MockJobRunner,
        flags: QueueFlags,
    ) -> (QueueEngine<MockJobRunner>, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let engine = QueueEngine::new(test_config(root.path()), flags, runner, rx)
            .with_lock_dir(root.path().join("locks"));
        (engine, tx)
    }

    #[tokio::test]
    async fn successful_job_lands_in_completed_with_history() {
        let root = TempDir::new().unwrap();
        let config = test_config(root.path());
        seed_inbox(&config, "talk.mp3", b"audio-bytes");

        let (mut engine, _shutdown_tx) = engine_with(&root, MockJobRunner::new(), QueueFlags::default());
        let summary = engine.run().await.unwrap();

        assert_eq!(summary.completed, 1);
        assert!(config.completed_dir().join("talk.mp3").exists());
        assert!(config.completed_dir().join("talk.txt").exists());
        assert!(!config.inbox_dir().join("talk.mp3").exists());

        let history = HistoryStore::new(config.history_file());
        let fp = history::fingerprint_file(&config.completed_dir().join("talk.mp3")).unwrap();
        assert!(history.contains(&fp).unwrap());
    }

    #[tokio::test]
    async fn failed_job_lands_in_failed_with_history() {
        let root = TempDir::new().unwrap();
        let config = test_config(root.path());
        seed_inbox(&config, "bad.mp3", b"unreadable");

        let runner = MockJobRunner::new().with_outcome("bad.mp3", JobStatus::Failed(1));
        let (mut engine, _shutdown_tx) = engine_with(&root, runner, QueueFlags::default());
        let summary = engine.run().await.unwrap();

        assert_eq!(summary.failed, 1);
        assert!(config.failed_dir().join("bad.mp3").exists());
        assert!(!config.completed_dir().join("bad.mp3").exists());

        let history = HistoryStore::new(config.history_file());
        let fp = history::fingerprint_file(&config.failed_dir().join("bad.mp3")).unwrap();
        assert!(history.contains(&fp).unwrap());
        let contents = fs::read_to_string(config.history_file()).unwrap();
        assert!(contents.contains("|FAILED|bad.mp3"));
    }

    #[tokio::test]
    async fn retryable_job_returns_to_inbox_without_history() {
        let root = TempDir::new().unwrap();
        let config = test_config(root.path());
        seed_inbox(&config, "busy.mp3", b"audio");

        let runner = MockJobRunner::new().with_outcome("busy.mp3", JobStatus::Retryable);
        let (mut engine, _shutdown_tx) = engine_with(&root, runner, QueueFlags::default());
        let summary = engine.run().await.unwrap();

        assert_eq!(summary.retried, 1);
        assert!(config.inbox_dir().join("busy.mp3").exists());
        assert!(!config.processing_dir().join("busy.mp3").exists());

        let history = HistoryStore::new(config.history_file());
        let fp = history::fingerprint_file(&config.inbox_dir().join("busy.mp3")).unwrap();
        assert!(!history.contains(&fp).unwrap());
    }

    #[tokio::test]
    async fn history_hit_skips_straight_to_completed() {
        let root = TempDir::new().unwrap();
        let config = test_config(root.path());
        let seeded = seed_inbox(&config, "done.mp3", b"seen-before");

        let fp = history::fingerprint_file(&seeded).unwrap();
        let history = HistoryStore::new(config.history_file());
        history.record(&fp, Outcome::Success, "done.mp3").unwrap();

        let runner = MockJobRunner::new();
        let (mut engine, _shutdown_tx) = engine_with(&root, runner, QueueFlags::default());
        let summary = engine.run().await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.completed, 0);
        assert!(config.completed_dir().join("done.mp3").exists());
        assert!(engine.runner.runs().is_empty(), "runner must not be invoked");
    }

    #[tokio::test]
    async fn siblings_travel_with_the_primary() {
        let root = TempDir::new().unwrap();
        let config = test_config(root.path());
        seed_inbox(&config, "show.mp3", b"audio");
        seed_inbox(&config, "show.info.json", b"{}");
        seed_inbox(&config, "show.description", b"desc");
        seed_inbox(&config, "show.en.vtt", b"subs");

        let runner = MockJobRunner::new().with_outcome("show.mp3", JobStatus::Failed(3));
        let (mut engine, _shutdown_tx) = engine_with(&root, runner, QueueFlags::default());
        engine.run().await.unwrap();

        for name in ["show.mp3", "show.info.json", "show.description", "show.en.vtt"] {
            assert!(
                config.failed_dir().join(name).exists(),
                "{name} did not travel to failed/"
            );
            assert!(!config.inbox_dir().join(name).exists());
        }
    }

    #[tokio::test]
    async fn oldest_file_runs_first() {
        let root = TempDir::new().unwrap();
        let config = test_config(root.path());
        let newer = seed_inbox(&config, "newer.mp3", b"n");
        let older = seed_inbox(&config, "older.mp3", b"o");

        let now = std::time::SystemTime::now();
        File::options()
            .write(true)
            .open(&older)
            .unwrap()
            .set_modified(now - std::time::Duration::from_secs(600))
            .unwrap();
        File::options()
            .write(true)
            .open(&newer)
            .unwrap()
            .set_modified(now - std::time::Duration::from_secs(60))
            .unwrap();

        let (mut engine, _shutdown_tx) = engine_with(&root, MockJobRunner::new(), QueueFlags::default());
        engine.run().await.unwrap();

        assert_eq!(engine.runner.runs(), vec!["older.mp3", "newer.mp3"]);
    }

    #[tokio::test]
    async fn held_lock_is_a_quiet_noop() {
        let root = TempDir::new().unwrap();
        let config = test_config(root.path());
        seed_inbox(&config, "talk.mp3", b"audio");

        let lock_dir = root.path().join("locks");
        fs::create_dir_all(&lock_dir).unwrap();
        // A live peer (us) holds the queue lock.
        fs::write(
            lock_dir.join("queue-engine.lock"),
            crate::sys::current_pid().to_string(),
        )
        .unwrap();

        let (mut engine, _shutdown_tx) = engine_with(&root, MockJobRunner::new(), QueueFlags::default());
        let summary = engine.run().await.unwrap();

        assert_eq!(summary, QueueSummary::default());
        assert!(config.inbox_dir().join("talk.mp3").exists(), "file untouched");
        assert!(engine.runner.runs().is_empty());
    }

    #[tokio::test]
    async fn cleanup_original_audio_removes_media_keeps_transcript() {
        let root = TempDir::new().unwrap();
        let config = test_config(root.path());
        seed_inbox(&config, "talk.mp3", b"audio");

        let flags = QueueFlags {
            cleanup_original_audio: true,
            ..Default::default()
        };
        let (mut engine, _shutdown_tx) = engine_with(&root, MockJobRunner::new(), flags);
        engine.run().await.unwrap();

        assert!(!config.completed_dir().join("talk.mp3").exists());
        assert!(config.completed_dir().join("talk.txt").exists());
    }

    #[tokio::test]
    async fn second_pass_is_idempotent() {
        let root = TempDir::new().unwrap();
        let config = test_config(root.path());
        seed_inbox(&config, "talk.mp3", b"audio");

        let (mut engine, _shutdown_tx) = engine_with(&root, MockJobRunner::new(), QueueFlags::default());
        let first = engine.run().await.unwrap();
        assert_eq!(first.completed, 1);

        let second = engine.run().await.unwrap();
        assert_eq!(second, QueueSummary::default());
        assert_eq!(engine.runner.runs().len(), 1, "no duplicate work");
    }
}
