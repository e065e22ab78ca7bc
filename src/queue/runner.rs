//! Job execution behind a trait, so the queue engine can be tested
//! without spawning real children.
//!
//! The real implementation launches this same binary's `process`
//! subcommand as a child, streams its combined output into the per-job
//! log and the engine's own log, and enforces the TERM-grace-KILL
//! shutdown contract.

use crate::defaults;
use crate::error::{Result, StentorError};
use crate::lock;
use crate::sys;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

/// One job handed to a runner.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub input: PathBuf,
    pub models: Vec<String>,
    pub timeout_multiplier: Option<u32>,
    pub cleanup_temp_audio: bool,
}

/// How the job ended, classified from the child's exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Exit 0: move to completed, record SUCCESS.
    Success,
    /// Exit 10: lock contention, move back to inbox, no history record.
    Retryable,
    /// Anything else: move to failed, record FAILED.
    Failed(i32),
}

#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub status: JobStatus,
    /// Clean transcript path from the child's last stdout line, on success.
    pub clean_transcript: Option<PathBuf>,
}

/// Runs one job and reports its outcome.
///
/// The trait exists so tests can swap in [`MockJobRunner`]; production
/// uses [`ChildJobRunner`]. Callers await the returned future on the
/// current task, so no `Send` bound is needed.
#[allow(async_fn_in_trait)]
pub trait JobRunner {
    async fn run(
        &self,
        request: &JobRequest,
        log_path: &Path,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<JobOutcome>;
}

/// Classify a child exit code per the queue contract.
pub fn classify_exit(code: Option<i32>) -> JobStatus {
    match code {
        Some(0) => JobStatus::Success,
        Some(c) if c == defaults::EXIT_RETRYABLE => JobStatus::Retryable,
        Some(c) => JobStatus::Failed(c),
        // Killed by signal.
        None => JobStatus::Failed(-1),
    }
}

/// Production runner: spawns `<self> process ...` as a child process.
#[derive(Debug)]
pub struct ChildJobRunner {
    program: PathBuf,
    config_path: Option<PathBuf>,
    /// The audio-processing lock file, for the post-KILL safeguard.
    job_lock_path: PathBuf,
}

impl ChildJobRunner {
    pub fn new(program: PathBuf, config_path: Option<PathBuf>, job_lock_path: PathBuf) -> Self {
        Self {
            program,
            config_path,
            job_lock_path,
        }
    }

    fn build_command(&self, request: &JobRequest) -> Command {
        let mut command = Command::new(&self.program);
        if let Some(config) = &self.config_path {
            command.arg("--config").arg(config);
        }
        command.arg("process");
        if request.cleanup_temp_audio {
            command.arg("--cleanup-temp-audio");
        }
        command.arg(&request.input);
        if !request.models.is_empty() {
            command.arg(request.models.join(","));
        }
        if let Some(multiplier) = request.timeout_multiplier {
            command.arg(multiplier.to_string());
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl JobRunner for ChildJobRunner {
    async fn run(
        &self,
        request: &JobRequest,
        log_path: &Path,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<JobOutcome> {
        if let Some(dir) = log_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .await?;

        let mut child = self.build_command(request).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StentorError::MissingDependency {
                    tool: self.program.display().to_string(),
                }
            } else {
                StentorError::Io(e)
            }
        })?;
        let pid = child.id().unwrap_or(0);
        tracing::info!(pid, input = %request.input.display(), "job child started");

        // Merge stdout and stderr line streams in arrival order.
        let (tx, mut rx) = mpsc::channel::<(bool, String)>(256);
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, true, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, false, tx.clone());
        }
        drop(tx);

        let mut last_stdout: Option<String> = None;
        let mut pipes_done = false;
        let mut terminated = false;
        let mut killed = false;
        let mut kill_at: Option<tokio::time::Instant> = None;

        let status = loop {
            tokio::select! {
                maybe_line = rx.recv(), if !pipes_done => {
                    match maybe_line {
                        Some((is_stdout, line)) => {
                            log.write_all(line.as_bytes()).await?;
                            log.write_all(b"\n").await?;
                            tracing::info!(pid, "[job] {line}");
                            if is_stdout {
                                last_stdout = Some(line);
                            }
                        }
                        None => pipes_done = true,
                    }
                }
                result = child.wait() => break result?,
                _ = shutdown.changed(), if !terminated => {
                    terminated = true;
                    tracing::warn!(pid, "shutdown requested, sending TERM to job child");
                    sys::terminate(pid);
                    kill_at = Some(
                        tokio::time::Instant::now()
                            + std::time::Duration::from_secs(defaults::CHILD_TERM_GRACE_SECS),
                    );
                }
                _ = sleep_until_opt(kill_at), if kill_at.is_some() && !killed => {
                    killed = true;
                    tracing::warn!(pid, "grace period expired, sending KILL to job child");
                    sys::kill(pid);
                }
            }
        };

        // Drain whatever the readers still hold.
        while let Some((is_stdout, line)) = rx.recv().await {
            log.write_all(line.as_bytes()).await?;
            log.write_all(b"\n").await?;
            if is_stdout {
                last_stdout = Some(line);
            }
        }
        log.flush().await?;

        // A KILLed child never ran its own cleanup: remove its lock, but
        // only if the stored PID is really the child's. A newly-started
        // peer may already hold it.
        if killed && lock::remove_if_owned_by(&self.job_lock_path, pid) {
            tracing::warn!(pid, "removed orphaned audio-processing lock after KILL");
        }

        let status = classify_exit(status.code());
        let clean_transcript = match status {
            JobStatus::Success => last_stdout.map(PathBuf::from),
            _ => None,
        };
        tracing::info!(pid, ?status, "job child finished");
        Ok(JobOutcome {
            status,
            clean_transcript,
        })
    }
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn spawn_line_reader<R>(reader: R, is_stdout: bool, tx: mpsc::Sender<(bool, String)>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send((is_stdout, line)).await.is_err() {
                break;
            }
        }
    });
}

// ── Test support ────────────────────────────────────────────────────────

/// Scripted runner for queue-engine tests (no child processes).
///
/// Outcomes are keyed by the input's basename; unscripted inputs succeed.
/// On success a transcript file is materialized next to the log so the
/// engine has something to copy.
#[derive(Debug, Default)]
pub struct MockJobRunner {
    outcomes: std::sync::Mutex<std::collections::HashMap<String, JobStatus>>,
    runs: std::sync::Mutex<Vec<String>>,
}

impl MockJobRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the outcome for a given input basename.
    pub fn with_outcome(self, basename: &str, status: JobStatus) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .insert(basename.to_string(), status);
        self
    }

    /// Basenames run so far, in order.
    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().unwrap().clone()
    }
}

impl JobRunner for MockJobRunner {
    async fn run(
        &self,
        request: &JobRequest,
        log_path: &Path,
        _shutdown: &mut watch::Receiver<bool>,
    ) -> Result<JobOutcome> {
        let basename = request
            .input
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.runs.lock().unwrap().push(basename.clone());

        if let Some(dir) = log_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(log_path, format!("mock run for {basename}\n"))?;

        let status = self
            .outcomes
            .lock()
            .unwrap()
            .get(&basename)
            .copied()
            .unwrap_or(JobStatus::Success);

        let clean_transcript = if status == JobStatus::Success {
            let path = log_path.with_extension("transcript.txt");
            std::fs::write(&path, format!("mock transcript for {basename}\n"))?;
            Some(path)
        } else {
            None
        };

        Ok(JobOutcome {
            status,
            clean_transcript,
        })
    }
}
