//! Job supervisor: one transcription run for one media file.
//!
//! Claims the audio-processing lock, builds a run directory, drives
//! segmentation → transcription → assembly, and reports the clean
//! transcript path to its parent via the last stdout line (the caller
//! prints it; this module only returns the path).

use crate::audio::ffmpeg::AudioTool;
use crate::audio::segmenter::{self, SegmentationRequest};
use crate::config::{Config, config_root};
use crate::defaults;
use crate::error::{Result, StentorError};
use crate::lock::{LockState, NamedLock};
use crate::stt::engine::{self, TranscriptionRequest};
use crate::stt::models;
use crate::transcript::{self, RunReport};
use md5::{Digest, Md5};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Caller-controlled knobs for one job.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Remove the workable WAV and segment files on success.
    pub cleanup_temp_audio: bool,
    /// Requested model order; empty means the default list.
    pub models: Vec<String>,
    /// Timeout multiplier; `None` means the default.
    pub timeout_multiplier: Option<u32>,
}

/// Everything a run reads and writes, rooted in its unique run directory.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub source_path: PathBuf,
    pub basename: String,
    pub run_id: String,
    pub run_dir: PathBuf,
    pub workable_wav: PathBuf,
    pub segments_dir: PathBuf,
    pub segmentation_info: PathBuf,
    pub transcript_md: PathBuf,
    pub transcript_txt: PathBuf,
    pub run_timestamp: String,
}

impl RunContext {
    /// Build the context for `source_path` under `runs_root`.
    ///
    /// The run id hashes the basename and appends a timestamp, so repeated
    /// runs of an identically-named file never collide.
    pub fn new(runs_root: &Path, source_path: &Path) -> Result<Self> {
        let basename = source_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_string())
            .ok_or_else(|| StentorError::InvalidArgument {
                name: "input".to_string(),
                message: format!("no usable file name in {}", source_path.display()),
            })?;
        let timestamp = chrono::Local::now()
            .format(defaults::RUN_ID_TIMESTAMP_FORMAT)
            .to_string();
        let digest = format!("{:x}", Md5::digest(basename.as_bytes()));
        let run_id = format!("{digest}_{timestamp}");
        let run_dir = runs_root.join(&run_id);

        Ok(Self {
            source_path: source_path.to_path_buf(),
            basename,
            workable_wav: run_dir.join("audio_workable.wav"),
            segments_dir: run_dir.join("segments"),
            segmentation_info: run_dir.join("segmentation_info"),
            transcript_md: run_dir.join("audio_transcript.md"),
            transcript_txt: run_dir.join("audio_transcript.txt"),
            run_id,
            run_dir,
            run_timestamp: timestamp,
        })
    }

    /// The description sidecar next to the source file, if present.
    pub fn description_sidecar(&self) -> Option<PathBuf> {
        let dir = self.source_path.parent()?;
        let base = self.source_path.file_stem()?.to_str()?;
        let path = dir.join(format!("{base}.description"));
        path.is_file().then_some(path)
    }
}

/// Run one job end to end. Returns the clean transcript's absolute path.
///
/// Error-to-exit-code mapping is the caller's job; lock contention
/// surfaces as [`StentorError::LockHeld`] (the retryable case).
pub async fn run_job(config: &Config, input: &Path, options: &JobOptions) -> Result<PathBuf> {
    if !input.is_file() {
        return Err(StentorError::InputNotFound {
            path: input.to_path_buf(),
        });
    }
    let multiplier = options
        .timeout_multiplier
        .unwrap_or(defaults::TIMEOUT_DURATION_MULTIPLIER);
    if multiplier == 0 {
        return Err(StentorError::InvalidArgument {
            name: "timeout-multiplier".to_string(),
            message: "must be a positive integer".to_string(),
        });
    }

    let mut lock = NamedLock::new(&config_root(), defaults::LOCK_AUDIO_PROCESSING);
    match lock.acquire()? {
        LockState::Acquired => {}
        LockState::AcquiredStale => {
            tracing::info!("reclaimed stale audio-processing lock");
        }
        LockState::Held => {
            return Err(StentorError::LockHeld {
                name: defaults::LOCK_AUDIO_PROCESSING.to_string(),
            });
        }
    }

    // The lock guard releases on drop, including the early-error paths.
    let started = Instant::now();
    let context = RunContext::new(&config.runs_root, input)?;
    fs::create_dir_all(&context.segments_dir)?;
    tracing::info!(
        run_id = %context.run_id,
        input = %input.display(),
        "starting transcription run"
    );

    let tool = AudioTool::new(config.ffmpeg_bin.clone(), config.ffprobe_bin.clone());
    let segmentation = segmenter::segment_audio(
        &tool,
        &SegmentationRequest {
            input: &context.source_path,
            workable: &context.workable_wav,
            segments_dir: &context.segments_dir,
            info_path: &context.segmentation_info,
        },
    )
    .await?;

    let effective = models::effective_models(&options.models);
    let description = context
        .description_sidecar()
        .and_then(|path| fs::read_to_string(path).ok());
    let outcome = engine::transcribe_segments(
        &TranscriptionRequest {
            stt_bin: &config.stt_bin,
            models_dir: &config.models_dir,
            models: &effective,
            timeout_multiplier: multiplier,
            basename: &context.basename,
            description: description.as_deref(),
        },
        &segmentation.segments,
    )
    .await?;

    // The detailed transcript is written on both paths: on failure it is
    // the forensic record of what was attempted.
    let report = RunReport {
        basename: &context.basename,
        run_timestamp: &context.run_timestamp,
        models_requested: &effective,
        timeout_multiplier: multiplier,
        elapsed: started.elapsed(),
        segments: &outcome.segments,
    };
    fs::write(&context.transcript_md, transcript::detailed_transcript(&report))?;

    if outcome.failed {
        let failed_index = outcome
            .segments
            .iter()
            .find(|s| !s.succeeded())
            .map(|s| s.index)
            .unwrap_or(0);
        return Err(StentorError::Transcription {
            segment: failed_index,
            message: "every configured model failed".to_string(),
        });
    }

    fs::write(&context.transcript_txt, transcript::clean_transcript(&outcome.segments))?;

    if options.cleanup_temp_audio {
        cleanup_temp_audio(&context);
    }

    tracing::info!(
        run_id = %context.run_id,
        segments = outcome.segments.len(),
        elapsed_secs = started.elapsed().as_secs(),
        "run complete"
    );

    lock.release();
    // The parent consumes this path from our stdout; it must be absolute.
    Ok(context.transcript_txt.canonicalize()?)
}

/// Drop the normalized WAV and segment files; transcripts and the
/// segmentation report always stay.
fn cleanup_temp_audio(context: &RunContext) {
    if let Err(e) = fs::remove_file(&context.workable_wav) {
        tracing::warn!("could not remove workable wav: {e}");
    }
    if let Err(e) = fs::remove_dir_all(&context.segments_dir) {
        tracing::warn!("could not remove segments dir: {e}");
    }
}
