//! Transcription engine: ordered model fallback per segment.
//!
//! Each segment gets a dynamic time budget derived from its duration.
//! Models are tried in order until one produces non-empty output; a
//! segment that exhausts every model fails the whole job, because one
//! unreadable segment usually means a systemic problem (bad audio,
//! missing binary, wrong language) and transcribing the rest is wasted
//! work.

use crate::audio::segmenter::Segment;
use crate::defaults;
use crate::error::{Result, StentorError};
use crate::stt::{models, prompt};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Everything the engine needs for one run.
#[derive(Debug)]
pub struct TranscriptionRequest<'a> {
    pub stt_bin: &'a Path,
    pub models_dir: &'a Path,
    /// Effective model order (fallback already appended).
    pub models: &'a [String],
    pub timeout_multiplier: u32,
    /// Original media basename, used for the title part of the prompt.
    pub basename: &'a str,
    /// Contents of the description sidecar, if one exists.
    pub description: Option<&'a str>,
}

/// Per-segment result. `text` is `Some` exactly when some model succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentTranscription {
    pub index: u32,
    pub text: Option<String>,
    pub model_used: Option<String>,
    /// Models actually invoked (missing artifacts are not listed).
    pub models_attempted: Vec<String>,
}

impl SegmentTranscription {
    pub fn succeeded(&self) -> bool {
        self.text.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct TranscriptionOutcome {
    /// Results in segment order, up to and including the first failure.
    pub segments: Vec<SegmentTranscription>,
    /// True when a segment exhausted every model; the job must fail.
    pub failed: bool,
}

/// Per-segment timeout: `clamp(ceil(duration * multiplier), MIN, MAX)`.
pub fn effective_timeout_secs(duration_secs: f64, multiplier: u32) -> u64 {
    let raw = (duration_secs.max(0.0) * multiplier as f64).ceil() as u64;
    raw.clamp(defaults::MIN_TIMEOUT_SECS, defaults::MAX_TIMEOUT_SECS)
}

enum Attempt {
    Success(String),
    Timeout,
    Failed(String),
}

/// Transcribe segments in index order, threading context between them.
pub async fn transcribe_segments(
    request: &TranscriptionRequest<'_>,
    segments: &[Segment],
) -> Result<TranscriptionOutcome> {
    let mut results = Vec::with_capacity(segments.len());
    let mut previous_text: Option<String> = None;
    let mut failed = false;

    for segment in segments {
        let timeout_secs = effective_timeout_secs(segment.duration, request.timeout_multiplier);
        let prompt_text = prompt::build_prompt(
            request.basename,
            request.description,
            previous_text.as_deref(),
        );

        let mut attempted = Vec::new();
        let mut success: Option<(String, String)> = None;

        for model in request.models {
            if !models::is_model_installed(request.models_dir, model) {
                tracing::debug!(%model, "model artifact missing, skipping");
                continue;
            }
            attempted.push(model.clone());
            let model_path = models::model_path(request.models_dir, model);
            let attempt = transcribe_once(
                request.stt_bin,
                &model_path,
                &segment.path,
                &prompt_text,
                timeout_secs,
            )
            .await?;
            match attempt {
                Attempt::Success(text) => {
                    tracing::info!(segment = segment.index, %model, "segment transcribed");
                    success = Some((model.clone(), text));
                    break;
                }
                Attempt::Timeout => {
                    tracing::warn!(
                        segment = segment.index,
                        %model,
                        timeout_secs,
                        "transcription timed out, trying next model"
                    );
                }
                Attempt::Failed(reason) => {
                    tracing::warn!(
                        segment = segment.index,
                        %model,
                        %reason,
                        "model attempt failed, trying next model"
                    );
                }
            }
        }

        match success {
            Some((model, text)) => {
                previous_text = Some(text.clone());
                results.push(SegmentTranscription {
                    index: segment.index,
                    text: Some(text),
                    model_used: Some(model),
                    models_attempted: attempted,
                });
            }
            None => {
                // Clear the context so unrelated text is never carried
                // past a failure.
                previous_text = None;
                results.push(SegmentTranscription {
                    index: segment.index,
                    text: None,
                    model_used: None,
                    models_attempted: attempted,
                });
                failed = true;
                break;
            }
        }
    }

    Ok(TranscriptionOutcome {
        segments: results,
        failed,
    })
}

/// One STT invocation against one model, under the segment's time budget.
async fn transcribe_once(
    stt_bin: &Path,
    model_path: &Path,
    segment_path: &Path,
    prompt_text: &str,
    timeout_secs: u64,
) -> Result<Attempt> {
    let out_base = segment_path.with_extension("");
    let out_txt = segment_path.with_extension("txt");

    let mut command = Command::new(stt_bin);
    command
        .arg("-m")
        .arg(model_path)
        .arg("-f")
        .arg(segment_path)
        .arg("-otxt")
        .arg("-of")
        .arg(&out_base)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if !prompt_text.is_empty() {
        command.arg("--prompt").arg(prompt_text);
    }

    let child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StentorError::MissingDependency {
                tool: stt_bin.display().to_string(),
            }
        } else {
            StentorError::Io(e)
        }
    })?;

    let output = match tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        child.wait_with_output(),
    )
    .await
    {
        Ok(result) => result?,
        // kill_on_drop reaps the abandoned child.
        Err(_) => return Ok(Attempt::Timeout),
    };

    if !output.status.success() {
        return Ok(Attempt::Failed(format!(
            "exit status {}",
            output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string())
        )));
    }
    let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
    if let Some(marker) = defaults::STT_ERROR_MARKERS
        .iter()
        .find(|m| stderr.contains(*m))
    {
        return Ok(Attempt::Failed(format!("stt reported '{marker}'")));
    }

    match std::fs::read_to_string(&out_txt) {
        Ok(text) if !text.trim().is_empty() => Ok(Attempt::Success(text.trim().to_string())),
        Ok(_) => Ok(Attempt::Failed("empty transcript output".to_string())),
        Err(_) => Ok(Attempt::Failed("missing transcript output".to_string())),
    }
}
