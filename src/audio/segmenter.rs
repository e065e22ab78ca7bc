//! Segmentation engine: normalize the input, split it on silences.
//!
//! Produces the workable WAV, an ordered list of segment files, and a
//! human-readable `segmentation_info` report in the run directory.

use crate::audio::ffmpeg::{AudioTool, probe_is_canonical};
use crate::audio::silence::{self, SegmentSpan};
use crate::defaults;
use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// A segment extracted to its own canonical WAV file.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub index: u32,
    pub start: f64,
    pub duration: f64,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentationMethod {
    /// No silences detected; the whole file is one segment.
    WholeFile,
    SilenceDetection,
}

impl SegmentationMethod {
    fn describe(self) -> &'static str {
        match self {
            SegmentationMethod::WholeFile => "none (whole file)",
            SegmentationMethod::SilenceDetection => "silence detection",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SegmentationOutcome {
    pub total_duration: f64,
    pub method: SegmentationMethod,
    pub segments: Vec<Segment>,
}

/// Paths the segmenter reads and writes, all inside the run directory
/// except the source input.
#[derive(Debug)]
pub struct SegmentationRequest<'a> {
    pub input: &'a Path,
    pub workable: &'a Path,
    pub segments_dir: &'a Path,
    pub info_path: &'a Path,
}

/// Run the full segmentation pipeline for one input file.
pub async fn segment_audio(
    tool: &AudioTool,
    request: &SegmentationRequest<'_>,
) -> Result<SegmentationOutcome> {
    fs::create_dir_all(request.segments_dir)?;

    // Normalize: canonical inputs are copied, everything else transcoded.
    if is_canonical_input(tool, request.input).await? {
        tracing::debug!(input = %request.input.display(), "input already canonical, copying");
        fs::copy(request.input, request.workable)?;
    } else {
        tracing::debug!(input = %request.input.display(), "normalizing to canonical WAV");
        tool.transcode_to_canonical(request.input, request.workable)
            .await?;
    }

    let total_duration = workable_duration(tool, request.workable).await?;

    let report = tool.detect_silences(request.workable).await?;
    let silences = silence::parse_silencedetect(&report, total_duration);
    let spans = silence::plan_segments(&silences, total_duration);
    let method = if silences.is_empty() {
        SegmentationMethod::WholeFile
    } else {
        SegmentationMethod::SilenceDetection
    };
    tracing::info!(
        silences = silences.len(),
        segments = spans.len(),
        duration_secs = total_duration,
        "segmentation planned"
    );

    let segments = match method {
        SegmentationMethod::WholeFile => {
            vec![alias_whole_file(request, &spans[0])?]
        }
        SegmentationMethod::SilenceDetection => {
            let mut segments = Vec::with_capacity(spans.len());
            for span in &spans {
                let path = request.segments_dir.join(silence::segment_file_name(span.index));
                tool.extract_segment(request.workable, span.start, span.duration, &path)
                    .await?;
                segments.push(Segment {
                    index: span.index,
                    start: span.start,
                    duration: span.duration,
                    path,
                });
            }
            segments
        }
    };

    let outcome = SegmentationOutcome {
        total_duration,
        method,
        segments,
    };
    fs::write(request.info_path, render_info(request.input, &outcome))?;
    Ok(outcome)
}

/// Whether the input already is canonical WAV (16 kHz mono s16 PCM).
///
/// The fast path reads the WAV header directly; big-endian PCM (which
/// hound does not read) falls back to an ffprobe check.
async fn is_canonical_input(tool: &AudioTool, input: &Path) -> Result<bool> {
    let is_wav = input
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("wav"))
        .unwrap_or(false);
    if !is_wav {
        return Ok(false);
    }
    if wav_is_canonical(input) {
        return Ok(true);
    }
    let probe = tool.probe(input).await?;
    Ok(probe_is_canonical(&probe))
}

/// Header-level canonical check for little-endian WAV files.
fn wav_is_canonical(path: &Path) -> bool {
    hound::WavReader::open(path)
        .map(|reader| {
            let spec = reader.spec();
            spec.sample_rate == defaults::TARGET_SAMPLE_RATE
                && spec.channels == defaults::TARGET_CHANNELS
                && spec.bits_per_sample == 16
                && spec.sample_format == hound::SampleFormat::Int
        })
        .unwrap_or(false)
}

/// Duration of the workable file, preferring the WAV header over a probe.
async fn workable_duration(tool: &AudioTool, path: &Path) -> Result<f64> {
    if let Some(duration) = wav_duration_secs(path) {
        return Ok(duration);
    }
    Ok(tool.probe(path).await?.duration_secs)
}

fn wav_duration_secs(path: &Path) -> Option<f64> {
    let reader = hound::WavReader::open(path).ok()?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return None;
    }
    Some(reader.duration() as f64 / spec.sample_rate as f64)
}

/// Alias the workable file as the single segment, avoiding a copy where
/// symlinks work.
fn alias_whole_file(request: &SegmentationRequest<'_>, span: &SegmentSpan) -> Result<Segment> {
    let path = request
        .segments_dir
        .join(silence::segment_file_name(span.index));
    let target = request.workable.canonicalize()?;
    if std::os::unix::fs::symlink(&target, &path).is_err() {
        fs::copy(request.workable, &path)?;
    }
    Ok(Segment {
        index: span.index,
        start: span.start,
        duration: span.duration,
        path,
    })
}

/// Render the human-readable segmentation report.
fn render_info(input: &Path, outcome: &SegmentationOutcome) -> String {
    let mut info = String::new();
    info.push_str("Segmentation report\n");
    info.push_str(&format!("Source: {}\n", input.display()));
    info.push_str(&format!("Total duration: {:.2} s\n", outcome.total_duration));
    info.push_str(&format!("Method: {}\n", outcome.method.describe()));
    info.push_str(&format!(
        "Parameters: noise={}dB min_silence={:.2}s min_segment={:.2}s padding={:.2}s\n",
        defaults::SILENCE_NOISE_THRESHOLD_DB,
        defaults::SILENCE_MIN_DURATION_SECS,
        defaults::MIN_SEGMENT_DURATION_SECS,
        defaults::SEGMENT_PADDING_SECS,
    ));
    info.push('\n');
    info.push_str("Index  File             Duration (s)\n");
    for segment in &outcome.segments {
        let name = segment
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        info.push_str(&format!(
            "{:>5}  {:<16} {:>10.2}\n",
            format!("{:03}", segment.index),
            name,
            segment.duration
        ));
    }
    info
}
