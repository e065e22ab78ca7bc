//! Process adapters for the external audio tool (ffmpeg/ffprobe).
//!
//! Every invocation goes through [`AudioTool`] so the binary paths come
//! from configuration and tests can point them at stubs.

use crate::defaults;
use crate::error::{Result, StentorError};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Stream-level facts about an audio file, as reported by ffprobe.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioProbe {
    pub codec_name: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_secs: f64,
}

/// Handle on the configured ffmpeg/ffprobe binaries.
#[derive(Debug, Clone)]
pub struct AudioTool {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl AudioTool {
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf) -> Self {
        Self { ffmpeg, ffprobe }
    }

    /// Probe the first audio stream of `path`.
    pub async fn probe(&self, path: &Path) -> Result<AudioProbe> {
        let output = Command::new(&self.ffprobe)
            .arg("-v")
            .arg("error")
            .arg("-select_streams")
            .arg("a:0")
            .arg("-show_entries")
            .arg("stream=codec_name,sample_rate,channels:format=duration")
            .arg("-of")
            .arg("default=noprint_wrappers=1")
            .arg(path)
            .output()
            .await
            .map_err(|e| tool_spawn_error("ffprobe", e))?;
        if !output.status.success() {
            return Err(StentorError::Audio {
                message: format!(
                    "ffprobe failed for {}: {}",
                    path.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }

    /// Transcode `input` to the canonical form (16 kHz mono s16le WAV).
    pub async fn transcode_to_canonical(&self, input: &Path, output: &Path) -> Result<()> {
        let result = Command::new(&self.ffmpeg)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-ar")
            .arg(defaults::TARGET_SAMPLE_RATE.to_string())
            .arg("-ac")
            .arg(defaults::TARGET_CHANNELS.to_string())
            .arg("-c:a")
            .arg("pcm_s16le")
            .arg(output)
            .output()
            .await
            .map_err(|e| tool_spawn_error("ffmpeg", e))?;
        if !result.status.success() {
            return Err(StentorError::Audio {
                message: format!(
                    "normalization failed for {}: {}",
                    input.display(),
                    String::from_utf8_lossy(&result.stderr).trim()
                ),
            });
        }
        Ok(())
    }

    /// Run the silencedetect filter and return its raw report (ffmpeg
    /// prints filter output on stderr).
    pub async fn detect_silences(&self, input: &Path) -> Result<String> {
        let filter = format!(
            "silencedetect=noise={}dB:d={}",
            defaults::SILENCE_NOISE_THRESHOLD_DB,
            defaults::SILENCE_MIN_DURATION_SECS
        );
        let output = Command::new(&self.ffmpeg)
            .arg("-i")
            .arg(input)
            .arg("-af")
            .arg(&filter)
            .arg("-f")
            .arg("null")
            .arg("-")
            .output()
            .await
            .map_err(|e| tool_spawn_error("ffmpeg", e))?;
        if !output.status.success() {
            return Err(StentorError::Audio {
                message: format!(
                    "silence detection failed for {}: {}",
                    input.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stderr).to_string())
    }

    /// Extract `[start, start+duration)` from `input` as canonical WAV.
    pub async fn extract_segment(
        &self,
        input: &Path,
        start_secs: f64,
        duration_secs: f64,
        output: &Path,
    ) -> Result<()> {
        let result = Command::new(&self.ffmpeg)
            .arg("-y")
            .arg("-ss")
            .arg(format!("{start_secs:.3}"))
            .arg("-t")
            .arg(format!("{duration_secs:.3}"))
            .arg("-i")
            .arg(input)
            .arg("-c:a")
            .arg("pcm_s16le")
            .arg(output)
            .output()
            .await
            .map_err(|e| tool_spawn_error("ffmpeg", e))?;
        if !result.status.success() {
            return Err(StentorError::Audio {
                message: format!(
                    "segment extraction failed at {:.3}s: {}",
                    start_secs,
                    String::from_utf8_lossy(&result.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}

fn tool_spawn_error(tool: &str, e: std::io::Error) -> StentorError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StentorError::MissingDependency {
            tool: tool.to_string(),
        }
    } else {
        StentorError::Io(e)
    }
}

/// Parse ffprobe `default=noprint_wrappers=1` key=value output.
///
/// The stream and format sections may both print `duration`; the last
/// parseable value wins and `N/A` is ignored.
fn parse_probe_output(text: &str) -> Result<AudioProbe> {
    let mut codec_name = None;
    let mut sample_rate = None;
    let mut channels = None;
    let mut duration = None;

    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() || value == "N/A" {
            continue;
        }
        match key.trim() {
            "codec_name" => codec_name = Some(value.to_string()),
            "sample_rate" => sample_rate = value.parse::<u32>().ok().or(sample_rate),
            "channels" => channels = value.parse::<u16>().ok().or(channels),
            "duration" => duration = value.parse::<f64>().ok().or(duration),
            _ => {}
        }
    }

    match (codec_name, sample_rate, channels, duration) {
        (Some(codec_name), Some(sample_rate), Some(channels), Some(duration_secs)) => {
            Ok(AudioProbe {
                codec_name,
                sample_rate,
                channels,
                duration_secs,
            })
        }
        _ => Err(StentorError::Audio {
            message: format!("incomplete ffprobe output: {}", text.trim()),
        }),
    }
}

/// Whether a probed stream is already in canonical form. Both byte orders
/// of 16-bit PCM are accepted.
pub fn probe_is_canonical(probe: &AudioProbe) -> bool {
    (probe.codec_name == "pcm_s16le" || probe.codec_name == "pcm_s16be")
        && probe.sample_rate == defaults::TARGET_SAMPLE_RATE
        && probe.channels == defaults::TARGET_CHANNELS
}
