//! Silence report parsing and segment planning.
//!
//! Pure functions: the ffmpeg invocation lives in [`crate::audio::ffmpeg`],
//! everything here operates on text and numbers so it can be tested
//! without audio files.

use crate::defaults;

/// A detected silence interval, in seconds from the start of the file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Silence {
    pub start: f64,
    pub end: f64,
}

/// A planned segment: a contiguous time range of the workable file.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSpan {
    /// 1-based index, later zero-padded to 3 digits in file names.
    pub index: u32,
    pub start: f64,
    pub duration: f64,
}

/// Parse ffmpeg silencedetect output into ordered silence intervals.
///
/// The filter reports `silence_start: X` and `silence_end: Y` pairs on
/// stderr. A trailing start without a matching end means the file ends in
/// silence; it is closed at `total_duration`.
pub fn parse_silencedetect(report: &str, total_duration: f64) -> Vec<Silence> {
    let mut silences = Vec::new();
    let mut open_start: Option<f64> = None;

    for line in report.lines() {
        if let Some(value) = field_after(line, "silence_start:") {
            open_start = value;
        } else if let Some(value) = field_after(line, "silence_end:") {
            // Consume the pending start even if the end fails to parse, so
            // a mangled line cannot mispair later silences.
            if let (Some(start), Some(end)) = (open_start.take(), value) {
                silences.push(Silence { start, end });
            }
        }
    }
    if let Some(start) = open_start {
        silences.push(Silence {
            start,
            end: total_duration,
        });
    }
    silences
}

/// Extract the number following `marker` on a silencedetect line.
/// `silence_end` lines carry a trailing `| silence_duration: ...` which is
/// ignored.
fn field_after(line: &str, marker: &str) -> Option<Option<f64>> {
    let idx = line.find(marker)?;
    let rest = &line[idx + marker.len()..];
    let token = rest.split_whitespace().next()?;
    Some(token.parse::<f64>().ok())
}

/// Build the segment plan from detected silences.
///
/// Walks silence starts: each candidate spans from the cursor to the next
/// silence start and is kept only if it meets the minimum duration. The
/// cursor then advances to the silence end minus the padding, so the next
/// segment overlaps slightly into the tail of the silence. A file with no
/// detected silences becomes exactly one segment regardless of length.
pub fn plan_segments(silences: &[Silence], total_duration: f64) -> Vec<SegmentSpan> {
    if silences.is_empty() {
        return vec![SegmentSpan {
            index: 1,
            start: 0.0,
            duration: total_duration,
        }];
    }

    let mut spans = Vec::new();
    let mut cursor = 0.0_f64;
    for silence in silences {
        let duration = silence.start - cursor;
        if duration >= defaults::MIN_SEGMENT_DURATION_SECS {
            spans.push((cursor, duration));
        }
        cursor = (silence.end - defaults::SEGMENT_PADDING_SECS).max(0.0);
    }
    let tail = total_duration - cursor;
    if tail >= defaults::MIN_SEGMENT_DURATION_SECS {
        spans.push((cursor, tail));
    }

    spans
        .into_iter()
        .enumerate()
        .map(|(i, (start, duration))| SegmentSpan {
            index: i as u32 + 1,
            start,
            duration,
        })
        .collect()
}

/// File name for a planned segment: `segment_001.wav`.
pub fn segment_file_name(index: u32) -> String {
    format!("segment_{index:03}.wav")
}
