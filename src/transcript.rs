//! Run assembler: compose segment outputs into the transcript pair.
//!
//! Each run produces a detailed, Markdown-flavored transcript carrying
//! per-segment provenance, and a clean transcript holding only the text.

use crate::stt::engine::SegmentTranscription;
use std::time::Duration;

/// Metadata rendered into the detailed transcript's header and footer.
#[derive(Debug)]
pub struct RunReport<'a> {
    pub basename: &'a str,
    pub run_timestamp: &'a str,
    pub models_requested: &'a [String],
    pub timeout_multiplier: u32,
    pub elapsed: Duration,
    pub segments: &'a [SegmentTranscription],
}

/// Render the detailed transcript.
pub fn detailed_transcript(report: &RunReport<'_>) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Transcript: {}\n\n", report.basename));
    out.push_str(&format!("- Run: {}\n", report.run_timestamp));
    out.push_str(&format!(
        "- Models requested: {}\n",
        report.models_requested.join(", ")
    ));
    out.push_str(&format!(
        "- Timeout multiplier: {}\n\n",
        report.timeout_multiplier
    ));

    for segment in report.segments {
        match (&segment.text, &segment.model_used) {
            (Some(text), Some(model)) => {
                out.push_str(&format!(
                    "--- Segment {:03} (Model: {}) ---\n\n{}\n\n",
                    segment.index, model, text
                ));
            }
            _ => {
                out.push_str(&format!(
                    "--- Segment {:03} (FAILED TO TRANSCRIBE) ---\n\n",
                    segment.index
                ));
                if segment.models_attempted.is_empty() {
                    out.push_str("Models attempted: none (no artifacts available)\n\n");
                } else {
                    out.push_str(&format!(
                        "Models attempted: {}\n\n",
                        segment.models_attempted.join(", ")
                    ));
                }
            }
        }
    }

    let successful = report.segments.iter().filter(|s| s.succeeded()).count();
    let failed = report.segments.len() - successful;
    out.push_str("---\n\n");
    out.push_str("Processing statistics:\n");
    out.push_str(&format!("- Total segments: {}\n", report.segments.len()));
    out.push_str(&format!("- Successful: {successful}\n"));
    out.push_str(&format!("- Failed: {failed}\n"));
    out.push_str(&format!("- Elapsed: {} s\n", report.elapsed.as_secs()));
    out
}

/// Render the clean transcript: successful segment texts separated by a
/// blank line, nothing else.
pub fn clean_transcript(segments: &[SegmentTranscription]) -> String {
    let mut text = segments
        .iter()
        .filter_map(|s| s.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n\n");
    if !text.is_empty() {
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_segment(index: u32, text: &str, model: &str) -> SegmentTranscription {
        SegmentTranscription {
            index,
            text: Some(text.to_string()),
            model_used: Some(model.to_string()),
            models_attempted: vec![model.to_string()],
        }
    }

    fn failed_segment(index: u32, attempted: &[&str]) -> SegmentTranscription {
        SegmentTranscription {
            index,
            text: None,
            model_used: None,
            models_attempted: attempted.iter().map(|m| m.to_string()).collect(),
        }
    }

    fn report<'a>(segments: &'a [SegmentTranscription], models: &'a [String]) -> RunReport<'a> {
        RunReport {
            basename: "talk.mp3",
            run_timestamp: "2026-08-02_142233",
            models_requested: models,
            timeout_multiplier: 5,
            elapsed: Duration::from_secs(93),
            segments,
        }
    }

    #[test]
    fn detailed_contains_header_segments_and_stats() {
        let models = vec!["base.en".to_string()];
        let segments = vec![
            ok_segment(1, "first part", "base.en"),
            ok_segment(2, "second part", "tiny.en"),
        ];
        let text = detailed_transcript(&report(&segments, &models));

        assert!(text.starts_with("# Transcript: talk.mp3"));
        assert!(text.contains("- Run: 2026-08-02_142233"));
        assert!(text.contains("- Models requested: base.en"));
        assert!(text.contains("- Timeout multiplier: 5"));
        assert!(text.contains("--- Segment 001 (Model: base.en) ---"));
        assert!(text.contains("first part"));
        assert!(text.contains("--- Segment 002 (Model: tiny.en) ---"));
        assert!(text.contains("- Total segments: 2"));
        assert!(text.contains("- Successful: 2"));
        assert!(text.contains("- Failed: 0"));
        assert!(text.contains("- Elapsed: 93 s"));
    }

    #[test]
    fn detailed_renders_failed_segment_with_attempts() {
        let models = vec!["base.en".to_string(), "tiny.en".to_string()];
        let segments = vec![
            ok_segment(1, "fine", "base.en"),
            failed_segment(2, &["base.en", "tiny.en"]),
        ];
        let text = detailed_transcript(&report(&segments, &models));

        assert!(text.contains("--- Segment 002 (FAILED TO TRANSCRIBE) ---"));
        assert!(text.contains("Models attempted: base.en, tiny.en"));
        assert!(text.contains("- Successful: 1"));
        assert!(text.contains("- Failed: 1"));
    }

    #[test]
    fn detailed_failed_segment_without_attempts() {
        let models = vec!["base.en".to_string()];
        let segments = vec![failed_segment(1, &[])];
        let text = detailed_transcript(&report(&segments, &models));
        assert!(text.contains("Models attempted: none (no artifacts available)"));
    }

    #[test]
    fn clean_concatenates_with_blank_lines_only() {
        let segments = vec![
            ok_segment(1, "first paragraph", "base.en"),
            failed_segment(2, &["base.en"]),
            ok_segment(3, "third paragraph", "base.en"),
        ];
        let text = clean_transcript(&segments);
        assert_eq!(text, "first paragraph\n\nthird paragraph\n");
        assert!(!text.contains("Segment"));
        assert!(!text.contains("---"));
    }

    #[test]
    fn clean_of_nothing_is_empty() {
        assert_eq!(clean_transcript(&[]), "");
        let segments = vec![failed_segment(1, &["base.en"])];
        assert_eq!(clean_transcript(&segments), "");
    }
}
