//! Context prompt assembly for the STT binary.
//!
//! The prompt threads context into each segment: the media title, a slice
//! of the description sidecar, and the tail of the previous segment's
//! transcript. Everything is clamped to word boundaries and stripped of
//! double quotes: embedded quotes have historically corrupted either the
//! invocation or the diagnostic log, so the stripping is documented
//! behavior even under an exec-style API.

use crate::defaults;

/// Title derived from the media basename: the extension and a trailing
/// `[ID]` marker are stripped, underscores become spaces.
pub fn clean_title(basename: &str) -> String {
    let stem = basename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(basename);
    let without_id = match (stem.rfind('['), stem.ends_with(']')) {
        (Some(open), true) => stem[..open].trim_end(),
        _ => stem.trim_end(),
    };
    without_id.replace('_', " ").trim().to_string()
}

/// Cut `text` to at most `max_chars` characters, backing up to the nearest
/// preceding whitespace so no word is cut in half. Falls back to the hard
/// cut when the clamped slice contains no whitespace at all.
pub fn truncate_to_word_boundary(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.trim().to_string();
    }
    let hard: String = text.chars().take(max_chars).collect();
    match hard.rfind(char::is_whitespace) {
        Some(cut) => hard[..cut].trim_end().to_string(),
        None => hard,
    }
}

/// Tail of the previous segment's transcript used as context.
///
/// Takes the last `max_chars` characters, then drops the leading partial
/// word (everything up to the first whitespace) when a cut actually
/// happened. Whitespace is the boundary class.
pub fn context_tail(previous: &str, max_chars: usize) -> Option<String> {
    let trimmed = previous.trim();
    if trimmed.is_empty() {
        return None;
    }
    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() <= max_chars {
        return Some(trimmed.to_string());
    }
    let cut = chars.len() - max_chars;
    let tail: String = chars[cut..].iter().collect();

    // Only strip the first word when the cut actually landed inside it.
    let starts_on_boundary = chars[cut - 1].is_whitespace();
    let kept = if starts_on_boundary {
        tail.trim_start()
    } else {
        match tail.find(char::is_whitespace) {
            Some(idx) => tail[idx..].trim_start(),
            // A single giant word: keep the raw tail rather than nothing.
            None => tail.as_str(),
        }
    };
    let kept = kept.trim();
    if kept.is_empty() {
        None
    } else {
        Some(kept.to_string())
    }
}

/// Assemble the full prompt for one segment.
///
/// Order: cleaned title, description slice, `[...] ` + previous-segment
/// tail. The result is quote-stripped and clamped to
/// [`defaults::MAX_TOTAL_PROMPT_CHARS`] on a word boundary.
pub fn build_prompt(
    basename: &str,
    description: Option<&str>,
    previous_transcript: Option<&str>,
) -> String {
    let mut parts: Vec<String> = Vec::new();

    let title = clean_title(basename);
    if !title.is_empty() {
        parts.push(title);
    }

    if let Some(description) = description {
        let slice =
            truncate_to_word_boundary(description, defaults::MAX_DESCRIPTION_CHARS_FOR_PROMPT);
        if !slice.is_empty() {
            parts.push(slice);
        }
    }

    if let Some(previous) = previous_transcript
        && let Some(tail) = context_tail(previous, defaults::INTER_SEGMENT_CONTEXT_CHARS)
    {
        parts.push(format!("{}{}", defaults::CONTEXT_SEPARATOR, tail));
    }

    let assembled = parts.join(" ").replace('"', "");
    truncate_to_word_boundary(&assembled, defaults::MAX_TOTAL_PROMPT_CHARS)
}
