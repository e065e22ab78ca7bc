//! Source-list parsing.
//!
//! One entry per line: `url|optional label`. Blank lines and lines whose
//! first non-whitespace character is `#` are ignored. Only the first `|`
//! splits, so labels may contain more bars.

use crate::error::{Result, StentorError};
use std::fs;
use std::path::Path;

/// One harvesting target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub url: String,
    pub label: Option<String>,
}

/// Parse the source list text.
pub fn parse_sources(contents: &str) -> Vec<SourceEntry> {
    contents
        .lines()
        .filter_map(|raw| {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let (url, label) = match line.split_once('|') {
                Some((url, label)) => {
                    let label = label.trim();
                    (
                        url.trim(),
                        (!label.is_empty()).then(|| label.to_string()),
                    )
                }
                None => (line, None),
            };
            if url.is_empty() {
                return None;
            }
            Some(SourceEntry {
                url: url.to_string(),
                label,
            })
        })
        .collect()
}

/// Load and parse the source-list file.
pub fn load_sources(path: &Path) -> Result<Vec<SourceEntry>> {
    let contents = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StentorError::InputNotFound {
                path: path.to_path_buf(),
            }
        } else {
            StentorError::Io(e)
        }
    })?;
    Ok(parse_sources(&contents))
}
