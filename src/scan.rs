//! Inbox scanning and media-group resolution.
//!
//! The scanner returns audio file paths oldest-first. Sibling files that
//! share the primary's base name (metadata, subtitles, info sidecars) form
//! a media group and always move between queue states together.

use crate::defaults;
use crate::error::{Result, StentorError};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Enumerate audio files in `dir`, ascending modification time. Ties break
/// on the file name so a single scan is deterministic.
///
/// Hidden files and macOS `._` metadata artifacts are skipped, as is
/// anything whose extension is not in the configured audio set.
pub fn scan_inbox(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if is_hidden(name) || !has_audio_extension(&path) {
            continue;
        }
        let mtime = entry
            .metadata()?
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH);
        found.push((mtime, path));
    }
    found.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Hidden files and filesystem metadata artifacts (`.foo`, `._foo`).
fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Case-insensitive membership in the audio extension set.
pub fn has_audio_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            defaults::AUDIO_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

/// Base name of a media group: the primary file's stem.
pub fn group_base(primary: &Path) -> Result<String> {
    primary
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .ok_or_else(|| StentorError::InvalidArgument {
            name: "primary".to_string(),
            message: format!("no usable base name in {}", primary.display()),
        })
}

/// All files in the primary's directory belonging to its media group: the
/// primary itself plus every regular file named `<base>.<anything>`.
///
/// `showcase.mp3` is not a sibling of `show.mp3`: the base must be
/// followed by a dot.
pub fn media_group(primary: &Path) -> Result<Vec<PathBuf>> {
    let dir = primary.parent().ok_or_else(|| StentorError::InvalidArgument {
        name: "primary".to_string(),
        message: format!("{} has no parent directory", primary.display()),
    })?;
    let base = group_base(primary)?;
    let prefix = format!("{base}.");

    let mut group = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name == base || name.starts_with(&prefix) {
            group.push(entry.path());
        }
    }
    group.sort();
    Ok(group)
}

/// Move the whole media group into `dest_dir` via rename, returning the
/// primary's new path. Renames are atomic per file; the group is small and
/// single-writer, so a crash mid-move is repaired by the next scan.
pub fn move_group(primary: &Path, dest_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dest_dir)?;
    let mut new_primary = None;
    for member in media_group(primary)? {
        let Some(name) = member.file_name() else {
            continue;
        };
        let dest = dest_dir.join(name);
        fs::rename(&member, &dest)?;
        if member == primary {
            new_primary = Some(dest);
        }
    }
    new_primary.ok_or_else(|| StentorError::InputNotFound {
        path: primary.to_path_buf(),
    })
}
