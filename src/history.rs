//! Append-only history of processed media fingerprints.
//!
//! One line per terminal outcome: `fingerprint|timestamp|outcome|basename`.
//! The file is never rewritten; a fingerprint present here means the queue
//! will not process that content again until an operator removes the line.

use crate::defaults;
use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

/// Terminal outcome recorded for a processed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "SUCCESS",
            Outcome::Failed => "FAILED",
        }
    }
}

/// Handle on the history file. Cheap to construct; every operation opens
/// the file fresh, so concurrent engines on the same host stay consistent.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `fingerprint` already has a terminal record.
    ///
    /// Linear scan; the file stays small (one short line per media file).
    pub fn contains(&self, fingerprint: &str) -> Result<bool> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        Ok(contents
            .lines()
            .any(|line| line.split('|').next() == Some(fingerprint)))
    }

    /// Append a terminal record and flush it to disk.
    ///
    /// Creates the file on first use. Duplicate appends are harmless since
    /// `contains` matches the fingerprint field alone.
    pub fn record(&self, fingerprint: &str, outcome: Outcome, basename: &str) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let timestamp = chrono::Local::now()
            .format(defaults::HISTORY_TIMESTAMP_FORMAT)
            .to_string();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(
            file,
            "{}|{}|{}|{}",
            fingerprint,
            timestamp,
            outcome.as_str(),
            basename
        )?;
        file.sync_all()?;
        Ok(())
    }
}

/// Content fingerprint of a media file: lowercase-hex SHA-256.
pub fn fingerprint_file(path: &Path) -> Result<String> {
    let file = fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn contains_on_missing_file_is_false() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::new(dir.path().join("processed_files.txt"));
        assert!(!store.contains("deadbeef").unwrap());
    }

    #[test]
    fn record_then_contains() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::new(dir.path().join("processed_files.txt"));

        store
            .record("abc123", Outcome::Success, "podcast.mp3")
            .unwrap();

        assert!(store.contains("abc123").unwrap());
        assert!(!store.contains("abc124").unwrap());
    }

    #[test]
    fn record_line_format() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::new(dir.path().join("processed_files.txt"));
        store.record("abc123", Outcome::Failed, "bad.mp3").unwrap();

        let contents = fs::read_to_string(store.path()).unwrap();
        let line = contents.lines().next().unwrap();
        let fields: Vec<&str> = line.split('|').collect();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[0], "abc123");
        assert_eq!(fields[2], "FAILED");
        assert_eq!(fields[3], "bad.mp3");
        // Timestamp shaped like 2026-08-02_151233.
        assert_eq!(fields[1].len(), 17);
        assert_eq!(&fields[1][4..5], "-");
        assert_eq!(&fields[1][10..11], "_");
    }

    #[test]
    fn records_append_in_commit_order() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::new(dir.path().join("processed_files.txt"));
        store.record("first", Outcome::Success, "a.mp3").unwrap();
        store.record("second", Outcome::Failed, "b.mp3").unwrap();
        store.record("third", Outcome::Success, "c.mp3").unwrap();

        let contents = fs::read_to_string(store.path()).unwrap();
        let fingerprints: Vec<&str> = contents
            .lines()
            .map(|l| l.split('|').next().unwrap())
            .collect();
        assert_eq!(fingerprints, vec!["first", "second", "third"]);
    }

    #[test]
    fn contains_matches_whole_fingerprint_field() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::new(dir.path().join("processed_files.txt"));
        store
            .record("abcdef123456", Outcome::Success, "x.mp3")
            .unwrap();

        // Prefixes of a recorded fingerprint must not match.
        assert!(!store.contains("abcdef").unwrap());
        assert!(store.contains("abcdef123456").unwrap());
    }

    #[test]
    fn fingerprint_is_stable_and_content_derived() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.mp3");
        let b = dir.path().join("b.mp3");
        fs::write(&a, b"identical bytes").unwrap();
        fs::write(&b, b"identical bytes").unwrap();

        let fa = fingerprint_file(&a).unwrap();
        let fb = fingerprint_file(&b).unwrap();
        assert_eq!(fa, fb, "same content, same fingerprint");
        assert_eq!(fa.len(), 64);
        assert!(fa.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        fs::write(&b, b"different bytes").unwrap();
        assert_ne!(fa, fingerprint_file(&b).unwrap());
    }
}
