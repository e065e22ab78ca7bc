//! Named lock files: single-writer mutual exclusion across processes.
//!
//! A lock is a file whose content is the owning PID. Staleness is decided
//! by two facts together: the stored PID no longer refers to a live
//! process, AND the file's modification age exceeds the per-lock timeout.
//! A dead owner with a fresh file is treated as a freshly-finished peer
//! and left alone; callers retry later.

use crate::defaults;
use crate::error::Result;
use crate::sys;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Outcome of an acquire attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// No lock existed; we now hold it.
    Acquired,
    /// A stale lock was reclaimed; we now hold it.
    AcquiredStale,
    /// A peer holds the lock (or just released it); try again later.
    Held,
}

/// A named lock rooted in a lock directory.
///
/// Ownership is process-local: only the instance that acquired the lock
/// will remove the file, so a crashing child can never delete its
/// parent's lock. The lock is released on drop if still held.
#[derive(Debug)]
pub struct NamedLock {
    name: String,
    path: PathBuf,
    timeout: Duration,
    acquired: bool,
}

impl NamedLock {
    /// Lock named `name` under `dir`, with the timeout the lock table
    /// assigns to that name.
    pub fn new(dir: &Path, name: &str) -> Self {
        Self::with_timeout(
            dir,
            name,
            Duration::from_secs(defaults::lock_timeout_secs(name)),
        )
    }

    /// Lock with an explicit staleness timeout.
    pub fn with_timeout(dir: &Path, name: &str, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            path: dir.join(format!("{name}.lock")),
            timeout,
            acquired: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    /// Attempt to take the lock.
    pub fn acquire(&mut self) -> Result<LockState> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        if self.try_create()? {
            self.acquired = true;
            return Ok(LockState::Acquired);
        }

        // Lock file exists. A live owner always wins.
        if let Some(pid) = read_owner(&self.path)
            && sys::pid_alive(pid)
        {
            return Ok(LockState::Held);
        }

        // Owner dead or unreadable: only reclaim past the staleness
        // timeout. An unknowable age counts as stale (last-resort cleanup).
        let stale = match lock_age(&self.path) {
            Some(age) => age > self.timeout,
            None => true,
        };
        if !stale {
            return Ok(LockState::Held);
        }

        tracing::warn!(
            lock = %self.name,
            path = %self.path.display(),
            "reclaiming stale lock"
        );
        let _ = fs::remove_file(&self.path);
        if self.try_create()? {
            self.acquired = true;
            Ok(LockState::AcquiredStale)
        } else {
            // A peer re-created it between our remove and create.
            Ok(LockState::Held)
        }
    }

    /// Release the lock, only if this instance acquired it. Releases from
    /// non-owners are silent no-ops.
    pub fn release(&mut self) {
        if !self.acquired {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.name, "failed to remove lock file: {e}");
        }
        self.acquired = false;
    }

    fn try_create(&self) -> Result<bool> {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                write!(file, "{}", sys::current_pid())?;
                file.sync_all()?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for NamedLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// PID stored in a lock file, if it parses.
pub fn read_owner(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Remove a lock file only if its stored PID matches `pid`.
///
/// Used by a parent after KILLing a child: the child died before its own
/// cleanup could run, but a newly-started peer may already have taken the
/// lock, so an unconditional remove would break exclusion.
pub fn remove_if_owned_by(path: &Path, pid: u32) -> bool {
    match read_owner(path) {
        Some(owner) if owner == pid => fs::remove_file(path).is_ok(),
        _ => false,
    }
}

fn lock_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    std::time::SystemTime::now().duration_since(modified).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// A PID that is certainly not alive: PID max on Linux is < 2^22.
    const DEAD_PID: u32 = 0x7FFF_FFFF;

    #[test]
    fn acquire_then_release() {
        let dir = TempDir::new().unwrap();
        let mut lock = NamedLock::new(dir.path(), "queue-engine");

        assert_eq!(lock.acquire().unwrap(), LockState::Acquired);
        assert!(lock.is_acquired());
        assert!(lock.path().exists());

        lock.release();
        assert!(!lock.is_acquired());
        assert!(!lock.path().exists());
    }

    #[test]
    fn lock_file_contains_our_pid() {
        let dir = TempDir::new().unwrap();
        let mut lock = NamedLock::new(dir.path(), "harvester");
        lock.acquire().unwrap();
        assert_eq!(read_owner(lock.path()), Some(sys::current_pid()));
    }

    #[test]
    fn second_acquire_sees_held() {
        let dir = TempDir::new().unwrap();
        let mut first = NamedLock::new(dir.path(), "audio-processing");
        let mut second = NamedLock::new(dir.path(), "audio-processing");

        assert_eq!(first.acquire().unwrap(), LockState::Acquired);
        // The stored PID (ours) is alive, so the peer must back off.
        assert_eq!(second.acquire().unwrap(), LockState::Held);
        assert!(!second.is_acquired());
    }

    #[test]
    fn dead_owner_fresh_file_is_held() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audio-processing.lock");
        fs::write(&path, DEAD_PID.to_string()).unwrap();

        // Default timeout for this name is 7200s; the file is brand new.
        let mut lock = NamedLock::new(dir.path(), "audio-processing");
        assert_eq!(lock.acquire().unwrap(), LockState::Held);
        assert!(path.exists());
    }

    #[test]
    fn dead_owner_old_file_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("downloader.lock");
        fs::write(&path, DEAD_PID.to_string()).unwrap();

        // Zero timeout: any age qualifies as stale.
        let mut lock = NamedLock::with_timeout(dir.path(), "downloader", Duration::ZERO);
        assert_eq!(lock.acquire().unwrap(), LockState::AcquiredStale);
        assert_eq!(read_owner(&path), Some(sys::current_pid()));
    }

    #[test]
    fn garbage_content_counts_as_dead_owner() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("downloader.lock");
        fs::write(&path, "not a pid").unwrap();

        let mut lock = NamedLock::with_timeout(dir.path(), "downloader", Duration::ZERO);
        assert_eq!(lock.acquire().unwrap(), LockState::AcquiredStale);
    }

    #[test]
    fn release_without_acquire_is_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("harvester.lock");
        fs::write(&path, DEAD_PID.to_string()).unwrap();

        let mut lock = NamedLock::new(dir.path(), "harvester");
        lock.release();
        assert!(path.exists(), "non-owner release must not delete the file");
    }

    #[test]
    fn release_twice_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut lock = NamedLock::new(dir.path(), "harvester");
        lock.acquire().unwrap();
        lock.release();
        lock.release();
        assert!(!lock.path().exists());
    }

    #[test]
    fn drop_releases_held_lock() {
        let dir = TempDir::new().unwrap();
        let path;
        {
            let mut lock = NamedLock::new(dir.path(), "queue-engine");
            lock.acquire().unwrap();
            path = lock.path().to_path_buf();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn remove_if_owned_by_matches_pid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audio-processing.lock");
        fs::write(&path, "4242").unwrap();

        assert!(!remove_if_owned_by(&path, 9999));
        assert!(path.exists());

        assert!(remove_if_owned_by(&path, 4242));
        assert!(!path.exists());
    }

    #[test]
    fn remove_if_owned_by_missing_file_is_false() {
        let dir = TempDir::new().unwrap();
        assert!(!remove_if_owned_by(&dir.path().join("gone.lock"), 1));
    }
}
