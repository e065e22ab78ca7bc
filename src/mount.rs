//! Remote-mount probe and idempotent mount management.
//!
//! "Mounted" is not enough: a network filesystem can stay listed in the
//! mount table long after its transport has died. A path is healthy only
//! when the kernel reports a mount there AND a directory listing returns
//! within a bounded time.

use crate::defaults;
use crate::error::{Result, StentorError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

/// True when `path` is a mount point AND a listing of it completes within
/// the probe deadline.
pub async fn is_mounted_and_responsive(path: &Path) -> bool {
    is_mount_point(path) && listing_responds(path).await
}

/// Whether the kernel's mount table lists `path` as a mount point.
pub fn is_mount_point(path: &Path) -> bool {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    match std::fs::read_to_string("/proc/mounts") {
        Ok(table) => mount_table_contains(&table, &canonical),
        Err(_) => false,
    }
}

/// Scan a /proc/mounts-format table for a mount point equal to `path`.
fn mount_table_contains(table: &str, path: &Path) -> bool {
    table.lines().any(|line| {
        line.split_whitespace()
            .nth(1)
            .map(|raw| PathBuf::from(unescape_mount_path(raw)) == path)
            .unwrap_or(false)
    })
}

/// Undo the octal escapes /proc/mounts applies to whitespace and friends
/// (`\040` for space, `\011` for tab, `\134` for backslash).
fn unescape_mount_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 4 <= bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            // The escape digits are ASCII, so this slice is valid UTF-8.
            let code = u8::from_str_radix(&raw[i + 1..i + 4], 8).unwrap_or(b'?');
            out.push(code);
            i += 4;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Whether a directory listing of `path` completes within the deadline.
///
/// The listing runs on a blocking thread; a hung network filesystem will
/// strand that thread, which is acceptable for a short-lived process.
async fn listing_responds(path: &Path) -> bool {
    let path = path.to_path_buf();
    let listing = tokio::task::spawn_blocking(move || {
        std::fs::read_dir(&path).map(|mut entries| entries.next().map(|e| e.map(|_| ())))
    });
    matches!(
        tokio::time::timeout(
            Duration::from_secs(defaults::MOUNT_LIST_TIMEOUT_SECS),
            listing
        )
        .await,
        Ok(Ok(Ok(_)))
    )
}

/// Idempotent mount management around the configured helper commands.
///
/// Remembers whether this process performed the mount, so teardown stays
/// symmetric: we never unmount a filesystem someone else set up.
#[derive(Debug)]
pub struct Mounter {
    mount_cmd: Option<String>,
    unmount_cmd: Option<String>,
    mounted_by_us: bool,
}

impl Mounter {
    pub fn new(mount_cmd: Option<String>, unmount_cmd: Option<String>) -> Self {
        Self {
            mount_cmd,
            unmount_cmd,
            mounted_by_us: false,
        }
    }

    pub fn mounted_by_us(&self) -> bool {
        self.mounted_by_us
    }

    /// Ensure `path` is mounted and responsive, mounting it if needed.
    pub async fn ensure(&mut self, path: &Path) -> Result<()> {
        if is_mounted_and_responsive(path).await {
            return Ok(());
        }

        // Clear any stale mount first; failure here is expected when
        // nothing was mounted.
        if let Some(cmd) = &self.unmount_cmd {
            let _ = run_helper(cmd).await;
        }

        let Some(cmd) = &self.mount_cmd else {
            return Err(StentorError::TransportLost {
                message: format!(
                    "{} is not mounted and no mount command is configured",
                    path.display()
                ),
            });
        };
        if !run_helper(cmd).await {
            return Err(StentorError::TransportLost {
                message: format!("mount command failed for {}", path.display()),
            });
        }
        if !is_mounted_and_responsive(path).await {
            return Err(StentorError::TransportLost {
                message: format!("{} still unresponsive after mount", path.display()),
            });
        }
        self.mounted_by_us = true;
        Ok(())
    }

    /// Unmount on the way out, only if this process performed the mount.
    /// Pauses briefly first so in-flight I/O can drain.
    pub async fn teardown(&mut self) {
        if !self.mounted_by_us {
            return;
        }
        if let Some(cmd) = &self.unmount_cmd {
            tokio::time::sleep(Duration::from_secs(defaults::UNMOUNT_SETTLE_SECS)).await;
            if run_helper(cmd).await {
                self.mounted_by_us = false;
            } else {
                tracing::warn!("unmount helper failed during teardown");
            }
        }
    }
}

/// Split a helper command line into program and arguments.
fn split_command(cmd: &str) -> Option<(&str, Vec<&str>)> {
    let mut parts = cmd.split_whitespace();
    let program = parts.next()?;
    Some((program, parts.collect()))
}

async fn run_helper(cmd: &str) -> bool {
    let Some((program, args)) = split_command(cmd) else {
        return false;
    };
    match Command::new(program).args(args).status().await {
        Ok(status) => status.success(),
        Err(e) => {
            tracing::warn!("helper '{cmd}' failed to start: {e}");
            false
        }
    }
}
