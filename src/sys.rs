//! Safe wrappers for platform-specific unsafe operations.
//!
//! Every `unsafe` block in the codebase lives here. Call sites use the safe
//! public API and never touch `unsafe` directly.

/// Return the effective user ID of the calling process.
///
/// # Safety
/// `getuid` is a read-only POSIX syscall with no preconditions.
pub fn current_uid() -> u32 {
    // SAFETY: getuid is a read-only POSIX syscall with no preconditions.
    unsafe { libc::getuid() }
}

/// Return the PID of the calling process.
pub fn current_pid() -> u32 {
    std::process::id()
}

/// Probe whether a process with the given PID exists.
///
/// Sends signal 0, which performs permission and existence checks without
/// delivering anything. EPERM still means the process exists.
///
/// # Safety
/// `kill` with signal 0 has no side effects on the target.
pub fn pid_alive(pid: u32) -> bool {
    let pid = match i32::try_from(pid) {
        Ok(p) if p > 0 => p,
        _ => return false,
    };
    // SAFETY: kill(pid, 0) only probes; it delivers no signal.
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Send SIGTERM to a process. Returns false if the signal could not be sent
/// (typically because the process is already gone).
pub fn terminate(pid: u32) -> bool {
    signal(pid, libc::SIGTERM)
}

/// Send SIGKILL to a process. Returns false if the signal could not be sent.
pub fn kill(pid: u32) -> bool {
    signal(pid, libc::SIGKILL)
}

fn signal(pid: u32, sig: i32) -> bool {
    let pid = match i32::try_from(pid) {
        Ok(p) if p > 0 => p,
        _ => return false,
    };
    // SAFETY: standard POSIX kill; the caller owns the decision to signal.
    unsafe { libc::kill(pid, sig) == 0 }
}
