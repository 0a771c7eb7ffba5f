//! Common utilities for the isolation strategies
//!
//! Shared constants, process memory probes and the supervision loop used by
//! the subprocess strategy.

use std::time::Duration;

// ============================================================
// Resource Limits Constants (Single Source of Truth)
// ============================================================

/// Default maximum memory limit in MB
pub const DEFAULT_MAX_MEMORY_MB: u64 = scriptbox_core::config::schema::DEFAULT_MAX_MEMORY_MB;

/// Default execution timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = scriptbox_core::config::schema::DEFAULT_TIMEOUT_SECS;

/// Default CPU-time limit in seconds
pub const DEFAULT_MAX_CPU_SECS: u64 = scriptbox_core::config::schema::DEFAULT_MAX_CPU_SECS;

/// Memory check interval in milliseconds
pub const MEMORY_CHECK_INTERVAL_MS: u64 = 100;

/// Child exit-status poll interval in milliseconds
pub const EXIT_POLL_INTERVAL_MS: u64 = 5;

/// Time a child gets to exit after SIGTERM before it is killed
pub const TERMINATION_GRACE: Duration = Duration::from_millis(500);

/// Upper bound on the size of a child's report
pub const MAX_REPORT_BYTES: u64 = 64 * 1024 * 1024;

/// Get memory usage of a process in bytes (platform-specific implementation)
/// Returns None if memory information cannot be retrieved
#[cfg(target_os = "macos")]
pub fn get_process_memory(pid: u32) -> Option<u64> {
    use std::process::Command;

    let output = Command::new("ps")
        .args(["-o", "rss=", "-p", &pid.to_string()])
        .output()
        .ok()?;

    if output.status.success() {
        let rss_str = String::from_utf8_lossy(&output.stdout);
        // ps returns RSS in KB, convert to bytes
        if let Ok(rss_kb) = rss_str.trim().parse::<u64>() {
            return Some(rss_kb * 1024);
        }
    }

    None
}

/// Get memory usage of a process in bytes (Linux version)
/// Uses /proc/<pid>/status to read VmRSS
#[cfg(target_os = "linux")]
pub fn get_process_memory(pid: u32) -> Option<u64> {
    read_status_field(pid, "VmRSS:")
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn get_process_memory(_pid: u32) -> Option<u64> {
    None
}

/// Reads a `kB` field such as `VmRSS:` from `/proc/<pid>/status`, in bytes.
#[cfg(target_os = "linux")]
pub fn read_status_field(pid: u32, field: &str) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;

    for line in status.lines() {
        if line.starts_with(field) {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 2 {
                if let Ok(kb) = parts[1].parse::<u64>() {
                    return Some(kb * 1024);
                }
            }
            break;
        }
    }

    None
}

/// How a supervised child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    Exited(i32),
    Signaled(i32),
    /// The status could not be collected.
    Unknown,
}

/// Why the supervisor killed the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    Timeout,
    Memory,
}

#[derive(Debug)]
pub struct ChildExit {
    pub status: ChildStatus,
    pub report: Vec<u8>,
    pub killed: Option<KillReason>,
    pub elapsed: Duration,
}

/// Wait for a forked child with timeout and memory monitoring
///
/// - Timeout: SIGTERM, then SIGKILL if the child outlives the grace period
/// - Memory limit: SIGKILL once the child's RSS exceeds `memory_limit_bytes`
///
/// The report pipe is drained on a background thread while the child runs;
/// otherwise a report larger than the pipe buffer would block the child and
/// we'd deadlock waiting for it to exit. The child is always reaped.
#[cfg(unix)]
pub fn wait_with_timeout(
    pid: nix::unistd::Pid,
    report: std::fs::File,
    timeout: Duration,
    memory_limit_bytes: u64,
) -> ChildExit {
    use nix::sys::signal::{kill, Signal};
    use std::io::Read;
    use std::thread;
    use std::time::Instant;

    let start = Instant::now();
    let poll = Duration::from_millis(EXIT_POLL_INTERVAL_MS);
    let memory_interval = Duration::from_millis(MEMORY_CHECK_INTERVAL_MS);

    let reader = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = report.take(MAX_REPORT_BYTES).read_to_end(&mut buf);
        buf
    });

    let mut killed = None;
    let mut last_memory_check = Instant::now();
    let status = loop {
        if let Some(status) = try_reap(pid) {
            break status;
        }

        if start.elapsed() >= timeout {
            tracing::debug!("child {} timed out, sending SIGTERM", pid);
            killed = Some(KillReason::Timeout);
            let _ = kill(pid, Signal::SIGTERM);
            break terminate(pid);
        }

        if last_memory_check.elapsed() >= memory_interval {
            last_memory_check = Instant::now();
            if let Some(rss) = get_process_memory(pid.as_raw() as u32) {
                if rss > memory_limit_bytes {
                    tracing::debug!(
                        "child {} RSS {} MB over limit {} MB, killing",
                        pid,
                        rss / (1024 * 1024),
                        memory_limit_bytes / (1024 * 1024)
                    );
                    killed = Some(KillReason::Memory);
                    let _ = kill(pid, Signal::SIGKILL);
                    break reap_blocking(pid);
                }
            }
        }

        thread::sleep(poll);
    };

    let report = reader.join().unwrap_or_default();
    ChildExit {
        status,
        report,
        killed,
        elapsed: start.elapsed(),
    }
}

#[cfg(unix)]
fn convert(status: nix::sys::wait::WaitStatus) -> Option<ChildStatus> {
    use nix::sys::wait::WaitStatus;
    match status {
        WaitStatus::Exited(_, code) => Some(ChildStatus::Exited(code)),
        WaitStatus::Signaled(_, signal, _) => Some(ChildStatus::Signaled(signal as i32)),
        _ => None,
    }
}

/// Non-blocking reap; `None` while the child is still running.
#[cfg(unix)]
fn try_reap(pid: nix::unistd::Pid) -> Option<ChildStatus> {
    use nix::sys::wait::{waitpid, WaitPidFlag};
    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(status) => convert(status),
        // ECHILD: already reaped or not ours; nothing left to wait for.
        Err(_) => Some(ChildStatus::Unknown),
    }
}

#[cfg(unix)]
fn reap_blocking(pid: nix::unistd::Pid) -> ChildStatus {
    use nix::sys::wait::waitpid;
    loop {
        match waitpid(pid, None) {
            Ok(status) => {
                if let Some(status) = convert(status) {
                    return status;
                }
            }
            Err(nix::errno::Errno::EINTR) => continue,
            Err(_) => return ChildStatus::Unknown,
        }
    }
}

/// Waits out the grace period after SIGTERM, then SIGKILLs.
#[cfg(unix)]
fn terminate(pid: nix::unistd::Pid) -> ChildStatus {
    use nix::sys::signal::{kill, Signal};
    use std::time::Instant;

    let deadline = Instant::now() + TERMINATION_GRACE;
    while Instant::now() < deadline {
        if let Some(status) = try_reap(pid) {
            return status;
        }
        std::thread::sleep(Duration::from_millis(EXIT_POLL_INTERVAL_MS));
    }
    tracing::debug!("child {} ignored SIGTERM, sending SIGKILL", pid);
    let _ = kill(pid, Signal::SIGKILL);
    reap_blocking(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_check_interval() {
        assert!(MEMORY_CHECK_INTERVAL_MS >= EXIT_POLL_INTERVAL_MS);
        assert!(TERMINATION_GRACE < Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    #[test]
    fn test_get_process_memory_self() {
        let rss = get_process_memory(std::process::id()).unwrap();
        assert!(rss > 0);
    }
}
