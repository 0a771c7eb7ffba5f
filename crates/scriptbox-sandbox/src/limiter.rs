//! Resource limiter: applies and queries CPU-time and memory ceilings.
//!
//! `apply` is meant for a disposable child process: the limits it sets are
//! inherited by nothing else and cannot be raised again by the script.
//! The query functions back the in-process meter and the subprocess
//! supervisor.

use std::time::Duration;
use thiserror::Error;

/// Resource limiting (or accounting) is not available on this platform.
#[derive(Debug, Clone, Error)]
#[error("resource limiter unavailable: {0}")]
pub struct LimiterUnavailable(pub String);

/// Snapshot of the calling process's resource usage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Usage {
    pub memory_mb: f64,
    pub cpu_seconds: f64,
}

const MB: u64 = 1024 * 1024;

/// Sets `RLIMIT_AS` to `memory_mb` above the current address-space size and
/// `RLIMIT_CPU` to `cpu_secs` (hard limit one second later, so the soft
/// limit delivers `SIGXCPU` first).
#[cfg(unix)]
pub fn apply(memory_mb: u64, cpu_secs: u64) -> Result<(), LimiterUnavailable> {
    use nix::sys::resource::{setrlimit, Resource};

    let cpu_soft = cpu_secs.max(1);
    setrlimit(Resource::RLIMIT_CPU, cpu_soft, cpu_soft + 1)
        .map_err(|e| LimiterUnavailable(format!("RLIMIT_CPU: {}", e)))?;

    // The address space already mapped (code, heap, thread stacks) counts
    // against RLIMIT_AS, so the ceiling is relative to it.
    if let Some(baseline) = address_space_bytes() {
        let limit = baseline.saturating_add(memory_mb.saturating_mul(MB));
        setrlimit(Resource::RLIMIT_AS, limit, limit)
            .map_err(|e| LimiterUnavailable(format!("RLIMIT_AS: {}", e)))?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn apply(_memory_mb: u64, _cpu_secs: u64) -> Result<(), LimiterUnavailable> {
    Err(LimiterUnavailable(
        "OS resource limits require a Unix platform".to_string(),
    ))
}

/// Current memory (RSS) and CPU (user + system) usage of this process.
#[cfg(unix)]
pub fn current_usage() -> Result<Usage, LimiterUnavailable> {
    use nix::sys::resource::{getrusage, UsageWho};

    let usage = getrusage(UsageWho::RUSAGE_SELF)
        .map_err(|e| LimiterUnavailable(format!("getrusage: {}", e)))?;
    let (user, system) = (usage.user_time(), usage.system_time());
    let cpu = timeval_secs(user.tv_sec() as i64, user.tv_usec() as i64)
        + timeval_secs(system.tv_sec() as i64, system.tv_usec() as i64);

    let memory_bytes = match crate::common::get_process_memory(std::process::id()) {
        Some(bytes) => bytes,
        // Degraded: peak RSS instead of current RSS.
        None => peak_rss_bytes(usage.max_rss()),
    };
    Ok(Usage {
        memory_mb: memory_bytes as f64 / MB as f64,
        cpu_seconds: cpu,
    })
}

#[cfg(not(unix))]
pub fn current_usage() -> Result<Usage, LimiterUnavailable> {
    Err(LimiterUnavailable(
        "resource accounting requires a Unix platform".to_string(),
    ))
}

#[cfg(unix)]
fn timeval_secs(secs: i64, micros: i64) -> f64 {
    secs as f64 + micros as f64 / 1_000_000.0
}

#[cfg(unix)]
fn peak_rss_bytes(max_rss: libc::c_long) -> u64 {
    let max_rss = max_rss.max(0) as u64;
    // macOS reports bytes, Linux kilobytes.
    if cfg!(target_os = "macos") {
        max_rss
    } else {
        max_rss * 1024
    }
}

/// Whether the in-process meter can observe memory and CPU usage here.
pub fn accounting_available() -> bool {
    resident_bytes().is_some() && thread_cpu_time().is_some()
}

/// Current resident set size of this process.
pub fn resident_bytes() -> Option<u64> {
    crate::common::get_process_memory(std::process::id())
}

/// CPU time consumed by the calling thread.
#[cfg(unix)]
pub fn thread_cpu_time() -> Option<Duration> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_THREAD_CPUTIME_ID, &mut ts) };
    if rc != 0 {
        return None;
    }
    Some(Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32))
}

#[cfg(not(unix))]
pub fn thread_cpu_time() -> Option<Duration> {
    None
}

/// Size of this process's mapped address space (`VmSize`).
#[cfg(target_os = "linux")]
pub fn address_space_bytes() -> Option<u64> {
    crate::common::read_status_field(std::process::id(), "VmSize:")
}

#[cfg(not(target_os = "linux"))]
pub fn address_space_bytes() -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_os = "linux")]
    #[test]
    fn test_accounting_available_on_linux() {
        assert!(accounting_available());
        let usage = current_usage().unwrap();
        assert!(usage.memory_mb > 0.0);
        assert!(usage.cpu_seconds >= 0.0);
    }

    #[cfg(unix)]
    #[test]
    fn test_thread_cpu_time_advances() {
        let before = thread_cpu_time().unwrap();
        let mut acc = 0u64;
        for i in 0..5_000_000u64 {
            acc = acc.wrapping_mul(31).wrapping_add(i);
        }
        std::hint::black_box(acc);
        let after = thread_cpu_time().unwrap();
        assert!(after >= before);
    }

    #[cfg(not(unix))]
    #[test]
    fn test_apply_unavailable_off_unix() {
        assert!(apply(64, 1).is_err());
    }
}
