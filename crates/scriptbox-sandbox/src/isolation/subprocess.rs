//! Subprocess strategy: evaluate in a forked child under OS resource limits.
//!
//! The child closes everything it inherited except the report pipe, applies
//! RLIMIT_AS / RLIMIT_CPU, evaluates, writes one JSON [`ChildReport`] and
//! `_exit`s. The parent supervises with [`wait_with_timeout`] and maps the
//! exit status onto an outcome. The child never logs.

use std::fs::File;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::panic::{self, AssertUnwindSafe};

use nix::unistd::{fork, ForkResult};

use super::{ChildReport, IsolationError, RunOutput};
use crate::common::{wait_with_timeout, ChildExit, ChildStatus, KillReason};
use crate::env::Environment;
use crate::limiter;
use crate::outcome::{ExecutionOutcome, ResourceKind};
use crate::runner::ResourceLimits;
use crate::script::{self, ErrorKind, Meter, Stmt};

/// Fallback upper bound when the descriptor table cannot be listed.
const MAX_FD_SCAN: RawFd = 65_536;

/// Exit code of a child whose report could not be written.
const REPORT_FAILED: i32 = 3;

pub fn execute(
    program: &[Stmt],
    env: &Environment,
    limits: &ResourceLimits,
) -> Result<RunOutput, IsolationError> {
    let (read_end, write_end) =
        nix::unistd::pipe().map_err(|e| IsolationError::Pipe(e.to_string()))?;

    // The child starts as a copy of us; its RSS budget sits on top of ours.
    let baseline = limiter::resident_bytes().unwrap_or(0);
    let memory_limit_bytes = baseline.saturating_add(limits.memory_bytes());

    // SAFETY: the child only evaluates the already-parsed program, writes to
    // its own pipe and leaves through `_exit`; it never returns into the
    // caller's stack.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            drop(read_end);
            let code = panic::catch_unwind(AssertUnwindSafe(|| {
                child_main(program, env, limits, write_end)
            }))
            .unwrap_or(REPORT_FAILED);
            // SAFETY: terminating the forked child without running the
            // parent's atexit handlers or destructors.
            unsafe { libc::_exit(code) }
        }
        Ok(ForkResult::Parent { child }) => {
            drop(write_end);
            tracing::debug!(pid = %child, "Forked sandbox child");
            let exit = wait_with_timeout(
                child,
                File::from(read_end),
                limits.timeout(),
                memory_limit_bytes,
            );
            Ok(map_exit(exit, limits))
        }
        Err(e) => Err(IsolationError::Fork(e.to_string())),
    }
}

fn child_main(
    program: &[Stmt],
    env: &Environment,
    limits: &ResourceLimits,
    report: OwnedFd,
) -> i32 {
    let _silenced =
        tracing::subscriber::set_default(tracing::subscriber::NoSubscriber::default());
    close_inherited_fds(report.as_raw_fd());

    let message = match limiter::apply(limits.memory_mb, limits.cpu_secs) {
        Ok(()) => {
            let meter = Meter::new(limits.memory_mb, limits.cpu_secs);
            ChildReport::from_evaluation(script::evaluate(program, env, meter))
        }
        Err(e) => ChildReport::Failed {
            kind: ErrorKind::Sandbox,
            message: e.to_string(),
        },
    };

    let mut file = File::from(report);
    match serde_json::to_writer(&mut file, &message) {
        Ok(()) => 0,
        Err(_) => REPORT_FAILED,
    }
}

/// Point stdio at /dev/null and close every other descriptor but `keep`.
fn close_inherited_fds(keep: RawFd) {
    // SAFETY: plain descriptor syscalls on our own table.
    unsafe {
        let null = libc::open(c"/dev/null".as_ptr(), libc::O_RDWR);
        if null >= 0 {
            for fd in (0..3).filter(|fd| *fd != keep) {
                libc::dup2(null, fd);
            }
            if null > 2 && null != keep {
                libc::close(null);
            }
        }
    }
    for fd in open_fds() {
        if fd > 2 && fd != keep {
            // SAFETY: closing a descriptor we own; EBADF is harmless.
            unsafe {
                libc::close(fd);
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn open_fds() -> Vec<RawFd> {
    match std::fs::read_dir("/proc/self/fd") {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse().ok()))
            .collect(),
        Err(_) => (0..scan_limit()).collect(),
    }
}

#[cfg(not(target_os = "linux"))]
fn open_fds() -> Vec<RawFd> {
    (0..scan_limit()).collect()
}

fn scan_limit() -> RawFd {
    // SAFETY: sysconf has no preconditions.
    let max = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
    if max <= 0 {
        1024
    } else {
        RawFd::try_from(max).unwrap_or(MAX_FD_SCAN).min(MAX_FD_SCAN)
    }
}

fn map_exit(exit: ChildExit, limits: &ResourceLimits) -> RunOutput {
    match exit.killed {
        Some(KillReason::Timeout) => {
            return RunOutput::without_output(ExecutionOutcome::TimedOut {
                seconds: limits.timeout_secs,
            })
        }
        Some(KillReason::Memory) => return memory_exceeded(limits),
        None => {}
    }

    match exit.status {
        ChildStatus::Exited(0) => match serde_json::from_slice::<ChildReport>(&exit.report) {
            Ok(report) => report.into_output(),
            Err(e) => {
                tracing::warn!(error = %e, bytes = exit.report.len(), "Unreadable child report");
                RunOutput::without_output(ExecutionOutcome::sandbox_failure(
                    "sandbox child produced no usable report",
                ))
            }
        },
        ChildStatus::Signaled(sig) if sig == libc::SIGXCPU => {
            RunOutput::without_output(ExecutionOutcome::ResourceExceeded {
                kind: ResourceKind::Cpu,
                limit: limits.cpu_secs,
            })
        }
        ChildStatus::Signaled(sig) if sig == libc::SIGABRT || sig == libc::SIGKILL => {
            memory_exceeded(limits)
        }
        ChildStatus::Signaled(sig) => RunOutput::without_output(ExecutionOutcome::sandbox_failure(
            format!("sandbox child terminated by signal {}", sig),
        )),
        ChildStatus::Exited(code) => RunOutput::without_output(ExecutionOutcome::sandbox_failure(
            format!("sandbox child exited with status {}", code),
        )),
        ChildStatus::Unknown => RunOutput::without_output(ExecutionOutcome::sandbox_failure(
            "sandbox child status unavailable",
        )),
    }
}

fn memory_exceeded(limits: &ResourceLimits) -> RunOutput {
    RunOutput::without_output(ExecutionOutcome::ResourceExceeded {
        kind: ResourceKind::Memory,
        limit: limits.memory_mb,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityBindings;
    use crate::env::build_environment;
    use crate::isolation::in_process;
    use crate::value::Value;
    use std::time::{Duration, Instant};

    fn limits(timeout_secs: u64) -> ResourceLimits {
        ResourceLimits {
            timeout_secs,
            memory_mb: 256,
            cpu_secs: 30,
        }
    }

    fn run(source: &str, limits: &ResourceLimits) -> RunOutput {
        let program = script::parse(source).unwrap();
        let env = build_environment(CapabilityBindings::new());
        execute(&program, &env, limits).unwrap()
    }

    fn exit(status: ChildStatus, report: &[u8], killed: Option<KillReason>) -> ChildExit {
        ChildExit {
            status,
            report: report.to_vec(),
            killed,
            elapsed: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_exit_mapping() {
        let limits = limits(2);
        assert_eq!(
            map_exit(exit(ChildStatus::Signaled(libc::SIGXCPU), b"", None), &limits).outcome,
            ExecutionOutcome::ResourceExceeded {
                kind: ResourceKind::Cpu,
                limit: 30
            }
        );
        for sig in [libc::SIGABRT, libc::SIGKILL] {
            assert_eq!(
                map_exit(exit(ChildStatus::Signaled(sig), b"", None), &limits).outcome,
                ExecutionOutcome::ResourceExceeded {
                    kind: ResourceKind::Memory,
                    limit: 256
                }
            );
        }
        assert_eq!(
            map_exit(
                exit(ChildStatus::Signaled(libc::SIGKILL), b"", Some(KillReason::Timeout)),
                &limits
            )
            .outcome,
            ExecutionOutcome::TimedOut { seconds: 2 }
        );
        assert!(matches!(
            map_exit(exit(ChildStatus::Exited(0), b"{not json", None), &limits).outcome,
            ExecutionOutcome::RuntimeFailure {
                kind: ErrorKind::Sandbox,
                ..
            }
        ));
        assert!(matches!(
            map_exit(exit(ChildStatus::Exited(1), b"", None), &limits).outcome,
            ExecutionOutcome::RuntimeFailure {
                kind: ErrorKind::Sandbox,
                ..
            }
        ));
    }

    #[test]
    fn test_child_result_and_prints() {
        let output = run("print('hello')\nresult = sum([1, 2, 3])\nlabel = 'x'", &limits(10));
        assert_eq!(output.printed, "hello\n");
        match output.outcome {
            ExecutionOutcome::Success { value, bindings } => {
                assert_eq!(value, Some(Value::Int(6)));
                assert_eq!(bindings.get("label"), Some(&Value::Str("x".to_string())));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_child_runtime_failure() {
        let output = run("x = 1\ny = x / 0", &limits(10));
        assert_eq!(
            output.outcome,
            ExecutionOutcome::RuntimeFailure {
                kind: ErrorKind::ZeroDivision,
                message: "division by zero (line 2)".to_string()
            }
        );
    }

    #[test]
    fn test_infinite_loop_times_out_and_child_is_reaped() {
        let start = Instant::now();
        let output = run("while True:\n    pass", &limits(1));
        assert_eq!(output.outcome, ExecutionOutcome::TimedOut { seconds: 1 });
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_report_floats_are_exact() {
        let output = run("result = sum([0.1] * 10)", &limits(10));
        assert_eq!(output.outcome.value(), Some(&Value::Float(0.9999999999999999)));
    }

    #[test]
    fn test_gradual_growth_is_killed() {
        let limits = ResourceLimits {
            timeout_secs: 20,
            memory_mb: 64,
            cpu_secs: 30,
        };
        let output = run("x = []\nwhile True:\n    x.append('a' * 100000)", &limits);
        assert_eq!(
            output.outcome,
            ExecutionOutcome::ResourceExceeded {
                kind: ResourceKind::Memory,
                limit: 64
            }
        );
    }

    #[test]
    fn test_matches_in_process_results() {
        let sources = [
            "result = [x * x for x in range(5)]",
            "result = {'a': 1, 'b': [1.5, None, True]}",
            "result = ', '.join(sorted(['b', 'a', 'c']))",
            "total = 0\nfor i in range(100):\n    total += i\nresult = total",
            "result = int('x')",
            "result = 0.9999999999999999",
            "result = sum([0.1] * 10)",
            "result = [1 / 3, 2.0 / 3, 0.1 + 0.2]",
        ];
        let limits = limits(10);
        let env = build_environment(CapabilityBindings::new());
        for source in sources {
            let program = script::parse(source).unwrap();
            let forked = execute(&program, &env, &limits).unwrap();
            let local = loop {
                if let Some(slot) = in_process::try_acquire() {
                    break in_process::execute(&slot, &program, &env, &limits).unwrap();
                }
                std::thread::sleep(Duration::from_millis(5));
            };
            assert_eq!(forked, local, "diverged on {:?}", source);
        }
    }
}
