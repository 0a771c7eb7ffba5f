//! Isolation strategies: where and how a validated program runs.
//!
//! - `in_process`: on the calling thread under a deadline guard, single-flight
//! - `subprocess`: in a forked child under OS limits (Unix only)

pub mod deadline;
pub mod in_process;
#[cfg(unix)]
pub mod subprocess;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::limiter;
use crate::outcome::{ExecutionOutcome, ResourceKind};
use crate::runner::ResourceLimits;
use crate::script::{ErrorKind, EvalError, Evaluation, Halt, RuntimeError};
use crate::value::Value;

/// Caller preference for choosing a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationPolicy {
    #[default]
    Auto,
    InProcess,
    Subprocess,
}

impl IsolationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationPolicy::Auto => "auto",
            IsolationPolicy::InProcess => "in-process",
            IsolationPolicy::Subprocess => "subprocess",
        }
    }
}

impl fmt::Display for IsolationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown isolation policy '{0}' (expected auto, in-process or subprocess)")]
pub struct UnknownPolicy(pub String);

impl FromStr for IsolationPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(IsolationPolicy::Auto),
            "in-process" | "in_process" | "inprocess" => Ok(IsolationPolicy::InProcess),
            "subprocess" | "fork" => Ok(IsolationPolicy::Subprocess),
            _ => Err(UnknownPolicy(s.to_string())),
        }
    }
}

/// Strategy actually used for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    InProcess,
    Subprocess,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::InProcess => "in-process",
            Strategy::Subprocess => "subprocess",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether this platform can run the subprocess strategy.
pub fn subprocess_supported() -> bool {
    cfg!(unix)
}

/// Resolve `policy` to a strategy.
///
/// `Auto` picks the subprocess strategy when hard memory enforcement is
/// required or in-process accounting is unavailable. Without fork support
/// everything runs in-process.
pub fn select(policy: IsolationPolicy, hard_memory: bool) -> Strategy {
    if !subprocess_supported() {
        if policy == IsolationPolicy::Subprocess {
            tracing::warn!("Subprocess isolation unavailable on this platform, running in-process");
        }
        return Strategy::InProcess;
    }
    match policy {
        IsolationPolicy::InProcess => Strategy::InProcess,
        IsolationPolicy::Subprocess => Strategy::Subprocess,
        IsolationPolicy::Auto => {
            if hard_memory || !limiter::accounting_available() {
                Strategy::Subprocess
            } else {
                Strategy::InProcess
            }
        }
    }
}

/// What a strategy hands back to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    pub outcome: ExecutionOutcome,
    /// Captured `print` output; empty on timeouts and kills.
    pub printed: String,
}

impl RunOutput {
    pub(crate) fn without_output(outcome: ExecutionOutcome) -> Self {
        Self {
            outcome,
            printed: String::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum IsolationError {
    #[error("failed to create report pipe: {0}")]
    Pipe(String),
    #[error("failed to fork sandbox child: {0}")]
    Fork(String),
    #[error("subprocess isolation is not supported on this platform")]
    Unsupported,
    #[error("failed to start deadline watchdog: {0}")]
    Watchdog(#[from] std::io::Error),
}

/// Report a forked child writes to its pipe before exiting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChildReport {
    Completed {
        output: Option<Value>,
        bindings: BTreeMap<String, Value>,
        printed: String,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
    Exceeded {
        kind: ResourceKind,
        limit: u64,
    },
}

impl ChildReport {
    pub(crate) fn from_evaluation(result: Result<Evaluation, EvalError>) -> Self {
        match result {
            Ok(eval) => ChildReport::Completed {
                output: eval.output,
                bindings: eval.bindings,
                printed: eval.printed,
            },
            Err(EvalError::Runtime(e)) => ChildReport::Failed {
                kind: e.kind,
                message: failure_message(&e),
            },
            Err(EvalError::Halt(Halt::Memory { limit_mb })) => ChildReport::Exceeded {
                kind: ResourceKind::Memory,
                limit: limit_mb,
            },
            Err(EvalError::Halt(Halt::Cpu { limit_secs })) => ChildReport::Exceeded {
                kind: ResourceKind::Cpu,
                limit: limit_secs,
            },
            // The child runs without a cancel flag.
            Err(EvalError::Halt(Halt::Deadline)) => ChildReport::Failed {
                kind: ErrorKind::Sandbox,
                message: "child was cancelled".to_string(),
            },
        }
    }

    pub(crate) fn into_output(self) -> RunOutput {
        match self {
            ChildReport::Completed {
                output,
                bindings,
                printed,
            } => RunOutput {
                outcome: ExecutionOutcome::Success {
                    value: output,
                    bindings,
                },
                printed,
            },
            ChildReport::Failed { kind, message } => {
                RunOutput::without_output(ExecutionOutcome::RuntimeFailure { kind, message })
            }
            ChildReport::Exceeded { kind, limit } => {
                RunOutput::without_output(ExecutionOutcome::ResourceExceeded { kind, limit })
            }
        }
    }
}

/// Map an in-process evaluation result onto an outcome.
pub(crate) fn output_from_evaluation(
    result: Result<Evaluation, EvalError>,
    limits: &ResourceLimits,
) -> RunOutput {
    match result {
        Err(EvalError::Halt(Halt::Deadline)) => {
            RunOutput::without_output(ExecutionOutcome::TimedOut {
                seconds: limits.timeout_secs,
            })
        }
        other => ChildReport::from_evaluation(other).into_output(),
    }
}

/// Message of a runtime failure: the script-visible message plus the line.
pub(crate) fn failure_message(e: &RuntimeError) -> String {
    if e.line > 0 {
        format!("{} (line {})", e.message, e.line)
    } else {
        e.message.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parse() {
        assert_eq!("auto".parse::<IsolationPolicy>(), Ok(IsolationPolicy::Auto));
        assert_eq!(
            "In-Process".parse::<IsolationPolicy>(),
            Ok(IsolationPolicy::InProcess)
        );
        assert_eq!(
            "subprocess".parse::<IsolationPolicy>(),
            Ok(IsolationPolicy::Subprocess)
        );
        assert!("docker".parse::<IsolationPolicy>().is_err());
        for policy in [
            IsolationPolicy::Auto,
            IsolationPolicy::InProcess,
            IsolationPolicy::Subprocess,
        ] {
            assert_eq!(policy.as_str().parse::<IsolationPolicy>(), Ok(policy));
        }
    }

    #[test]
    fn test_explicit_policies_are_honoured() {
        assert_eq!(
            select(IsolationPolicy::InProcess, true),
            Strategy::InProcess
        );
        if subprocess_supported() {
            assert_eq!(
                select(IsolationPolicy::Subprocess, false),
                Strategy::Subprocess
            );
            assert_eq!(select(IsolationPolicy::Auto, true), Strategy::Subprocess);
        }
    }

    #[test]
    fn test_auto_follows_accounting() {
        let expected = if subprocess_supported() && !limiter::accounting_available() {
            Strategy::Subprocess
        } else {
            Strategy::InProcess
        };
        assert_eq!(select(IsolationPolicy::Auto, false), expected);
    }

    #[test]
    fn test_halt_mapping() {
        let limits = ResourceLimits {
            timeout_secs: 3,
            memory_mb: 64,
            cpu_secs: 5,
        };
        assert_eq!(
            output_from_evaluation(Err(EvalError::Halt(Halt::Deadline)), &limits).outcome,
            ExecutionOutcome::TimedOut { seconds: 3 }
        );
        assert_eq!(
            output_from_evaluation(
                Err(EvalError::Halt(Halt::Cpu { limit_secs: 5 })),
                &limits
            )
            .outcome,
            ExecutionOutcome::ResourceExceeded {
                kind: ResourceKind::Cpu,
                limit: 5
            }
        );
        let err = RuntimeError::new(ErrorKind::Key, "'x'").at_line(4);
        assert_eq!(
            output_from_evaluation(Err(EvalError::Runtime(err)), &limits).outcome,
            ExecutionOutcome::RuntimeFailure {
                kind: ErrorKind::Key,
                message: "'x' (line 4)".to_string()
            }
        );
    }

    #[test]
    fn test_child_report_wire_format() {
        let report = ChildReport::Completed {
            output: Some(Value::Float(f64::NAN)),
            bindings: BTreeMap::from([("n".to_string(), Value::Int(3))]),
            printed: "hi\n".to_string(),
        };
        let bytes = serde_json::to_vec(&report).unwrap();
        let back: ChildReport = serde_json::from_slice(&bytes).unwrap();
        match back.into_output() {
            RunOutput {
                outcome: ExecutionOutcome::Success { value, bindings },
                printed,
            } => {
                assert!(matches!(value, Some(Value::Float(f)) if f.is_nan()));
                assert_eq!(bindings.get("n"), Some(&Value::Int(3)));
                assert_eq!(printed, "hi\n");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
