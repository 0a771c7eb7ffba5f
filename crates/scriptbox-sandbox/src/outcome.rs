//! Terminal result of one execution request.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::script::ErrorKind;
use crate::value::Value;

/// Resource whose ceiling was hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Memory,
    Cpu,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Memory => "memory",
            ResourceKind::Cpu => "cpu",
        }
    }

    /// Unit of the matching limit.
    pub fn unit(&self) -> &'static str {
        match self {
            ResourceKind::Memory => "MB",
            ResourceKind::Cpu => "s",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exactly one of these is produced per request. No partial results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success {
        /// Value bound to `result`; `None` when the script never bound it.
        value: Option<Value>,
        /// Every other data-valued top-level name the script bound.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        bindings: BTreeMap<String, Value>,
    },
    ValidationRejected {
        reason: String,
    },
    TimedOut {
        seconds: u64,
    },
    ResourceExceeded {
        kind: ResourceKind,
        limit: u64,
    },
    RuntimeFailure {
        kind: ErrorKind,
        message: String,
    },
}

impl ExecutionOutcome {
    pub(crate) fn sandbox_failure(message: impl Into<String>) -> Self {
        ExecutionOutcome::RuntimeFailure {
            kind: ErrorKind::Sandbox,
            message: message.into(),
        }
    }

    /// Short label used in audit records.
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success { .. } => "success",
            ExecutionOutcome::ValidationRejected { .. } => "validation_rejected",
            ExecutionOutcome::TimedOut { .. } => "timed_out",
            ExecutionOutcome::ResourceExceeded { .. } => "resource_exceeded",
            ExecutionOutcome::RuntimeFailure { .. } => "runtime_failure",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    /// Timeouts and resource ceilings may succeed on retry with a simpler
    /// script or larger limits; rejections and runtime failures will not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExecutionOutcome::TimedOut { .. } | ExecutionOutcome::ResourceExceeded { .. }
        )
    }

    /// The `result` value of a successful run.
    pub fn value(&self) -> Option<&Value> {
        match self {
            ExecutionOutcome::Success { value, .. } => value.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionOutcome::Success { value: Some(v), .. } => write!(f, "success: {}", v),
            ExecutionOutcome::Success { value: None, .. } => f.write_str("success (no result)"),
            ExecutionOutcome::ValidationRejected { reason } => {
                write!(f, "validation rejected: {}", reason)
            }
            ExecutionOutcome::TimedOut { seconds } => {
                write!(f, "execution timed out after {} seconds", seconds)
            }
            ExecutionOutcome::ResourceExceeded { kind, limit } => {
                write!(f, "{} limit exceeded ({} {})", kind, limit, kind.unit())
            }
            ExecutionOutcome::RuntimeFailure { kind, message } => write!(f, "{}: {}", kind, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_json_shape() {
        let outcome = ExecutionOutcome::ResourceExceeded {
            kind: ResourceKind::Memory,
            limit: 64,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"outcome": "resource_exceeded", "kind": "memory", "limit": 64})
        );

        let failure = ExecutionOutcome::RuntimeFailure {
            kind: ErrorKind::ZeroDivision,
            message: "division by zero (line 2)".to_string(),
        };
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "ZeroDivisionError");
        let back: ExecutionOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, failure);
    }

    #[test]
    fn test_success_without_bindings_omits_field() {
        let outcome = ExecutionOutcome::Success {
            value: None,
            bindings: BTreeMap::new(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json, serde_json::json!({"outcome": "success", "value": null}));
    }

    #[test]
    fn test_transient_classification() {
        assert!(ExecutionOutcome::TimedOut { seconds: 1 }.is_transient());
        assert!(!ExecutionOutcome::ValidationRejected {
            reason: "x".to_string()
        }
        .is_transient());
        assert_eq!(
            ExecutionOutcome::ResourceExceeded {
                kind: ResourceKind::Cpu,
                limit: 2
            }
            .to_string(),
            "cpu limit exceeded (2 s)"
        );
    }
}
