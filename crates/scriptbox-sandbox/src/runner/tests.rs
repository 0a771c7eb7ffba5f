//! Tests for the execution host.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::*;
use crate::capability::Catalog;
use crate::outcome::ResourceKind;
use crate::script::ErrorKind;
use crate::value::Value;

fn limits(timeout_secs: u64, memory_mb: u64) -> ResourceLimits {
    ResourceLimits {
        timeout_secs,
        memory_mb,
        cpu_secs: 30,
    }
}

fn host(policy: IsolationPolicy) -> ExecutionHost {
    ExecutionHost::new(HostOptions {
        policy,
        hard_memory: false,
    })
}

fn request(source: &str) -> ExecutionRequest {
    ExecutionRequest::new(source, CapabilityBindings::new(), limits(10, 256)).unwrap()
}

fn submit_with(policy: IsolationPolicy, source: &str) -> ExecutionOutcome {
    host(policy).submit(request(source))
}

fn catalog_bindings() -> CapabilityBindings {
    let mut catalog = Catalog::new();
    catalog
        .add_json_str(
            "sales",
            r#"[{"region": "north", "amount": 120}, {"region": "south", "amount": 80},
                {"region": "north", "amount": 40}]"#,
        )
        .unwrap();
    CapabilityBindings::new()
        .with("pl", Arc::new(catalog))
        .unwrap()
}

fn policies() -> Vec<IsolationPolicy> {
    if isolation::subprocess_supported() {
        vec![IsolationPolicy::InProcess, IsolationPolicy::Subprocess]
    } else {
        vec![IsolationPolicy::InProcess]
    }
}

#[test]
fn test_zero_limits_are_rejected_at_construction() {
    for (limits, name) in [
        (limits(0, 256), "timeout"),
        (limits(10, 0), "memory"),
        (
            ResourceLimits {
                cpu_secs: 0,
                ..limits(10, 256)
            },
            "cpu",
        ),
    ] {
        let err = ExecutionRequest::new("x = 1", CapabilityBindings::new(), limits).unwrap_err();
        assert_eq!(err, RequestError::ZeroLimit(name));
    }
    assert_eq!(
        RequestError::ZeroLimit("memory").to_string(),
        "memory limit must be greater than zero"
    );
}

#[test]
fn test_cli_overrides() {
    let base = ResourceLimits::default();
    let limits = base.with_cli_overrides(Some(5), None, Some(2));
    assert_eq!(limits.timeout_secs, 5);
    assert_eq!(limits.memory_mb, base.memory_mb);
    assert_eq!(limits.cpu_secs, 2);
    assert_eq!(limits.memory_bytes(), base.memory_mb * 1024 * 1024);
}

#[test]
fn test_state_machine_edges() {
    use HostState::*;
    assert!(Idle.can_transition_to(Validating));
    assert!(Validating.can_transition_to(Rejected));
    assert!(Executing.can_transition_to(TimedOut));
    assert!(!Idle.can_transition_to(Executing));
    assert!(!Rejected.can_transition_to(Executing));
    assert!(!Validating.can_transition_to(Completed));
    for terminal in [Rejected, Completed, TimedOut, ResourceExceeded, RuntimeFailure] {
        assert!(terminal.is_terminal());
    }
    assert!(!Executing.is_terminal());
}

#[test]
fn test_success_returns_result_and_bindings() {
    for policy in policies() {
        let mut host = host(policy);
        let outcome = host.submit(request("values = [3, 1, 2]\nresult = sorted(values)"));
        let mut bindings = BTreeMap::new();
        bindings.insert(
            "values".to_string(),
            Value::List(vec![Value::Int(3), Value::Int(1), Value::Int(2)]),
        );
        assert_eq!(
            outcome,
            ExecutionOutcome::Success {
                value: Some(Value::List(vec![
                    Value::Int(1),
                    Value::Int(2),
                    Value::Int(3)
                ])),
                bindings,
            },
            "policy {}",
            policy
        );
        assert_eq!(host.state(), HostState::Completed);
    }
}

#[test]
fn test_unbound_result_is_success_without_value() {
    let outcome = submit_with(IsolationPolicy::InProcess, "x = 1");
    assert!(outcome.is_success());
    assert_eq!(outcome.value(), None);
}

#[test]
fn test_empty_source_is_a_no_op() {
    let outcome = submit_with(IsolationPolicy::InProcess, "  \n");
    assert_eq!(
        outcome,
        ExecutionOutcome::Success {
            value: None,
            bindings: BTreeMap::new()
        }
    );
}

#[test]
fn test_rejected_scripts_never_execute() {
    let mut host = host(IsolationPolicy::InProcess);
    let report = host.submit_detailed(request("import os\nresult = os.getcwd()"));
    assert_eq!(
        report.outcome,
        ExecutionOutcome::ValidationRejected {
            reason: "Import of 'os' is not allowed for security reasons".to_string()
        }
    );
    assert_eq!(report.strategy, None);
    assert_eq!(host.state(), HostState::Rejected);

    let outcome = host.submit(request("f = lambda: 1"));
    assert_eq!(
        outcome,
        ExecutionOutcome::ValidationRejected {
            reason: "Lambda is not allowed in sandboxed code".to_string()
        }
    );
}

#[test]
fn test_host_is_reusable_after_terminal_state() {
    let mut host = host(IsolationPolicy::InProcess);
    assert!(!host.submit(request("import sys")).is_success());
    assert!(host.submit(request("result = 1")).is_success());
    assert_eq!(host.state(), HostState::Completed);
}

#[test]
fn test_runtime_failure_is_categorised() {
    for policy in policies() {
        let outcome = submit_with(policy, "d = {'a': 1}\nresult = d['b']");
        assert_eq!(
            outcome,
            ExecutionOutcome::RuntimeFailure {
                kind: ErrorKind::Key,
                message: "'b' (line 2)".to_string()
            },
            "policy {}",
            policy
        );
    }
}

#[test]
fn test_infinite_loop_times_out() {
    for policy in policies() {
        let request =
            ExecutionRequest::new("while True:\n    pass", CapabilityBindings::new(), limits(1, 256))
                .unwrap();
        let mut host = host(policy);
        let report = host.submit_detailed(request);
        assert_eq!(report.outcome, ExecutionOutcome::TimedOut { seconds: 1 });
        assert_eq!(host.state(), HostState::TimedOut);
        assert!(report.duration_ms < 10_000);
    }
}

#[test]
fn test_timeout_cannot_be_caught_by_script() {
    let source = "
try:
    while True:
        pass
except Exception:
    result = 'caught'
finally:
    result = 'finally'
";
    let request =
        ExecutionRequest::new(source, CapabilityBindings::new(), limits(1, 256)).unwrap();
    let outcome = host(IsolationPolicy::InProcess).submit(request);
    assert_eq!(outcome, ExecutionOutcome::TimedOut { seconds: 1 });
}

#[test]
fn test_oversized_allocation_exceeds_memory() {
    for policy in policies() {
        let request =
            ExecutionRequest::new("x = 'a' * (10 ** 10)", CapabilityBindings::new(), limits(10, 64))
                .unwrap();
        let outcome = host(policy).submit(request);
        assert_eq!(
            outcome,
            ExecutionOutcome::ResourceExceeded {
                kind: ResourceKind::Memory,
                limit: 64
            },
            "policy {}",
            policy
        );
    }
}

#[test]
fn test_gradual_growth_exceeds_memory() {
    for policy in policies() {
        let outcome = host(policy).submit(
            ExecutionRequest::new(
                "x = []\nwhile True:\n    x.append('a' * 100000)",
                CapabilityBindings::new(),
                limits(20, 64),
            )
            .unwrap(),
        );
        assert_eq!(
            outcome,
            ExecutionOutcome::ResourceExceeded {
                kind: ResourceKind::Memory,
                limit: 64
            },
            "policy {}",
            policy
        );
    }
}

#[test]
fn test_capabilities_reach_the_script() {
    let source = "
import polars as pl
north = pl.filter_eq('sales', 'region', 'north')
result = {'rows': len(north), 'total': pl.sum('sales', 'amount')}
";
    for policy in policies() {
        let request = ExecutionRequest::new(source, catalog_bindings(), limits(10, 256)).unwrap();
        let outcome = host(policy).submit(request);
        let value = outcome.value().cloned();
        assert_eq!(
            value,
            Some(Value::Dict(vec![
                (Value::Str("rows".to_string()), Value::Int(2)),
                (Value::Str("total".to_string()), Value::Float(240.0)),
            ])),
            "policy {}",
            policy
        );
    }
}

#[test]
fn test_report_carries_prints_and_strategy() {
    let report = host(IsolationPolicy::InProcess).submit_detailed(request("print('a', 1)\nresult = 2"));
    assert_eq!(report.printed, "a 1\n");
    assert!(report.strategy.is_some());
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["outcome"], "success");
    assert_eq!(json["value"], serde_json::json!({"type": "int", "value": 2}));
    assert_eq!(json["printed"], "a 1\n");
    assert!(json["request_id"].as_str().is_some_and(|id| id.len() == 36));
}

#[test]
fn test_free_submit() {
    let outcome = submit("result = 6 * 7", CapabilityBindings::new(), 5, 128, 5).unwrap();
    assert_eq!(outcome.value(), Some(&Value::Int(42)));
    assert_eq!(
        submit("result = 1", CapabilityBindings::new(), 5, 0, 5).unwrap_err(),
        RequestError::ZeroLimit("memory")
    );
}

#[test]
fn test_check_user_input() {
    assert!(check_user_input("plot revenue by month").accepted);
    assert!(check_user_input("what is the average of column X").accepted);
    assert_eq!(
        check_user_input("call subprocess.call()").reason.as_deref(),
        Some("Input contains potentially dangerous pattern: 'subprocess.'")
    );
    let verdict = check_user_input("then call os.system('rm -rf /')");
    assert_eq!(
        verdict.reason.as_deref(),
        Some("Input contains potentially dangerous pattern: 'os.system'")
    );
}
