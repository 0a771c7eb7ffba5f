//! Execution host: validate, build the environment, pick an isolation
//! strategy, run, and report exactly one outcome per request.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use thiserror::Error;

use scriptbox_core::config::SandboxDefaults;
use scriptbox_core::observability;

use crate::capability::CapabilityBindings;
use crate::common::{DEFAULT_MAX_CPU_SECS, DEFAULT_MAX_MEMORY_MB, DEFAULT_TIMEOUT_SECS};
use crate::env::build_environment;
use crate::isolation::{self, in_process, IsolationError, IsolationPolicy, RunOutput, Strategy};
use crate::outcome::ExecutionOutcome;
use crate::script::{self, Stmt};
use crate::security::{self, ValidationVerdict};

#[cfg(test)]
mod tests;

/// Resource limits for one execution
///
/// Default values are defined in `common.rs`:
/// - `timeout_secs`: DEFAULT_TIMEOUT_SECS (30 seconds)
/// - `memory_mb`: DEFAULT_MAX_MEMORY_MB (256 MB)
/// - `cpu_secs`: DEFAULT_MAX_CPU_SECS (30 seconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Wall-clock timeout in seconds
    pub timeout_secs: u64,
    /// Memory ceiling in MB
    pub memory_mb: u64,
    /// CPU-time ceiling in seconds
    pub cpu_secs: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            memory_mb: DEFAULT_MAX_MEMORY_MB,
            cpu_secs: DEFAULT_MAX_CPU_SECS,
        }
    }
}

impl ResourceLimits {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Get memory limit in bytes
    pub fn memory_bytes(&self) -> u64 {
        self.memory_mb.saturating_mul(1024 * 1024)
    }

    /// Load resource limits from environment variables
    pub fn from_env() -> Self {
        let defaults = SandboxDefaults::from_env();
        Self {
            timeout_secs: defaults.timeout_secs,
            memory_mb: defaults.max_memory_mb,
            cpu_secs: defaults.max_cpu_secs,
        }
    }

    /// Override with CLI parameters
    pub fn with_cli_overrides(
        mut self,
        cli_timeout: Option<u64>,
        cli_max_memory: Option<u64>,
        cli_max_cpu: Option<u64>,
    ) -> Self {
        if let Some(timeout) = cli_timeout {
            self.timeout_secs = timeout;
        }
        if let Some(max_memory) = cli_max_memory {
            self.memory_mb = max_memory;
        }
        if let Some(max_cpu) = cli_max_cpu {
            self.cpu_secs = max_cpu;
        }
        self
    }

    fn check(&self) -> Result<(), RequestError> {
        for (name, value) in [
            ("timeout", self.timeout_secs),
            ("memory", self.memory_mb),
            ("cpu", self.cpu_secs),
        ] {
            if value == 0 {
                return Err(RequestError::ZeroLimit(name));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("{0} limit must be greater than zero")]
    ZeroLimit(&'static str),
}

/// One script plus everything needed to run it. Consumed by the host.
#[derive(Debug)]
pub struct ExecutionRequest {
    source: String,
    bindings: CapabilityBindings,
    limits: ResourceLimits,
}

impl ExecutionRequest {
    pub fn new(
        source: impl Into<String>,
        bindings: CapabilityBindings,
        limits: ResourceLimits,
    ) -> Result<Self, RequestError> {
        limits.check()?;
        Ok(Self {
            source: source.into(),
            bindings,
            limits,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn bindings(&self) -> &CapabilityBindings {
        &self.bindings
    }
}

/// Host lifecycle. The right-hand states are terminal for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    Idle,
    Validating,
    Rejected,
    Validated,
    Executing,
    Completed,
    TimedOut,
    ResourceExceeded,
    RuntimeFailure,
}

impl HostState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HostState::Rejected
                | HostState::Completed
                | HostState::TimedOut
                | HostState::ResourceExceeded
                | HostState::RuntimeFailure
        )
    }

    pub fn can_transition_to(&self, next: HostState) -> bool {
        use HostState::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, Rejected)
                | (Validating, Validated)
                | (Validated, Executing)
                | (Executing, Completed)
                | (Executing, TimedOut)
                | (Executing, ResourceExceeded)
                | (Executing, RuntimeFailure)
        )
    }

    fn for_outcome(outcome: &ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Success { .. } => HostState::Completed,
            ExecutionOutcome::ValidationRejected { .. } => HostState::Rejected,
            ExecutionOutcome::TimedOut { .. } => HostState::TimedOut,
            ExecutionOutcome::ResourceExceeded { .. } => HostState::ResourceExceeded,
            ExecutionOutcome::RuntimeFailure { .. } => HostState::RuntimeFailure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal host transition {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: HostState,
    pub to: HostState,
}

/// How the host chooses an isolation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostOptions {
    pub policy: IsolationPolicy,
    /// Require OS-enforced memory limits.
    pub hard_memory: bool,
}

impl HostOptions {
    pub fn from_env() -> Self {
        let defaults = SandboxDefaults::from_env();
        let policy = defaults.isolation.parse().unwrap_or_else(|e| {
            tracing::warn!("{}, using auto", e);
            IsolationPolicy::Auto
        });
        Self {
            policy,
            hard_memory: defaults.hard_memory,
        }
    }
}

/// Everything the host knows about one finished request.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    #[serde(flatten)]
    pub outcome: ExecutionOutcome,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub printed: String,
    pub duration_ms: u64,
}

/// Runs one request at a time.
#[derive(Debug)]
pub struct ExecutionHost {
    options: HostOptions,
    state: HostState,
}

impl Default for ExecutionHost {
    fn default() -> Self {
        Self::new(HostOptions::default())
    }
}

impl ExecutionHost {
    pub fn new(options: HostOptions) -> Self {
        Self {
            options,
            state: HostState::Idle,
        }
    }

    pub fn from_env() -> Self {
        Self::new(HostOptions::from_env())
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn options(&self) -> &HostOptions {
        &self.options
    }

    /// Run `request` to a terminal outcome.
    pub fn submit(&mut self, request: ExecutionRequest) -> ExecutionOutcome {
        self.submit_detailed(request).outcome
    }

    /// Like [`ExecutionHost::submit`], also returning the strategy used,
    /// captured prints and timing.
    pub fn submit_detailed(&mut self, request: ExecutionRequest) -> ExecutionReport {
        let start = Instant::now();
        let request_id = uuid::Uuid::new_v4().to_string();
        let code_hash = hex::encode(Sha256::digest(request.source.as_bytes()));
        let (strategy, output) = match self.drive(request, &request_id, &code_hash) {
            Ok(done) => done,
            Err(e) => {
                tracing::error!(request_id = %request_id, "{}", e);
                (
                    None,
                    RunOutput::without_output(ExecutionOutcome::sandbox_failure(e.to_string())),
                )
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        if strategy.is_some() {
            observability::audit_execution_completed(&request_id, output.outcome.label(), duration_ms);
        }
        crate::info_log!(
            request_id = %request_id,
            outcome = output.outcome.label(),
            duration_ms,
            "Execution finished"
        );
        if !output.printed.is_empty() {
            tracing::debug!(request_id = %request_id, printed = %output.printed, "Script output");
        }

        ExecutionReport {
            request_id,
            strategy,
            outcome: output.outcome,
            printed: output.printed,
            duration_ms,
        }
    }

    fn drive(
        &mut self,
        request: ExecutionRequest,
        request_id: &str,
        code_hash: &str,
    ) -> Result<(Option<Strategy>, RunOutput), IllegalTransition> {
        let ExecutionRequest {
            source,
            bindings,
            limits,
        } = request;

        self.state = HostState::Idle;
        self.transition(HostState::Validating)?;
        let verdict = security::validate(&source);
        let program = match accepted_program(&source, verdict) {
            Ok(program) => program,
            Err(reason) => {
                self.transition(HostState::Rejected)?;
                observability::security_validation_rejected(request_id, code_hash, &reason);
                tracing::warn!(request_id = %request_id, reason = %reason, "Script rejected");
                return Ok((
                    None,
                    RunOutput::without_output(ExecutionOutcome::ValidationRejected { reason }),
                ));
            }
        };
        self.transition(HostState::Validated)?;

        let env = build_environment(bindings);
        let selected = isolation::select(self.options.policy, self.options.hard_memory);
        self.transition(HostState::Executing)?;
        observability::audit_execution_started(request_id, selected.as_str(), code_hash, source.len());
        tracing::debug!(
            request_id = %request_id,
            strategy = %selected,
            timeout_secs = limits.timeout_secs,
            memory_mb = limits.memory_mb,
            cpu_secs = limits.cpu_secs,
            "Executing script"
        );

        let (strategy, result) = run_with(selected, &program, &env, &limits, request_id);
        let output = result.unwrap_or_else(|e| {
            tracing::error!(request_id = %request_id, strategy = %strategy, "{}", e);
            RunOutput::without_output(ExecutionOutcome::sandbox_failure(e.to_string()))
        });
        self.transition(HostState::for_outcome(&output.outcome))?;
        Ok((Some(strategy), output))
    }

    fn transition(&mut self, next: HostState) -> Result<(), IllegalTransition> {
        if !self.state.can_transition_to(next) {
            return Err(IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

/// The validated program, or the rejection reason.
fn accepted_program(source: &str, verdict: ValidationVerdict) -> Result<Vec<Stmt>, String> {
    if !verdict.accepted {
        return Err(verdict
            .reason
            .unwrap_or_else(|| "Script rejected".to_string()));
    }
    script::parse(source).map_err(|e| format!("Syntax error in generated code: {}", e))
}

/// Dispatch to `strategy`; a busy in-process slot falls back to a subprocess.
fn run_with(
    strategy: Strategy,
    program: &[Stmt],
    env: &crate::env::Environment,
    limits: &ResourceLimits,
    request_id: &str,
) -> (Strategy, Result<RunOutput, IsolationError>) {
    match strategy {
        Strategy::Subprocess => (Strategy::Subprocess, run_subprocess(program, env, limits)),
        Strategy::InProcess => match in_process::try_acquire() {
            Some(slot) => (
                Strategy::InProcess,
                in_process::execute(&slot, program, env, limits),
            ),
            None if isolation::subprocess_supported() => {
                observability::security_isolation_fallback(
                    request_id,
                    Strategy::InProcess.as_str(),
                    Strategy::Subprocess.as_str(),
                    "in-process slot busy",
                );
                (Strategy::Subprocess, run_subprocess(program, env, limits))
            }
            None => (
                Strategy::InProcess,
                Ok(RunOutput::without_output(ExecutionOutcome::sandbox_failure(
                    "in-process sandbox is busy",
                ))),
            ),
        },
    }
}

#[cfg(unix)]
fn run_subprocess(
    program: &[Stmt],
    env: &crate::env::Environment,
    limits: &ResourceLimits,
) -> Result<RunOutput, IsolationError> {
    isolation::subprocess::execute(program, env, limits)
}

#[cfg(not(unix))]
fn run_subprocess(
    _program: &[Stmt],
    _env: &crate::env::Environment,
    _limits: &ResourceLimits,
) -> Result<RunOutput, IsolationError> {
    Err(IsolationError::Unsupported)
}

/// Validate and run `source` with limits from the arguments and the
/// isolation policy from the environment.
pub fn submit(
    source: &str,
    bindings: CapabilityBindings,
    timeout_s: u64,
    memory_mb: u64,
    cpu_s: u64,
) -> Result<ExecutionOutcome, RequestError> {
    let limits = ResourceLimits {
        timeout_secs: timeout_s,
        memory_mb,
        cpu_secs: cpu_s,
    };
    let request = ExecutionRequest::new(source, bindings, limits)?;
    Ok(ExecutionHost::from_env().submit(request))
}

/// Pre-filter raw user text before any code is generated for it.
pub fn check_user_input(text: &str) -> ValidationVerdict {
    let max_chars = SandboxDefaults::from_env().max_input_chars;
    let verdict = security::check_input_with_limit(text, max_chars);
    if let Some(reason) = &verdict.reason {
        observability::security_input_rejected(reason, text.chars().count());
    }
    verdict
}
