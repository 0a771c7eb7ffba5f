//! Sandbox for untrusted, machine-generated analysis scripts.
//!
//! A script is validated statically, then evaluated against a restricted
//! environment of primitives and caller-bound capability handles, either
//! in-process under a deadline guard or in a forked child under OS limits.
//! Every request ends in exactly one [`ExecutionOutcome`].

pub mod capability;
pub mod common;
pub mod env;
pub mod isolation;
pub mod limiter;
pub mod log;
pub mod outcome;
pub mod runner;
pub mod script;
pub mod security;
pub mod value;

pub use capability::{Capability, CapabilityBindings, Catalog};
pub use isolation::{IsolationPolicy, Strategy};
pub use outcome::{ExecutionOutcome, ResourceKind};
pub use runner::{
    check_user_input, submit, ExecutionHost, ExecutionReport, ExecutionRequest, HostOptions,
    RequestError, ResourceLimits,
};
pub use security::ValidationVerdict;
pub use value::Value;
