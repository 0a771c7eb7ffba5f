//! Execution environment: the immutable namespace a script starts from.
//!
//! The evaluator reads primitives and capability handles from here; the
//! script's own bindings live in a separate per-execution namespace.

pub mod builder;

pub use builder::{build_environment, Environment, ALLOWED_PRIMITIVES, OUTPUT_NAME};
