//! Static checks on untrusted input.
//!
//! [`validator`] is the authoritative gate for generated scripts;
//! [`input_filter`] is a cheap heuristic over the raw user request.

pub mod input_filter;
pub mod rules;
pub mod types;
pub mod validator;

pub use input_filter::{check_input, check_input_with_limit};
pub use types::ValidationVerdict;
pub use validator::validate;
