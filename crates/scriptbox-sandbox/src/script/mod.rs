//! Interpreter for the sandboxed script language: a statement/expression
//! subset of Python without function or class definitions.
//!
//! [`parse`] turns source into a program; [`evaluate`] runs it against an
//! [`Environment`] under a [`Meter`] and exports the resulting namespace as
//! plain [`Value`]s.

pub mod ast;
mod builtins;
mod error;
pub(crate) mod format;
mod interp;
mod lexer;
mod meter;
mod methods;
mod object;
mod parser;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

pub use ast::{Expr, Stmt, StmtKind};
pub use error::{ErrorKind, EvalError, Halt, RuntimeError, SyntaxError};
pub use meter::Meter;

use crate::env::{Environment, OUTPUT_NAME};
use crate::value::Value;
use interp::Interpreter;
use object::Object;

/// Parses a whole module. An empty or comment-only source yields an empty
/// program.
pub fn parse(source: &str) -> Result<Vec<Stmt>, SyntaxError> {
    parser::parse_module(source)
}

/// What a finished evaluation leaves behind.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Value bound to `result`, if the script bound it.
    pub output: Option<Value>,
    /// Other plain-data top-level bindings, by name.
    pub bindings: BTreeMap<String, Value>,
    /// Captured `print` output.
    pub printed: String,
}

/// Runs `program` to completion or until the meter halts it.
///
/// Top-level bindings that are callables, capability handles, or otherwise
/// not plain data are left out of [`Evaluation::bindings`]. A `result` that
/// cannot be exported is a runtime failure.
pub fn evaluate(program: &[Stmt], env: &Environment, meter: Meter) -> Result<Evaluation, EvalError> {
    let mut interp = Interpreter::new(env, meter);
    interp.run(program)?;
    let (globals, printed) = interp.finish();

    let mut output = None;
    let mut bindings = BTreeMap::new();
    for (name, obj) in globals {
        if name == OUTPUT_NAME {
            output = Some(obj.to_value()?);
            continue;
        }
        if !exportable(&obj) {
            continue;
        }
        match obj.to_value() {
            Ok(value) => {
                bindings.insert(name, value);
            }
            Err(e) => tracing::debug!(binding = %name, error = %e, "Skipping unexportable binding"),
        }
    }
    Ok(Evaluation {
        output,
        bindings,
        printed,
    })
}

fn exportable(obj: &Object) -> bool {
    !matches!(
        obj,
        Object::Builtin(_) | Object::Method(_) | Object::Capability(_) | Object::Exception(_)
    )
}
