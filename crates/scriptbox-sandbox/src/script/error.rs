//! Error types of the script language.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Parse / tokenize failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (line {line})")]
pub struct SyntaxError {
    pub message: String,
    pub line: usize,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }
}

/// Category of a runtime failure, named after the script language's exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "Exception")]
    Generic,
    #[serde(rename = "ZeroDivisionError")]
    ZeroDivision,
    #[serde(rename = "NameError")]
    Name,
    #[serde(rename = "TypeError")]
    Type,
    #[serde(rename = "ValueError")]
    Value,
    #[serde(rename = "IndexError")]
    Index,
    #[serde(rename = "KeyError")]
    Key,
    #[serde(rename = "AttributeError")]
    Attribute,
    #[serde(rename = "ImportError")]
    Import,
    #[serde(rename = "OverflowError")]
    Overflow,
    #[serde(rename = "AssertionError")]
    Assertion,
    #[serde(rename = "RecursionError")]
    Recursion,
    #[serde(rename = "RuntimeError")]
    Runtime,
    #[serde(rename = "NotImplementedError")]
    Unsupported,
    /// Failure of a capability handle supplied by the caller.
    #[serde(rename = "CapabilityError")]
    Capability,
    /// Failure of the sandbox machinery itself (child crashed, no report, ...).
    #[serde(rename = "SandboxError")]
    Sandbox,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Generic => "Exception",
            ErrorKind::ZeroDivision => "ZeroDivisionError",
            ErrorKind::Name => "NameError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Value => "ValueError",
            ErrorKind::Index => "IndexError",
            ErrorKind::Key => "KeyError",
            ErrorKind::Attribute => "AttributeError",
            ErrorKind::Import => "ImportError",
            ErrorKind::Overflow => "OverflowError",
            ErrorKind::Assertion => "AssertionError",
            ErrorKind::Recursion => "RecursionError",
            ErrorKind::Runtime => "RuntimeError",
            ErrorKind::Unsupported => "NotImplementedError",
            ErrorKind::Capability => "CapabilityError",
            ErrorKind::Sandbox => "SandboxError",
        }
    }

    /// Kinds a script may construct and raise by name.
    pub fn from_constructor(name: &str) -> Option<Self> {
        Some(match name {
            "Exception" => ErrorKind::Generic,
            "ValueError" => ErrorKind::Value,
            "TypeError" => ErrorKind::Type,
            "KeyError" => ErrorKind::Key,
            "IndexError" => ErrorKind::Index,
            "ZeroDivisionError" => ErrorKind::ZeroDivision,
            "RuntimeError" => ErrorKind::Runtime,
            _ => return None,
        })
    }

    /// Whether an `except <name>` clause catches this kind.
    pub fn caught_by(&self, handler: &str) -> bool {
        match handler {
            "Exception" | "BaseException" => !matches!(self, ErrorKind::Sandbox),
            "ArithmeticError" => matches!(self, ErrorKind::ZeroDivision | ErrorKind::Overflow),
            "LookupError" => matches!(self, ErrorKind::Index | ErrorKind::Key),
            other => self.as_str() == other,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised while evaluating a script; catchable by `try/except`.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    pub line: usize,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: 0,
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        if self.line == 0 {
            self.line = line;
        }
        self
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(f, "{}: {} (line {})", self.kind, self.message, self.line)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

/// Reason evaluation was stopped from outside the script. Never catchable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    /// The deadline guard fired.
    Deadline,
    /// Memory ceiling reached (limit in MB).
    Memory { limit_mb: u64 },
    /// CPU-time ceiling reached (limit in seconds).
    Cpu { limit_secs: u64 },
}

/// Terminal failure of an evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    Runtime(RuntimeError),
    Halt(Halt),
}

impl From<RuntimeError> for EvalError {
    fn from(e: RuntimeError) -> Self {
        EvalError::Runtime(e)
    }
}

pub(crate) fn type_error(message: impl Into<String>) -> RuntimeError {
    RuntimeError::new(ErrorKind::Type, message)
}

pub(crate) fn value_error(message: impl Into<String>) -> RuntimeError {
    RuntimeError::new(ErrorKind::Value, message)
}
