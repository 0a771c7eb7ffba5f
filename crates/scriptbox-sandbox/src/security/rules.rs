//! Static allow/deny tables used by the validator and the input pre-filter.

/// Top-level packages a script may never import: process control,
/// networking, filesystem, object serialisation, dynamic evaluation and
/// import machinery, concurrency. Builtin names that are not modules
/// (`eval`, `open`, …) are listed too so `import eval` style tricks fail
/// with the same message.
pub const DENIED_MODULES: &[&str] = &[
    // process / interpreter control
    "os",
    "sys",
    "subprocess",
    "signal",
    "ctypes",
    "multiprocessing",
    "threading",
    "asyncio",
    // networking
    "socket",
    "requests",
    "urllib",
    "http",
    "ftplib",
    "smtplib",
    "telnetlib",
    // filesystem
    "shutil",
    "pathlib",
    "tempfile",
    "glob",
    "io",
    "shelve",
    // serialisation
    "pickle",
    "marshal",
    // dynamic evaluation / import
    "importlib",
    "builtins",
    "runpy",
    "eval",
    "exec",
    "compile",
    "__import__",
    "open",
    "input",
    "raw_input",
    "reload",
    "exit",
    "quit",
];

/// Callee names rejected when called directly: `eval(...)`.
pub const DENIED_CALL_NAMES: &[&str] = &["eval", "exec", "compile", "__import__", "open"];

/// Callee attributes rejected when called as a method: `x.eval(...)`.
pub const DENIED_CALL_ATTRS: &[&str] = &["eval", "exec", "compile", "__import__"];

/// Statement kinds rejected outright.
pub const DISALLOWED_STMT_KINDS: &[&str] =
    &["FunctionDef", "AsyncFunctionDef", "ClassDef", "Delete"];

/// Expression kinds rejected outright.
pub const DISALLOWED_EXPR_KINDS: &[&str] = &["Lambda"];

/// Literals the input pre-filter looks for, in reporting order.
pub const SUSPICIOUS_INPUT_PATTERNS: &[&str] = &[
    "__import__",
    "eval(",
    "exec(",
    "compile(",
    "subprocess.",
    "os.system",
    "os.popen",
    "importlib.",
    "os.spawn",
];

/// Whether `module` (possibly dotted) falls under [`DENIED_MODULES`].
pub fn is_denied_module(module: &str) -> bool {
    DENIED_MODULES.contains(&top_level_package(module))
}

pub fn top_level_package(module: &str) -> &str {
    module.split('.').next().unwrap_or(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dotted_modules_use_top_level_package() {
        assert!(is_denied_module("os.path"));
        assert!(is_denied_module("urllib.request"));
        assert!(!is_denied_module("polars"));
        assert!(!is_denied_module("plotly.express"));
        assert_eq!(top_level_package("a.b.c"), "a");
    }

    #[test]
    fn test_call_tables_are_subsets() {
        for name in DENIED_CALL_ATTRS {
            assert!(DENIED_CALL_NAMES.contains(name));
        }
    }
}
