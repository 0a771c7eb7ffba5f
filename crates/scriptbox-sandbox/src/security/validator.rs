//! Static validator for generated scripts.
//!
//! Parses the source and walks every statement and expression in source
//! order, rejecting on the first denied import, denied call, dunder
//! attribute access, or disallowed node kind. Never executes anything.

use super::rules::{
    is_denied_module, top_level_package, DENIED_CALL_ATTRS, DENIED_CALL_NAMES,
    DISALLOWED_EXPR_KINDS, DISALLOWED_STMT_KINDS,
};
use super::types::ValidationVerdict;
use crate::script::ast::{Comprehension, Expr, FPart, Stmt, StmtKind};

/// Reason for the first violation found.
type Check = Result<(), String>;

/// Validates `source`. Empty or whitespace-only source is accepted.
pub fn validate(source: &str) -> ValidationVerdict {
    if source.trim().is_empty() {
        return ValidationVerdict::accepted();
    }
    let program = match crate::script::parse(source) {
        Ok(program) => program,
        Err(e) => {
            return ValidationVerdict::rejected(format!("Syntax error in generated code: {}", e))
        }
    };
    match check_block(&program) {
        Ok(()) => ValidationVerdict::accepted(),
        Err(reason) => ValidationVerdict::rejected(reason),
    }
}

fn check_block(body: &[Stmt]) -> Check {
    body.iter().try_for_each(check_stmt)
}

fn check_exprs<'a>(exprs: impl IntoIterator<Item = &'a Expr>) -> Check {
    exprs.into_iter().try_for_each(check_expr)
}

fn check_stmt(stmt: &Stmt) -> Check {
    let kind = stmt.kind.name();
    if DISALLOWED_STMT_KINDS.contains(&kind) {
        return Err(disallowed(kind));
    }
    match &stmt.kind {
        StmtKind::Expr(expr) => check_expr(expr),
        StmtKind::Assign { targets, value } => {
            check_exprs(targets)?;
            check_expr(value)
        }
        StmtKind::AugAssign { target, value, .. } => {
            check_expr(target)?;
            check_expr(value)
        }
        StmtKind::If { test, body, orelse } | StmtKind::While { test, body, orelse } => {
            check_expr(test)?;
            check_block(body)?;
            check_block(orelse)
        }
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
        } => {
            check_expr(target)?;
            check_expr(iter)?;
            check_block(body)?;
            check_block(orelse)
        }
        StmtKind::Break | StmtKind::Continue | StmtKind::Pass => Ok(()),
        StmtKind::Import(aliases) => {
            for alias in aliases {
                if is_denied_module(&alias.name) {
                    return Err(format!(
                        "Import of '{}' is not allowed for security reasons",
                        top_level_package(&alias.name)
                    ));
                }
            }
            Ok(())
        }
        StmtKind::ImportFrom { module, .. } => {
            if is_denied_module(module) {
                return Err(format!(
                    "Import from '{}' is not allowed for security reasons",
                    top_level_package(module)
                ));
            }
            Ok(())
        }
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            check_block(body)?;
            for handler in handlers {
                check_block(&handler.body)?;
            }
            check_block(orelse)?;
            check_block(finalbody)
        }
        StmtKind::Raise(exc) => check_exprs(exc),
        StmtKind::Assert { test, msg } => {
            check_expr(test)?;
            check_exprs(msg)
        }
        StmtKind::Return(_) => Err(format!(
            "Syntax error in generated code: 'return' outside function (line {})",
            stmt.line
        )),
        StmtKind::FunctionDef { body, .. } | StmtKind::ClassDef { body, .. } => check_block(body),
        StmtKind::Delete(targets) => check_exprs(targets),
    }
}

fn check_expr(expr: &Expr) -> Check {
    let kind = expr.name();
    if DISALLOWED_EXPR_KINDS.contains(&kind) {
        return Err(disallowed(kind));
    }
    match expr {
        Expr::Name(_) | Expr::Constant(_) => Ok(()),
        Expr::FString(parts) => parts.iter().try_for_each(|part| match part {
            FPart::Field { expr, .. } => check_expr(expr),
            FPart::Literal(_) => Ok(()),
        }),
        Expr::List(items) | Expr::Tuple(items) => check_exprs(items),
        Expr::Dict(pairs) => pairs.iter().try_for_each(|(k, v)| {
            check_expr(k)?;
            check_expr(v)
        }),
        Expr::Attribute { value, attr } => {
            if attr.starts_with("__") {
                return Err(format!(
                    "Access to attribute '{}' is not allowed for security reasons",
                    attr
                ));
            }
            check_expr(value)
        }
        Expr::Subscript { value, index } => {
            check_expr(value)?;
            check_expr(index)
        }
        Expr::Slice { lower, upper, step } => [lower, upper, step]
            .into_iter()
            .flatten()
            .try_for_each(|e| check_expr(e)),
        Expr::Call { func, args, kwargs } => {
            check_callee(func)?;
            check_expr(func)?;
            check_exprs(args)?;
            check_exprs(kwargs.iter().map(|(_, v)| v))
        }
        Expr::BinOp { left, right, .. } => {
            check_expr(left)?;
            check_expr(right)
        }
        Expr::UnaryOp { operand, .. } => check_expr(operand),
        Expr::BoolOp { values, .. } => check_exprs(values),
        Expr::Compare {
            left, comparators, ..
        } => {
            check_expr(left)?;
            check_exprs(comparators)
        }
        Expr::IfExp { test, body, orelse } => {
            check_expr(test)?;
            check_expr(body)?;
            check_expr(orelse)
        }
        Expr::ListComp { elt, generators } => {
            check_expr(elt)?;
            check_generators(generators)
        }
        Expr::DictComp {
            key,
            value,
            generators,
        } => {
            check_expr(key)?;
            check_expr(value)?;
            check_generators(generators)
        }
        Expr::Lambda { body, .. } => check_expr(body),
    }
}

fn check_generators(generators: &[Comprehension]) -> Check {
    for generator in generators {
        check_expr(&generator.target)?;
        check_expr(&generator.iter)?;
        check_exprs(&generator.ifs)?;
    }
    Ok(())
}

fn check_callee(func: &Expr) -> Check {
    let denied = match func {
        Expr::Name(name) if DENIED_CALL_NAMES.contains(&name.as_str()) => Some(name),
        Expr::Attribute { attr, .. } if DENIED_CALL_ATTRS.contains(&attr.as_str()) => Some(attr),
        _ => None,
    };
    match denied {
        Some(name) => Err(format!(
            "Call to '{}' is not allowed for security reasons",
            name
        )),
        None => Ok(()),
    }
}

fn disallowed(kind: &str) -> String {
    format!("{} is not allowed in sandboxed code", kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(source: &str) -> String {
        let verdict = validate(source);
        assert!(!verdict.accepted, "expected rejection of {:?}", source);
        verdict.reason.unwrap_or_default()
    }

    #[test]
    fn test_empty_source_is_accepted() {
        assert!(validate("").accepted);
        assert!(validate("   \n\t\n").accepted);
        assert_eq!(validate("").reason, None);
    }

    #[test]
    fn test_ordinary_script_is_accepted() {
        let source = "
import polars as pl
from plotly import express
rows = [r for r in range(10) if r % 2 == 0]
try:
    result = {'total': sum(rows), 'label': f'{len(rows)} rows'}
except Exception as e:
    result = str(e)
";
        assert_eq!(validate(source), ValidationVerdict::accepted());
    }

    #[test]
    fn test_denied_imports() {
        assert_eq!(
            reason("import os"),
            "Import of 'os' is not allowed for security reasons"
        );
        assert_eq!(
            reason("import polars as pl, os.path as p"),
            "Import of 'os' is not allowed for security reasons"
        );
        assert_eq!(
            reason("from subprocess import run"),
            "Import from 'subprocess' is not allowed for security reasons"
        );
        assert_eq!(
            reason("from urllib.request import urlopen"),
            "Import from 'urllib' is not allowed for security reasons"
        );
        assert_eq!(
            reason("if True:\n    import socket"),
            "Import of 'socket' is not allowed for security reasons"
        );
    }

    #[test]
    fn test_denied_calls() {
        for name in DENIED_CALL_NAMES {
            assert_eq!(
                reason(&format!("x = {}('1')", name)),
                format!("Call to '{}' is not allowed for security reasons", name)
            );
        }
        assert_eq!(
            reason("pd.eval('1 + 1')"),
            "Call to 'eval' is not allowed for security reasons"
        );
        assert_eq!(
            reason("x = [exec(s) for s in items]"),
            "Call to 'exec' is not allowed for security reasons"
        );
        assert_eq!(
            reason("x = f'{compile(a, b, c)}'"),
            "Call to 'compile' is not allowed for security reasons"
        );
    }

    #[test]
    fn test_referencing_denied_name_without_call_is_accepted() {
        // Only the environment stops this; it is a NameError at run time.
        assert!(validate("x = eval").accepted);
    }

    #[test]
    fn test_dunder_attribute_access() {
        assert_eq!(
            reason("x = y.__class__"),
            "Access to attribute '__class__' is not allowed for security reasons"
        );
        assert_eq!(
            reason("x = y.__dict__['k']"),
            "Access to attribute '__dict__' is not allowed for security reasons"
        );
    }

    #[test]
    fn test_strict_definition_policy() {
        assert_eq!(
            reason("def f():\n    return 1"),
            "FunctionDef is not allowed in sandboxed code"
        );
        assert_eq!(
            reason("async def f():\n    pass"),
            "AsyncFunctionDef is not allowed in sandboxed code"
        );
        assert_eq!(
            reason("class A:\n    pass"),
            "ClassDef is not allowed in sandboxed code"
        );
        assert_eq!(
            reason("f = lambda x: x"),
            "Lambda is not allowed in sandboxed code"
        );
        assert_eq!(reason("x = 1\ndel x"), "Delete is not allowed in sandboxed code");
    }

    #[test]
    fn test_first_violation_in_source_order_wins() {
        assert_eq!(
            reason("import pickle\nimport os"),
            "Import of 'pickle' is not allowed for security reasons"
        );
        assert_eq!(
            reason("x = eval(y.__class__)"),
            "Call to 'eval' is not allowed for security reasons"
        );
    }

    #[test]
    fn test_syntax_errors() {
        assert!(reason("x = (1,").starts_with("Syntax error in generated code: "));
        assert!(reason("return 1").starts_with("Syntax error in generated code: "));
    }

    #[test]
    fn test_validation_is_deterministic() {
        let source = "import os\nx = eval('1')";
        assert_eq!(validate(source), validate(source));
    }
}
