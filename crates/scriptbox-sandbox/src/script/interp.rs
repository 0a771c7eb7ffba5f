//! Tree-walking evaluator.
//!
//! Every statement and loop iteration ticks the [`Meter`]; a [`Halt`] from it
//! travels through [`Unwind::Halt`], which `try/except` never intercepts and
//! `finally` blocks do not run for.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use super::ast::{
    Alias, BinOp, BoolOp, CmpOp, Comprehension, Constant, Expr, FPart, Handler, Stmt, StmtKind,
    UnaryOp,
};
use super::error::{type_error, value_error, ErrorKind, EvalError, Halt, RuntimeError};
use super::format::{format_object, percent_format, quote_str};
use super::meter::Meter;
use super::methods;
use super::object::{
    BoundMethod, Builtin, CapabilityObj, Dict, ExceptionObj, List, Object, RangeObj, Tuple,
    SLOT_BYTES,
};
use crate::env::Environment;

/// Cap on captured `print` output.
pub(crate) const MAX_PRINTED_BYTES: usize = 64 * 1024;

/// Growing collections are size-checked every this many elements.
const GROWTH_CHECK_EVERY: usize = 4096;

/// Non-local control flow.
#[derive(Debug)]
pub(crate) enum Unwind {
    Break,
    Continue,
    Raise(RuntimeError),
    Halt(Halt),
}

impl Unwind {
    fn at_line(self, line: usize) -> Self {
        match self {
            Unwind::Raise(e) => Unwind::Raise(e.at_line(line)),
            other => other,
        }
    }
}

impl From<RuntimeError> for Unwind {
    fn from(e: RuntimeError) -> Self {
        Unwind::Raise(e)
    }
}

impl From<Halt> for Unwind {
    fn from(h: Halt) -> Self {
        Unwind::Halt(h)
    }
}

pub(crate) type Flow<T> = Result<T, Unwind>;

pub(crate) struct Interpreter<'env> {
    env: &'env Environment,
    /// Capability objects, created once so identity is stable.
    capabilities: HashMap<String, Object>,
    globals: HashMap<String, Object>,
    /// Comprehension scopes, innermost last.
    scopes: Vec<HashMap<String, Object>>,
    pub(super) meter: Meter,
    printed: String,
    printed_truncated: bool,
    /// Errors handled by the enclosing `except` blocks, for bare `raise`.
    handling: Vec<RuntimeError>,
}

impl<'env> Interpreter<'env> {
    pub fn new(env: &'env Environment, meter: Meter) -> Self {
        let capabilities = env
            .capabilities()
            .iter()
            .map(|(name, handle)| {
                let obj = Object::Capability(Rc::new(CapabilityObj {
                    name: name.to_string(),
                    handle: handle.clone(),
                }));
                (name.to_string(), obj)
            })
            .collect();
        Self {
            env,
            capabilities,
            globals: HashMap::new(),
            scopes: Vec::new(),
            meter,
            printed: String::new(),
            printed_truncated: false,
            handling: Vec::new(),
        }
    }

    pub fn run(&mut self, program: &[Stmt]) -> Result<(), EvalError> {
        match self.exec_block(program) {
            Ok(()) => Ok(()),
            Err(Unwind::Raise(e)) => Err(EvalError::Runtime(e)),
            Err(Unwind::Halt(h)) => Err(EvalError::Halt(h)),
            Err(Unwind::Break | Unwind::Continue) => Err(EvalError::Runtime(RuntimeError::new(
                ErrorKind::Runtime,
                "loop control outside loop",
            ))),
        }
    }

    /// Script namespace and captured output.
    pub fn finish(self) -> (HashMap<String, Object>, String) {
        (self.globals, self.printed)
    }

    // ---- statements ----

    fn exec_block(&mut self, body: &[Stmt]) -> Flow<()> {
        for stmt in body {
            self.exec(stmt).map_err(|u| u.at_line(stmt.line))?;
        }
        Ok(())
    }

    fn exec(&mut self, stmt: &Stmt) -> Flow<()> {
        self.meter.tick()?;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
                Ok(())
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone(), false)?;
                }
                Ok(())
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value),
            StmtKind::If { test, body, orelse } => {
                if self.eval(test)?.truthy() {
                    self.exec_block(body)
                } else {
                    self.exec_block(orelse)
                }
            }
            StmtKind::While { test, body, orelse } => {
                loop {
                    self.meter.tick()?;
                    if !self.eval(test)?.truthy() {
                        return self.exec_block(orelse);
                    }
                    match self.exec_block(body) {
                        Ok(()) | Err(Unwind::Continue) => {}
                        Err(Unwind::Break) => return Ok(()),
                        Err(e) => return Err(e),
                    }
                }
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter)?;
                let mut items = self.iterate(&iterable)?;
                while let Some(item) = items.next() {
                    self.meter.tick()?;
                    self.assign(target, item, false)?;
                    match self.exec_block(body) {
                        Ok(()) | Err(Unwind::Continue) => {}
                        Err(Unwind::Break) => return Ok(()),
                        Err(e) => return Err(e),
                    }
                }
                self.exec_block(orelse)
            }
            StmtKind::Break => Err(Unwind::Break),
            StmtKind::Continue => Err(Unwind::Continue),
            StmtKind::Pass => Ok(()),
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    self.import(alias)?;
                }
                Ok(())
            }
            StmtKind::ImportFrom { module, names } => self.import_from(module, names),
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => self.exec_try(body, handlers, orelse, finalbody),
            StmtKind::Raise(exc) => self.raise(exc.as_ref()),
            StmtKind::Assert { test, msg } => {
                if self.eval(test)?.truthy() {
                    return Ok(());
                }
                let message = match msg {
                    Some(msg) => self.eval(msg)?.to_str()?,
                    None => String::new(),
                };
                Err(RuntimeError::new(ErrorKind::Assertion, message).into())
            }
            StmtKind::FunctionDef { .. }
            | StmtKind::ClassDef { .. }
            | StmtKind::Delete(_)
            | StmtKind::Return(_) => Err(unsupported(stmt.kind.name()).into()),
        }
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[Handler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
    ) -> Flow<()> {
        let mut outcome = match self.exec_block(body) {
            Ok(()) => self.exec_block(orelse),
            Err(Unwind::Raise(err)) => {
                match handlers.iter().find(|h| handles(h, err.kind)) {
                    Some(handler) => self.exec_handler(handler, err),
                    None => Err(Unwind::Raise(err)),
                }
            }
            Err(other) => Err(other),
        };
        if !finalbody.is_empty() && !matches!(outcome, Err(Unwind::Halt(_))) {
            if let Err(e) = self.exec_block(finalbody) {
                outcome = Err(e);
            }
        }
        outcome
    }

    fn exec_handler(&mut self, handler: &Handler, err: RuntimeError) -> Flow<()> {
        if let Some(name) = &handler.binding {
            let exc = Object::Exception(Rc::new(ExceptionObj {
                kind: err.kind,
                message: err.message.clone(),
            }));
            self.globals.insert(name.clone(), exc);
        }
        self.handling.push(err);
        let result = self.exec_block(&handler.body);
        self.handling.pop();
        if let Some(name) = &handler.binding {
            self.globals.remove(name);
        }
        result
    }

    fn raise(&mut self, exc: Option<&Expr>) -> Flow<()> {
        let err = match exc {
            None => self.handling.last().cloned().ok_or_else(|| {
                RuntimeError::new(ErrorKind::Runtime, "No active exception to reraise")
            })?,
            Some(expr) => match self.eval(expr)? {
                Object::Exception(e) => RuntimeError::new(e.kind, e.message.clone()),
                Object::Builtin(Builtin::Error(kind)) => RuntimeError::new(kind, ""),
                _ => type_error("exceptions must derive from BaseException"),
            },
        };
        Err(Unwind::Raise(err))
    }

    fn import(&mut self, alias: &Alias) -> Flow<()> {
        let env = self.env;
        let (entry, _) = env
            .capabilities()
            .for_module(&alias.name)
            .ok_or_else(|| import_error(&alias.name))?;
        let bind_as = match &alias.asname {
            Some(name) => name.clone(),
            None if !alias.name.contains('.') => alias.name.clone(),
            None => {
                return Err(RuntimeError::new(
                    ErrorKind::Import,
                    format!(
                        "submodule '{}' must be imported with an alias, e.g. 'import {} as {}'",
                        alias.name, alias.name, entry.name
                    ),
                )
                .into())
            }
        };
        let obj = self.capability_object(entry.name)?;
        self.globals.insert(bind_as, obj);
        Ok(())
    }

    fn import_from(&mut self, module: &str, names: &[Alias]) -> Flow<()> {
        let env = self.env;
        let (entry, handle) = env
            .capabilities()
            .for_module(module)
            .ok_or_else(|| import_error(module))?;
        for alias in names {
            if alias.name == "*" {
                return Err(
                    RuntimeError::new(ErrorKind::Import, "wildcard imports are not supported")
                        .into(),
                );
            }
            let obj = if let Some(value) = handle.attr(&alias.name) {
                Object::from_value(&value)
            } else if handle.has_method(&alias.name) {
                Object::Method(Rc::new(BoundMethod {
                    receiver: self.capability_object(entry.name)?,
                    name: alias.name.clone(),
                }))
            } else {
                return Err(RuntimeError::new(
                    ErrorKind::Import,
                    format!("cannot import name '{}' from '{}'", alias.name, module),
                )
                .into());
            };
            let bind_as = alias.asname.clone().unwrap_or_else(|| alias.name.clone());
            self.globals.insert(bind_as, obj);
        }
        Ok(())
    }

    fn capability_object(&self, name: &str) -> Result<Object, RuntimeError> {
        self.capabilities
            .get(name)
            .cloned()
            .ok_or_else(|| import_error(name))
    }

    // ---- assignment ----

    fn assign(&mut self, target: &Expr, value: Object, local: bool) -> Flow<()> {
        match target {
            Expr::Name(name) => {
                match (local, self.scopes.last_mut()) {
                    (true, Some(scope)) => scope.insert(name.clone(), value),
                    _ => self.globals.insert(name.clone(), value),
                };
                Ok(())
            }
            Expr::Tuple(items) | Expr::List(items) => {
                let values = self.unpack(&value, items.len())?;
                for (item, value) in items.iter().zip(values) {
                    self.assign(item, value, local)?;
                }
                Ok(())
            }
            Expr::Subscript {
                value: container,
                index,
            } => {
                let container = self.eval(container)?;
                match index.as_ref() {
                    Expr::Slice { lower, upper, step } => {
                        let slice = self.eval_slice(lower, upper, step)?;
                        self.set_slice(&container, &slice, &value)
                    }
                    index => {
                        let index = self.eval(index)?;
                        Ok(self.set_item(&container, &index, value)?)
                    }
                }
            }
            Expr::Attribute { value: obj, attr } => {
                let obj = self.eval(obj)?;
                Err(RuntimeError::new(
                    ErrorKind::Attribute,
                    format!("'{}' object attribute '{}' is read-only", obj.type_name(), attr),
                )
                .into())
            }
            other => Err(RuntimeError::new(
                ErrorKind::Runtime,
                format!("cannot assign to {}", other.name()),
            )
            .into()),
        }
    }

    fn unpack(&mut self, value: &Object, expected: usize) -> Flow<Vec<Object>> {
        let mut items = self.iterate(value)?;
        let mut out = Vec::with_capacity(expected);
        while let Some(item) = items.next() {
            if out.len() == expected {
                return Err(value_error(format!(
                    "too many values to unpack (expected {})",
                    expected
                ))
                .into());
            }
            out.push(item);
        }
        if out.len() < expected {
            return Err(value_error(format!(
                "not enough values to unpack (expected {}, got {})",
                expected,
                out.len()
            ))
            .into());
        }
        Ok(out)
    }

    fn aug_assign(&mut self, target: &Expr, op: BinOp, value: &Expr) -> Flow<()> {
        match target {
            Expr::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval(value)?;
                let result = self.inplace(op, current, rhs)?;
                self.assign(target, result, false)
            }
            Expr::Subscript {
                value: container,
                index,
            } => {
                let container = self.eval(container)?;
                if let Expr::Slice { .. } = index.as_ref() {
                    return Err(type_error("augmented assignment to a slice is not supported").into());
                }
                let index = self.eval(index)?;
                let current = self.get_item(&container, &index)?;
                let rhs = self.eval(value)?;
                let result = self.inplace(op, current, rhs)?;
                Ok(self.set_item(&container, &index, result)?)
            }
            other => self.assign(other, Object::None, false),
        }
    }

    /// `+=` on a list extends it in place; everything else rebinds.
    fn inplace(&mut self, op: BinOp, current: Object, rhs: Object) -> Flow<Object> {
        if let (BinOp::Add, Object::List(list)) = (op, &current) {
            let extra = self.collect(&rhs)?;
            let total = list.borrow().len() + extra.len();
            self.meter.check_alloc(total as u128 * SLOT_BYTES as u128)?;
            list.borrow_mut().extend(extra);
            return Ok(current);
        }
        self.binop(op, current, rhs)
    }

    // ---- expressions ----

    pub(super) fn eval(&mut self, expr: &Expr) -> Flow<Object> {
        match expr {
            Expr::Name(name) => Ok(self.lookup(name)?),
            Expr::Constant(c) => Ok(constant(c)),
            Expr::FString(parts) => self.fstring(parts),
            Expr::List(items) => Ok(Object::list(self.eval_all(items)?)),
            Expr::Tuple(items) => Ok(Object::tuple(self.eval_all(items)?)),
            Expr::Dict(pairs) => {
                let mut dict = Dict::new();
                for (k, v) in pairs {
                    let key = self.eval(k)?;
                    let value = self.eval(v)?;
                    dict.insert(key.hash_key()?, key, value);
                }
                Ok(Object::dict(dict))
            }
            Expr::Attribute { value, attr } => {
                let obj = self.eval(value)?;
                Ok(get_attr(obj, attr)?)
            }
            Expr::Subscript { value, index } => {
                let container = self.eval(value)?;
                match index.as_ref() {
                    Expr::Slice { lower, upper, step } => {
                        let slice = self.eval_slice(lower, upper, step)?;
                        Ok(get_slice(&container, &slice)?)
                    }
                    index => {
                        let index = self.eval(index)?;
                        Ok(self.get_item(&container, &index)?)
                    }
                }
            }
            Expr::Slice { .. } => {
                Err(type_error("slice expressions are only valid inside subscripts").into())
            }
            Expr::Call { func, args, kwargs } => {
                let func = self.eval(func)?;
                let args = self.eval_all(args)?;
                let mut kw: Vec<(String, Object)> = Vec::with_capacity(kwargs.len());
                for (name, value) in kwargs {
                    if kw.iter().any(|(k, _)| k == name) {
                        return Err(type_error(format!("keyword argument repeated: {}", name)).into());
                    }
                    let value = self.eval(value)?;
                    kw.push((name.clone(), value));
                }
                self.call(func, args, kw)
            }
            Expr::BinOp { left, op, right } => {
                let a = self.eval(left)?;
                let b = self.eval(right)?;
                self.binop(*op, a, b)
            }
            Expr::UnaryOp { op, operand } => {
                let value = self.eval(operand)?;
                Ok(unary(*op, value)?)
            }
            Expr::BoolOp { op, values } => {
                let mut last = Object::None;
                for value in values {
                    last = self.eval(value)?;
                    let stop = match op {
                        BoolOp::And => !last.truthy(),
                        BoolOp::Or => last.truthy(),
                    };
                    if stop {
                        break;
                    }
                }
                Ok(last)
            }
            Expr::Compare {
                left,
                ops,
                comparators,
            } => {
                let mut lhs = self.eval(left)?;
                for (op, rhs) in ops.iter().zip(comparators) {
                    let rhs = self.eval(rhs)?;
                    if !self.compare(*op, &lhs, &rhs)? {
                        return Ok(Object::Bool(false));
                    }
                    lhs = rhs;
                }
                Ok(Object::Bool(true))
            }
            Expr::IfExp { test, body, orelse } => {
                if self.eval(test)?.truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::ListComp { elt, generators } => {
                let mut collector = Collector::List {
                    elt,
                    items: Vec::new(),
                };
                self.comprehension(generators, &mut collector)?;
                match collector {
                    Collector::List { items, .. } => Ok(Object::list(items)),
                    Collector::Dict { dict, .. } => Ok(Object::dict(dict)),
                }
            }
            Expr::DictComp {
                key,
                value,
                generators,
            } => {
                let mut collector = Collector::Dict {
                    key,
                    value,
                    dict: Dict::new(),
                };
                self.comprehension(generators, &mut collector)?;
                match collector {
                    Collector::Dict { dict, .. } => Ok(Object::dict(dict)),
                    Collector::List { items, .. } => Ok(Object::list(items)),
                }
            }
            Expr::Lambda { .. } => Err(unsupported("Lambda").into()),
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> Flow<Vec<Object>> {
        let mut out = Vec::with_capacity(exprs.len());
        for expr in exprs {
            out.push(self.eval(expr)?);
        }
        Ok(out)
    }

    fn lookup(&self, name: &str) -> Result<Object, RuntimeError> {
        for scope in self.scopes.iter().rev() {
            if let Some(value) = scope.get(name) {
                return Ok(value.clone());
            }
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        if let Some(value) = self.capabilities.get(name) {
            return Ok(value.clone());
        }
        if self.env.is_primitive(name) {
            if let Some(builtin) = Builtin::from_name(name) {
                return Ok(Object::Builtin(builtin));
            }
        }
        Err(RuntimeError::new(
            ErrorKind::Name,
            format!("name '{}' is not defined", name),
        ))
    }

    fn fstring(&mut self, parts: &[FPart]) -> Flow<Object> {
        let mut out = String::new();
        for part in parts {
            match part {
                FPart::Literal(text) => out.push_str(text),
                FPart::Field {
                    expr,
                    conversion,
                    spec,
                } => {
                    let value = self.eval(expr)?;
                    let value = match conversion {
                        Some('r') | Some('a') => Object::str(value.repr()?),
                        Some('s') => Object::str(value.to_str()?),
                        _ => value,
                    };
                    out.push_str(&format_object(&value, spec)?);
                }
            }
            self.meter.check_alloc(out.len() as u128)?;
        }
        Ok(Object::str(out))
    }

    fn comprehension(
        &mut self,
        generators: &[Comprehension],
        collector: &mut Collector<'_>,
    ) -> Flow<()> {
        self.scopes.push(HashMap::new());
        let result = self.generate(generators, collector);
        self.scopes.pop();
        result
    }

    fn generate(&mut self, generators: &[Comprehension], collector: &mut Collector<'_>) -> Flow<()> {
        let Some((first, rest)) = generators.split_first() else {
            return self.collect_one(collector);
        };
        let iterable = self.eval(&first.iter)?;
        let mut items = self.iterate(&iterable)?;
        'items: while let Some(item) = items.next() {
            self.meter.tick()?;
            self.assign(&first.target, item, true)?;
            for cond in &first.ifs {
                if !self.eval(cond)?.truthy() {
                    continue 'items;
                }
            }
            self.generate(rest, collector)?;
        }
        Ok(())
    }

    fn collect_one(&mut self, collector: &mut Collector<'_>) -> Flow<()> {
        match collector {
            Collector::List { elt, items } => {
                let value = self.eval(*elt)?;
                items.push(value);
                self.check_growth(items.len())?;
            }
            Collector::Dict { key, value, dict } => {
                let k = self.eval(*key)?;
                let v = self.eval(*value)?;
                dict.insert(k.hash_key()?, k, v);
                self.check_growth(dict.len())?;
            }
        }
        Ok(())
    }

    /// Periodic size check for a collection being built element by element.
    pub(super) fn check_growth(&self, len: usize) -> Result<(), Halt> {
        if len % GROWTH_CHECK_EVERY == 0 {
            self.meter.check_alloc(len as u128 * SLOT_BYTES as u128)?;
        }
        Ok(())
    }

    // ---- calls ----

    pub(super) fn call(
        &mut self,
        func: Object,
        args: Vec<Object>,
        kwargs: Vec<(String, Object)>,
    ) -> Flow<Object> {
        match func {
            Object::Builtin(builtin) => self.call_builtin(builtin, args, kwargs),
            Object::Method(method) => self.call_method(&method.receiver, &method.name, args, kwargs),
            other => Err(type_error(format!("'{}' object is not callable", other.type_name())).into()),
        }
    }

    // ---- operators ----

    pub(super) fn binop(&mut self, op: BinOp, a: Object, b: Object) -> Flow<Object> {
        use Object as O;
        match (&a, &b) {
            (O::Int(_) | O::Bool(_), O::Int(_) | O::Bool(_)) => {
                return Ok(int_op(op, a.as_int().unwrap_or(0), b.as_int().unwrap_or(0))?)
            }
            (O::Int(_) | O::Bool(_) | O::Float(_), O::Int(_) | O::Bool(_) | O::Float(_)) => {
                return Ok(float_op(op, a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0))?)
            }
            _ => {}
        }
        match (op, &a, &b) {
            (BinOp::Add, O::Str(x), O::Str(y)) => {
                self.meter.check_alloc(x.len() as u128 + y.len() as u128)?;
                let mut s = String::with_capacity(x.len() + y.len());
                s.push_str(x);
                s.push_str(y);
                Ok(Object::str(s))
            }
            (BinOp::Add, O::List(x), O::List(y)) => {
                let joined = self.concat(&x.borrow(), &y.borrow())?;
                Ok(Object::list(joined))
            }
            (BinOp::Add, O::Tuple(x), O::Tuple(y)) => {
                let joined = self.concat(x.items(), y.items())?;
                Ok(Object::tuple(joined))
            }
            (BinOp::Mul, O::Str(_) | O::List(_) | O::Tuple(_), O::Int(_) | O::Bool(_)) => {
                self.repeat(&a, b.as_int().unwrap_or(0))
            }
            (BinOp::Mul, O::Int(_) | O::Bool(_), O::Str(_) | O::List(_) | O::Tuple(_)) => {
                self.repeat(&b, a.as_int().unwrap_or(0))
            }
            (BinOp::Mod, O::Str(template), _) => {
                let text = percent_format(template, &b)?;
                Ok(Object::str(text))
            }
            _ => Err(type_error(format!(
                "unsupported operand type(s) for {}: '{}' and '{}'",
                op.symbol(),
                a.type_name(),
                b.type_name()
            ))
            .into()),
        }
    }

    fn concat(&self, x: &[Object], y: &[Object]) -> Result<Vec<Object>, Halt> {
        let total = x.len() + y.len();
        self.meter.check_alloc(total as u128 * SLOT_BYTES as u128)?;
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(x);
        out.extend_from_slice(y);
        Ok(out)
    }

    fn repeat(&mut self, seq: &Object, times: i64) -> Flow<Object> {
        let times = times.max(0) as u128;
        match seq {
            Object::Str(s) => {
                if s.is_empty() || times == 0 {
                    return Ok(Object::str(""));
                }
                self.meter.check_alloc(s.len() as u128 * times)?;
                Ok(Object::str(s.repeat(times as usize)))
            }
            Object::List(l) => {
                let items = l.borrow().clone();
                Ok(Object::list(self.repeat_items(&items, times)?))
            }
            Object::Tuple(t) => Ok(Object::tuple(self.repeat_items(t.items(), times)?)),
            other => Err(type_error(format!(
                "can't multiply sequence of type '{}'",
                other.type_name()
            ))
            .into()),
        }
    }

    fn repeat_items(&self, items: &[Object], times: u128) -> Result<Vec<Object>, Halt> {
        if items.is_empty() || times == 0 {
            return Ok(Vec::new());
        }
        self.meter
            .check_alloc(items.len() as u128 * times * SLOT_BYTES as u128)?;
        let mut out = Vec::with_capacity(items.len() * times as usize);
        for _ in 0..times {
            out.extend_from_slice(items);
        }
        Ok(out)
    }

    fn compare(&mut self, op: CmpOp, a: &Object, b: &Object) -> Flow<bool> {
        Ok(match op {
            CmpOp::Eq => a.py_eq(b)?,
            CmpOp::NotEq => !a.py_eq(b)?,
            CmpOp::Lt => matches!(ordering(a, b, "<")?, Some(Ordering::Less)),
            CmpOp::LtE => matches!(ordering(a, b, "<=")?, Some(Ordering::Less | Ordering::Equal)),
            CmpOp::Gt => matches!(ordering(a, b, ">")?, Some(Ordering::Greater)),
            CmpOp::GtE => matches!(
                ordering(a, b, ">=")?,
                Some(Ordering::Greater | Ordering::Equal)
            ),
            CmpOp::In => self.contains(b, a)?,
            CmpOp::NotIn => !self.contains(b, a)?,
            CmpOp::Is => a.is_same(b),
            CmpOp::IsNot => !a.is_same(b),
        })
    }

    pub(super) fn contains(&mut self, container: &Object, item: &Object) -> Flow<bool> {
        match container {
            Object::Str(s) => match item {
                Object::Str(sub) => Ok(s.contains(&**sub)),
                other => Err(type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ))
                .into()),
            },
            Object::List(l) => {
                let items = l.borrow();
                for x in items.iter() {
                    self.meter.tick()?;
                    if x.py_eq(item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Object::Tuple(t) => {
                for x in t.items() {
                    self.meter.tick()?;
                    if x.py_eq(item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Object::Dict(d) => {
                let key = item.hash_key()?;
                Ok(d.borrow().contains(&key))
            }
            Object::Range(r) => Ok(match item {
                Object::Int(_) | Object::Bool(_) => r.contains(item.as_int().unwrap_or(0)),
                Object::Float(f) if f.fract() == 0.0 && f.abs() < 9.2e18 => r.contains(*f as i64),
                _ => false,
            }),
            other => Err(type_error(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            ))
            .into()),
        }
    }

    // ---- subscripts ----

    pub(super) fn get_item(&self, container: &Object, index: &Object) -> Result<Object, RuntimeError> {
        match container {
            Object::List(l) => {
                let items = l.borrow();
                let i = seq_index(index, items.len(), "list", "list index out of range")?;
                Ok(items[i].clone())
            }
            Object::Tuple(t) => {
                let i = seq_index(index, t.items().len(), "tuple", "tuple index out of range")?;
                Ok(t.items()[i].clone())
            }
            Object::Str(s) => {
                let len = s.chars().count();
                let i = seq_index(index, len, "string", "string index out of range")?;
                Ok(Object::str(
                    s.chars().nth(i).map(String::from).unwrap_or_default(),
                ))
            }
            Object::Range(r) => {
                let len = usize::try_from(r.len()).unwrap_or(usize::MAX);
                let i = seq_index(index, len, "range", "range object index out of range")?;
                Ok(Object::Int(r.get(i as u64)))
            }
            Object::Dict(d) => {
                let key = index.hash_key()?;
                let found = d.borrow().get(&key).cloned();
                found.ok_or_else(|| RuntimeError::new(ErrorKind::Key, key_repr(index)))
            }
            other => Err(type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    fn set_item(&self, container: &Object, index: &Object, value: Object) -> Result<(), RuntimeError> {
        match container {
            Object::List(l) => {
                let mut items = l.borrow_mut();
                let len = items.len();
                let i = seq_index(index, len, "list", "list assignment index out of range")?;
                // The old element is dropped after the borrow ends.
                let old = std::mem::replace(&mut items[i], value);
                drop(items);
                drop(old);
                Ok(())
            }
            Object::Dict(d) => {
                let key = index.hash_key()?;
                d.borrow_mut().insert(key, index.clone(), value);
                Ok(())
            }
            other => Err(type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    fn eval_slice(
        &mut self,
        lower: &Option<Box<Expr>>,
        upper: &Option<Box<Expr>>,
        step: &Option<Box<Expr>>,
    ) -> Flow<SliceSpec> {
        let mut bound = |expr: &Option<Box<Expr>>| -> Flow<Option<i64>> {
            match expr {
                None => Ok(None),
                Some(expr) => match self.eval(expr)? {
                    Object::None => Ok(None),
                    Object::Int(i) => Ok(Some(i)),
                    Object::Bool(b) => Ok(Some(b as i64)),
                    _ => Err(type_error("slice indices must be integers or None").into()),
                },
            }
        };
        Ok(SliceSpec {
            lower: bound(lower)?,
            upper: bound(upper)?,
            step: bound(step)?,
        })
    }

    fn set_slice(&mut self, container: &Object, slice: &SliceSpec, value: &Object) -> Flow<()> {
        let Object::List(list) = container else {
            return Err(type_error(format!(
                "'{}' object does not support slice assignment",
                container.type_name()
            ))
            .into());
        };
        let replacement = self.collect(value)?;
        let len = list.borrow().len();
        let sel = slice.indices(len)?;
        if slice.step.unwrap_or(1) == 1 {
            let start = sel.start.clamp(0, len as i128) as usize;
            let stop = start + sel.count as usize;
            let total = len - (stop - start) + replacement.len();
            self.meter.check_alloc(total as u128 * SLOT_BYTES as u128)?;
            let removed: Vec<Object> = list.borrow_mut().splice(start..stop, replacement).collect();
            drop(removed);
            return Ok(());
        }
        if replacement.len() as i128 != sel.count {
            return Err(value_error(format!(
                "attempt to assign sequence of size {} to extended slice of size {}",
                replacement.len(),
                sel.count
            ))
            .into());
        }
        let mut old = Vec::with_capacity(replacement.len());
        {
            let mut items = list.borrow_mut();
            for (pos, value) in sel.positions().zip(replacement) {
                old.push(std::mem::replace(&mut items[pos], value));
            }
        }
        drop(old);
        Ok(())
    }

    // ---- iteration ----

    pub(super) fn iterate(&self, obj: &Object) -> Result<ObjIter, RuntimeError> {
        Ok(match obj {
            Object::List(l) => ObjIter::List {
                list: l.clone(),
                index: 0,
            },
            Object::Tuple(t) => ObjIter::Tuple {
                tuple: t.clone(),
                index: 0,
            },
            Object::Dict(d) => ObjIter::Snapshot(d.borrow().keys().into_iter()),
            Object::Str(s) => ObjIter::Chars {
                text: s.clone(),
                offset: 0,
            },
            Object::Range(r) => ObjIter::Range {
                range: *r,
                len: r.len(),
                index: 0,
            },
            other => {
                return Err(type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )))
            }
        })
    }

    /// Drains any iterable into a vector.
    pub(super) fn collect(&mut self, obj: &Object) -> Flow<Vec<Object>> {
        match obj {
            Object::List(l) => return Ok(l.borrow().clone()),
            Object::Tuple(t) => return Ok(t.items().to_vec()),
            _ => {}
        }
        let mut items = self.iterate(obj)?;
        if let Some(n) = items.len_hint() {
            self.meter.check_alloc(n as u128 * SLOT_BYTES as u128)?;
        }
        let mut out = Vec::new();
        while let Some(item) = items.next() {
            self.meter.tick()?;
            out.push(item);
        }
        Ok(out)
    }

    // ---- output ----

    pub(super) fn write_output(&mut self, text: &str) {
        if self.printed_truncated {
            return;
        }
        let room = MAX_PRINTED_BYTES.saturating_sub(self.printed.len());
        if text.len() <= room {
            self.printed.push_str(text);
            return;
        }
        let mut cut = room;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        self.printed.push_str(&text[..cut]);
        self.printed.push_str("\n[output truncated]\n");
        self.printed_truncated = true;
    }
}

enum Collector<'a> {
    List {
        elt: &'a Expr,
        items: Vec<Object>,
    },
    Dict {
        key: &'a Expr,
        value: &'a Expr,
        dict: Dict,
    },
}

/// Iterator over a script iterable. Lists are iterated live (appending
/// during a `for` loop extends it); dicts are snapshotted.
pub(crate) enum ObjIter {
    List { list: Rc<List>, index: usize },
    Tuple { tuple: Rc<Tuple>, index: usize },
    Snapshot(std::vec::IntoIter<Object>),
    Chars { text: Rc<str>, offset: usize },
    Range { range: RangeObj, len: u64, index: u64 },
}

impl ObjIter {
    pub fn next(&mut self) -> Option<Object> {
        match self {
            ObjIter::List { list, index } => {
                let item = list.borrow().get(*index).cloned();
                if item.is_some() {
                    *index += 1;
                }
                item
            }
            ObjIter::Tuple { tuple, index } => {
                let item = tuple.items().get(*index).cloned();
                if item.is_some() {
                    *index += 1;
                }
                item
            }
            ObjIter::Snapshot(items) => items.next(),
            ObjIter::Chars { text, offset } => {
                let c = text[*offset..].chars().next()?;
                *offset += c.len_utf8();
                Some(Object::str(c.to_string()))
            }
            ObjIter::Range { range, len, index } => {
                if *index >= *len {
                    return None;
                }
                let value = range.get(*index);
                *index += 1;
                Some(Object::Int(value))
            }
        }
    }

    /// Items left, when known without iterating.
    pub fn len_hint(&self) -> Option<u64> {
        match self {
            ObjIter::Range { len, index, .. } => Some(len - index),
            ObjIter::Snapshot(items) => Some(items.len() as u64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SliceSpec {
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
}

/// Concrete positions picked by a slice.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SliceIndices {
    start: i128,
    step: i128,
    count: i128,
}

impl SliceIndices {
    fn positions(&self) -> impl Iterator<Item = usize> {
        let (start, step) = (self.start, self.step);
        (0..self.count).map(move |k| (start + k * step) as usize)
    }
}

impl SliceSpec {
    fn indices(&self, len: usize) -> Result<SliceIndices, RuntimeError> {
        let step = self.step.unwrap_or(1) as i128;
        if step == 0 {
            return Err(value_error("slice step cannot be zero"));
        }
        let len = len as i128;
        let adjust = |bound: Option<i64>, default: i128| -> i128 {
            match bound {
                None => default,
                Some(v) => {
                    let mut v = v as i128;
                    if v < 0 {
                        v += len;
                        if v < 0 {
                            v = if step < 0 { -1 } else { 0 };
                        }
                    } else if v >= len {
                        v = if step < 0 { len - 1 } else { len };
                    }
                    v
                }
            }
        };
        let (start, stop) = if step > 0 {
            (adjust(self.lower, 0), adjust(self.upper, len))
        } else {
            (adjust(self.lower, len - 1), adjust(self.upper, -1))
        };
        let count = if step > 0 && stop > start {
            (stop - start - 1) / step + 1
        } else if step < 0 && start > stop {
            (start - stop - 1) / (-step) + 1
        } else {
            0
        };
        Ok(SliceIndices { start, step, count })
    }
}

fn get_slice(container: &Object, slice: &SliceSpec) -> Result<Object, RuntimeError> {
    match container {
        Object::List(l) => {
            let items = l.borrow();
            let sel = slice.indices(items.len())?;
            Ok(Object::list(sel.positions().map(|i| items[i].clone()).collect()))
        }
        Object::Tuple(t) => {
            let items = t.items();
            let sel = slice.indices(items.len())?;
            Ok(Object::tuple(sel.positions().map(|i| items[i].clone()).collect()))
        }
        Object::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let sel = slice.indices(chars.len())?;
            Ok(Object::str(sel.positions().map(|i| chars[i]).collect::<String>()))
        }
        Object::Range(r) => {
            let len = usize::try_from(r.len()).unwrap_or(usize::MAX);
            let sel = slice.indices(len)?;
            if sel.count == 0 {
                return Ok(Object::Range(RangeObj {
                    start: 0,
                    stop: 0,
                    step: 1,
                }));
            }
            let start = r.get(sel.start as u64) as i128;
            let step = r.step as i128 * sel.step;
            let stop = start + sel.count * step;
            let fits = |v: i128| i64::try_from(v).ok();
            match (fits(start), fits(stop), fits(step)) {
                (Some(start), Some(stop), Some(step)) => {
                    Ok(Object::Range(RangeObj { start, stop, step }))
                }
                _ => Err(RuntimeError::new(ErrorKind::Overflow, "range slice too large")),
            }
        }
        other => Err(type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn seq_index(index: &Object, len: usize, what: &str, out_of_range: &str) -> Result<usize, RuntimeError> {
    let i = index.as_int().ok_or_else(|| {
        type_error(format!(
            "{} indices must be integers or slices, not {}",
            what,
            index.type_name()
        ))
    })?;
    let len = len as i128;
    let mut i = i as i128;
    if i < 0 {
        i += len;
    }
    if i < 0 || i >= len {
        return Err(RuntimeError::new(ErrorKind::Index, out_of_range));
    }
    Ok(i as usize)
}

pub(super) fn get_attr(obj: Object, attr: &str) -> Result<Object, RuntimeError> {
    if attr.starts_with("__") {
        return Err(attribute_error(&obj, attr));
    }
    match &obj {
        Object::Capability(cap) => {
            if let Some(value) = cap.handle.attr(attr) {
                return Ok(Object::from_value(&value));
            }
            if cap.handle.has_method(attr) {
                return Ok(bind_method(obj.clone(), attr));
            }
            Err(RuntimeError::new(
                ErrorKind::Attribute,
                format!("capability '{}' has no attribute '{}'", cap.name, attr),
            ))
        }
        Object::Exception(e) if attr == "args" => Ok(Object::tuple(if e.message.is_empty() {
            Vec::new()
        } else {
            vec![Object::str(e.message.as_str())]
        })),
        Object::Range(r) => match attr {
            "start" => Ok(Object::Int(r.start)),
            "stop" => Ok(Object::Int(r.stop)),
            "step" => Ok(Object::Int(r.step)),
            _ => Err(attribute_error(&obj, attr)),
        },
        _ if methods::has_method(&obj, attr) => Ok(bind_method(obj.clone(), attr)),
        _ => Err(attribute_error(&obj, attr)),
    }
}

fn bind_method(receiver: Object, name: &str) -> Object {
    Object::Method(Rc::new(BoundMethod {
        receiver,
        name: name.to_string(),
    }))
}

pub(super) fn attribute_error(obj: &Object, attr: &str) -> RuntimeError {
    RuntimeError::new(
        ErrorKind::Attribute,
        format!("'{}' object has no attribute '{}'", obj.type_name(), attr),
    )
}

fn import_error(module: &str) -> RuntimeError {
    RuntimeError::new(ErrorKind::Import, format!("No module named '{}'", module))
}

fn unsupported(kind: &str) -> RuntimeError {
    RuntimeError::new(
        ErrorKind::Unsupported,
        format!("{} is not supported in sandboxed code", kind),
    )
}

fn handles(handler: &Handler, kind: ErrorKind) -> bool {
    handler.kinds.is_empty() || handler.kinds.iter().any(|name| kind.caught_by(name))
}

fn constant(c: &Constant) -> Object {
    match c {
        Constant::None => Object::None,
        Constant::Bool(b) => Object::Bool(*b),
        Constant::Int(i) => Object::Int(*i),
        Constant::Float(f) => Object::Float(*f),
        Constant::Str(s) => Object::str(s.as_str()),
    }
}

fn ordering(a: &Object, b: &Object, symbol: &str) -> Result<Option<Ordering>, RuntimeError> {
    a.py_cmp(b).map_err(|e| {
        if e.kind == ErrorKind::Type {
            type_error(format!(
                "'{}' not supported between instances of '{}' and '{}'",
                symbol,
                a.type_name(),
                b.type_name()
            ))
        } else {
            e
        }
    })
}

fn overflow() -> RuntimeError {
    RuntimeError::new(ErrorKind::Overflow, "integer overflow")
}

fn zero_division(message: &str) -> RuntimeError {
    RuntimeError::new(ErrorKind::ZeroDivision, message)
}

pub(super) fn int_op(op: BinOp, x: i64, y: i64) -> Result<Object, RuntimeError> {
    Ok(match op {
        BinOp::Add => Object::Int(x.checked_add(y).ok_or_else(overflow)?),
        BinOp::Sub => Object::Int(x.checked_sub(y).ok_or_else(overflow)?),
        BinOp::Mul => Object::Int(x.checked_mul(y).ok_or_else(overflow)?),
        BinOp::Div => {
            if y == 0 {
                return Err(zero_division("division by zero"));
            }
            Object::Float(x as f64 / y as f64)
        }
        BinOp::FloorDiv => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            let q = x.checked_div(y).ok_or_else(overflow)?;
            if x % y != 0 && ((x < 0) != (y < 0)) {
                Object::Int(q - 1)
            } else {
                Object::Int(q)
            }
        }
        BinOp::Mod => {
            if y == 0 {
                return Err(zero_division("integer modulo by zero"));
            }
            if y == -1 {
                return Ok(Object::Int(0));
            }
            let r = x % y;
            if r != 0 && ((r < 0) != (y < 0)) {
                Object::Int(r + y)
            } else {
                Object::Int(r)
            }
        }
        BinOp::Pow => {
            if y < 0 {
                if x == 0 {
                    return Err(zero_division("0.0 cannot be raised to a negative power"));
                }
                return Ok(Object::Float((x as f64).powf(y as f64)));
            }
            match x {
                0 => Object::Int(if y == 0 { 1 } else { 0 }),
                1 => Object::Int(1),
                -1 => Object::Int(if y % 2 == 0 { 1 } else { -1 }),
                _ => Object::Int(
                    u32::try_from(y)
                        .ok()
                        .and_then(|e| x.checked_pow(e))
                        .ok_or_else(overflow)?,
                ),
            }
        }
    })
}

/// Floor quotient and modulo with the sign of the divisor.
fn float_divmod(x: f64, y: f64) -> (f64, f64) {
    let mut m = x % y;
    let mut div = (x - m) / y;
    if m != 0.0 {
        if (y < 0.0) != (m < 0.0) {
            m += y;
            div -= 1.0;
        }
    } else {
        m = 0.0_f64.copysign(y);
    }
    let floordiv = if div != 0.0 {
        let mut f = div.floor();
        if div - f > 0.5 {
            f += 1.0;
        }
        f
    } else {
        0.0_f64.copysign(x / y)
    };
    (floordiv, m)
}

pub(super) fn float_op(op: BinOp, x: f64, y: f64) -> Result<Object, RuntimeError> {
    Ok(Object::Float(match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Err(zero_division("float division by zero"));
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Err(zero_division("float floor division by zero"));
            }
            float_divmod(x, y).0
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(zero_division("float modulo by zero"));
            }
            float_divmod(x, y).1
        }
        BinOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(zero_division("0.0 cannot be raised to a negative power"));
            }
            if x < 0.0 && y.is_finite() && y.fract() != 0.0 {
                return Err(value_error(
                    "negative number cannot be raised to a fractional power",
                ));
            }
            let r = x.powf(y);
            if r.is_infinite() && x.is_finite() && y.is_finite() {
                return Err(RuntimeError::new(
                    ErrorKind::Overflow,
                    "numerical result out of range",
                ));
            }
            r
        }
    }))
}

fn unary(op: UnaryOp, value: Object) -> Result<Object, RuntimeError> {
    match (op, &value) {
        (UnaryOp::Not, _) => Ok(Object::Bool(!value.truthy())),
        (UnaryOp::Neg, Object::Int(_) | Object::Bool(_)) => Ok(Object::Int(
            value.as_int().unwrap_or(0).checked_neg().ok_or_else(overflow)?,
        )),
        (UnaryOp::Neg, Object::Float(f)) => Ok(Object::Float(-f)),
        (UnaryOp::Pos, Object::Int(_) | Object::Bool(_)) => {
            Ok(Object::Int(value.as_int().unwrap_or(0)))
        }
        (UnaryOp::Pos, Object::Float(_)) => Ok(value),
        _ => Err(type_error(format!(
            "bad operand type for unary {}: '{}'",
            if op == UnaryOp::Neg { "-" } else { "+" },
            value.type_name()
        ))),
    }
}

/// `repr` of a key for `KeyError` messages.
pub(super) fn key_repr(key: &Object) -> String {
    key.repr().unwrap_or_else(|_| quote_str(key.type_name()))
}
