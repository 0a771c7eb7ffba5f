//! Runtime objects of the evaluator.
//!
//! Objects are single-threaded (`Rc` / `RefCell`) and never leave the
//! evaluator; anything that crosses the boundary is converted to
//! [`Value`](crate::value::Value) first.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use super::error::{type_error, value_error, ErrorKind, RuntimeError};
use super::format::{float_repr, quote_str};
use crate::capability::Capability;
use crate::value::Value;

/// Depth limit for recursive operations on nested containers.
pub(crate) const MAX_DEPTH: usize = 256;

/// Approximate in-memory size of one object slot, used for allocation checks.
pub(crate) const SLOT_BYTES: usize = std::mem::size_of::<Object>();

#[derive(Debug, Clone)]
pub(crate) enum Object {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<List>),
    Tuple(Rc<Tuple>),
    Dict(Rc<DictCell>),
    Range(RangeObj),
    Builtin(Builtin),
    Method(Rc<BoundMethod>),
    Capability(Rc<CapabilityObj>),
    Exception(Rc<ExceptionObj>),
}

// ---- containers ----

#[derive(Debug, Default)]
pub(crate) struct List(RefCell<Vec<Object>>);

impl List {
    pub fn new(items: Vec<Object>) -> Rc<List> {
        Rc::new(List(RefCell::new(items)))
    }

    pub fn borrow(&self) -> Ref<'_, Vec<Object>> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Vec<Object>> {
        self.0.borrow_mut()
    }
}

impl Drop for List {
    fn drop(&mut self) {
        defer_drop(std::mem::take(self.0.get_mut()));
    }
}

#[derive(Debug, Default)]
pub(crate) struct Tuple(Vec<Object>);

impl Tuple {
    pub fn new(items: Vec<Object>) -> Rc<Tuple> {
        Rc::new(Tuple(items))
    }

    pub fn items(&self) -> &[Object] {
        &self.0
    }
}

impl Drop for Tuple {
    fn drop(&mut self) {
        defer_drop(std::mem::take(&mut self.0));
    }
}

#[derive(Debug, Default)]
pub(crate) struct DictCell(RefCell<Dict>);

impl DictCell {
    pub fn new(dict: Dict) -> Rc<DictCell> {
        Rc::new(DictCell(RefCell::new(dict)))
    }

    pub fn borrow(&self) -> Ref<'_, Dict> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Dict> {
        self.0.borrow_mut()
    }
}

impl Drop for DictCell {
    fn drop(&mut self) {
        let entries = std::mem::take(&mut self.0.get_mut().entries);
        let mut items = Vec::with_capacity(entries.len() * 2);
        for entry in entries {
            items.push(entry.key);
            items.push(entry.value);
        }
        defer_drop(items);
    }
}

thread_local! {
    static DROP_QUEUE: RefCell<Vec<Object>> = const { RefCell::new(Vec::new()) };
    static DRAINING: Cell<bool> = const { Cell::new(false) };
}

/// Drops container contents iteratively so deeply nested structures cannot
/// overflow the stack.
fn defer_drop(items: Vec<Object>) {
    if items.is_empty() {
        return;
    }
    let queued = DROP_QUEUE
        .try_with(|q| q.borrow_mut().extend(items))
        .is_ok();
    if !queued {
        return;
    }
    if DRAINING.try_with(|d| d.replace(true)).unwrap_or(true) {
        return;
    }
    loop {
        let next = DROP_QUEUE
            .try_with(|q| q.borrow_mut().pop())
            .ok()
            .flatten();
        match next {
            Some(obj) => drop(obj),
            None => break,
        }
    }
    let _ = DRAINING.try_with(|d| d.set(false));
}

/// Hashable projection of a dict key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum HashKey {
    None,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<HashKey>),
}

#[derive(Debug)]
pub(crate) struct DictEntry {
    pub hash: HashKey,
    pub key: Object,
    pub value: Object,
}

/// Insertion-ordered dictionary.
#[derive(Debug, Default)]
pub(crate) struct Dict {
    entries: Vec<DictEntry>,
    index: HashMap<HashKey, usize>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, hash: &HashKey) -> Option<&Object> {
        self.index.get(hash).map(|&i| &self.entries[i].value)
    }

    pub fn contains(&self, hash: &HashKey) -> bool {
        self.index.contains_key(hash)
    }

    /// Inserts or replaces; an existing key keeps its original position.
    pub fn insert(&mut self, hash: HashKey, key: Object, value: Object) {
        if let Some(&i) = self.index.get(&hash) {
            self.entries[i].value = value;
            return;
        }
        self.index.insert(hash.clone(), self.entries.len());
        self.entries.push(DictEntry { hash, key, value });
    }

    pub fn remove(&mut self, hash: &HashKey) -> Option<(Object, Object)> {
        let i = self.index.remove(hash)?;
        let entry = self.entries.remove(i);
        for (offset, later) in self.entries[i..].iter().enumerate() {
            self.index.insert(later.hash.clone(), i + offset);
        }
        Some((entry.key, entry.value))
    }

    pub fn pop_last(&mut self) -> Option<(Object, Object)> {
        let entry = self.entries.pop()?;
        self.index.remove(&entry.hash);
        Some((entry.key, entry.value))
    }

    pub fn clear(&mut self) {
        let old = std::mem::take(&mut self.entries);
        self.index.clear();
        let mut items = Vec::with_capacity(old.len() * 2);
        for entry in old {
            items.push(entry.key);
            items.push(entry.value);
        }
        defer_drop(items);
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Object, &Object)> {
        self.entries.iter().map(|e| (&e.key, &e.value))
    }

    pub fn keys(&self) -> Vec<Object> {
        self.entries.iter().map(|e| e.key.clone()).collect()
    }

    pub fn values(&self) -> Vec<Object> {
        self.entries.iter().map(|e| e.value.clone()).collect()
    }

    pub fn items(&self) -> Vec<Object> {
        self.entries
            .iter()
            .map(|e| Object::tuple(vec![e.key.clone(), e.value.clone()]))
            .collect()
    }

    pub fn copy(&self) -> Dict {
        let mut out = Dict::new();
        for e in &self.entries {
            out.insert(e.hash.clone(), e.key.clone(), e.value.clone());
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RangeObj {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeObj {
    pub fn len(&self) -> u64 {
        let (start, stop, step) = (self.start as i128, self.stop as i128, self.step as i128);
        let n = if step > 0 && start < stop {
            (stop - start - 1) / step + 1
        } else if step < 0 && start > stop {
            (start - stop - 1) / (-step) + 1
        } else {
            0
        };
        n as u64
    }

    pub fn get(&self, index: u64) -> i64 {
        (self.start as i128 + index as i128 * self.step as i128) as i64
    }

    pub fn contains(&self, value: i64) -> bool {
        let (v, start, stop, step) = (
            value as i128,
            self.start as i128,
            self.stop as i128,
            self.step as i128,
        );
        let in_bounds = if step > 0 {
            v >= start && v < stop
        } else {
            v <= start && v > stop
        };
        in_bounds && (v - start) % step == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    Abs,
    All,
    Any,
    Bin,
    Bool,
    Chr,
    Dict,
    Divmod,
    Enumerate,
    Filter,
    Float,
    Format,
    Hex,
    Int,
    Len,
    List,
    Map,
    Max,
    Min,
    Oct,
    Ord,
    Pow,
    Print,
    Range,
    Repr,
    Reversed,
    Round,
    Sorted,
    Str,
    Sum,
    Tuple,
    Type,
    Zip,
    /// Exception constructor.
    Error(ErrorKind),
    /// Type object without a constructor (result of `type(None)` and similar).
    NamedType(&'static str),
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Builtin> {
        if let Some(kind) = ErrorKind::from_constructor(name) {
            return Some(Builtin::Error(kind));
        }
        Some(match name {
            "abs" => Builtin::Abs,
            "all" => Builtin::All,
            "any" => Builtin::Any,
            "bin" => Builtin::Bin,
            "bool" => Builtin::Bool,
            "chr" => Builtin::Chr,
            "dict" => Builtin::Dict,
            "divmod" => Builtin::Divmod,
            "enumerate" => Builtin::Enumerate,
            "filter" => Builtin::Filter,
            "float" => Builtin::Float,
            "format" => Builtin::Format,
            "hex" => Builtin::Hex,
            "int" => Builtin::Int,
            "len" => Builtin::Len,
            "list" => Builtin::List,
            "map" => Builtin::Map,
            "max" => Builtin::Max,
            "min" => Builtin::Min,
            "oct" => Builtin::Oct,
            "ord" => Builtin::Ord,
            "pow" => Builtin::Pow,
            "print" => Builtin::Print,
            "range" => Builtin::Range,
            "repr" => Builtin::Repr,
            "reversed" => Builtin::Reversed,
            "round" => Builtin::Round,
            "sorted" => Builtin::Sorted,
            "str" => Builtin::Str,
            "sum" => Builtin::Sum,
            "tuple" => Builtin::Tuple,
            "type" => Builtin::Type,
            "zip" => Builtin::Zip,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Abs => "abs",
            Builtin::All => "all",
            Builtin::Any => "any",
            Builtin::Bin => "bin",
            Builtin::Bool => "bool",
            Builtin::Chr => "chr",
            Builtin::Dict => "dict",
            Builtin::Divmod => "divmod",
            Builtin::Enumerate => "enumerate",
            Builtin::Filter => "filter",
            Builtin::Float => "float",
            Builtin::Format => "format",
            Builtin::Hex => "hex",
            Builtin::Int => "int",
            Builtin::Len => "len",
            Builtin::List => "list",
            Builtin::Map => "map",
            Builtin::Max => "max",
            Builtin::Min => "min",
            Builtin::Oct => "oct",
            Builtin::Ord => "ord",
            Builtin::Pow => "pow",
            Builtin::Print => "print",
            Builtin::Range => "range",
            Builtin::Repr => "repr",
            Builtin::Reversed => "reversed",
            Builtin::Round => "round",
            Builtin::Sorted => "sorted",
            Builtin::Str => "str",
            Builtin::Sum => "sum",
            Builtin::Tuple => "tuple",
            Builtin::Type => "type",
            Builtin::Zip => "zip",
            Builtin::Error(kind) => kind.as_str(),
            Builtin::NamedType(name) => name,
        }
    }

    /// Builtins that are types rather than functions.
    pub fn is_type(&self) -> bool {
        matches!(
            self,
            Builtin::Bool
                | Builtin::Dict
                | Builtin::Float
                | Builtin::Int
                | Builtin::List
                | Builtin::Range
                | Builtin::Str
                | Builtin::Tuple
                | Builtin::Type
                | Builtin::Error(_)
                | Builtin::NamedType(_)
        )
    }
}

#[derive(Debug)]
pub(crate) struct BoundMethod {
    pub receiver: Object,
    pub name: String,
}

#[derive(Debug)]
pub(crate) struct CapabilityObj {
    pub name: String,
    pub handle: Arc<dyn Capability>,
}

#[derive(Debug)]
pub(crate) struct ExceptionObj {
    pub kind: ErrorKind,
    pub message: String,
}

// ---- construction & inspection ----

impl Object {
    pub fn str(s: impl Into<Rc<str>>) -> Object {
        Object::Str(s.into())
    }

    pub fn list(items: Vec<Object>) -> Object {
        Object::List(List::new(items))
    }

    pub fn tuple(items: Vec<Object>) -> Object {
        Object::Tuple(Tuple::new(items))
    }

    pub fn dict(dict: Dict) -> Object {
        Object::Dict(DictCell::new(dict))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Object::None => "NoneType",
            Object::Bool(_) => "bool",
            Object::Int(_) => "int",
            Object::Float(_) => "float",
            Object::Str(_) => "str",
            Object::List(_) => "list",
            Object::Tuple(_) => "tuple",
            Object::Dict(_) => "dict",
            Object::Range(_) => "range",
            Object::Builtin(b) if b.is_type() => "type",
            Object::Builtin(_) => "builtin_function_or_method",
            Object::Method(_) => "method",
            Object::Capability(_) => "capability",
            Object::Exception(e) => e.kind.as_str(),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Object::None => false,
            Object::Bool(b) => *b,
            Object::Int(i) => *i != 0,
            Object::Float(f) => *f != 0.0,
            Object::Str(s) => !s.is_empty(),
            Object::List(l) => !l.borrow().is_empty(),
            Object::Tuple(t) => !t.items().is_empty(),
            Object::Dict(d) => !d.borrow().is_empty(),
            Object::Range(r) => r.len() > 0,
            _ => true,
        }
    }

    /// Integer view (bools count as integers).
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Object::Int(i) => Some(*i),
            Object::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Numeric view used for mixed int/float arithmetic.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Object::Int(i) => Some(*i as f64),
            Object::Bool(b) => Some(*b as i64 as f64),
            Object::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn hash_key(&self) -> Result<HashKey, RuntimeError> {
        self.hash_key_at(0)
    }

    fn hash_key_at(&self, depth: usize) -> Result<HashKey, RuntimeError> {
        if depth > MAX_DEPTH {
            return Err(recursion_error());
        }
        Ok(match self {
            Object::None => HashKey::None,
            Object::Bool(b) => HashKey::Int(*b as i64),
            Object::Int(i) => HashKey::Int(*i),
            Object::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() && f.abs() < 9.2e18 {
                    HashKey::Int(*f as i64)
                } else {
                    HashKey::Float(f.to_bits())
                }
            }
            Object::Str(s) => HashKey::Str(s.clone()),
            Object::Tuple(t) => HashKey::Tuple(
                t.items()
                    .iter()
                    .map(|item| item.hash_key_at(depth + 1))
                    .collect::<Result<_, _>>()?,
            ),
            other => {
                return Err(type_error(format!(
                    "unhashable type: '{}'",
                    other.type_name()
                )))
            }
        })
    }

    // ---- text ----

    /// `str()` rendering.
    pub fn to_str(&self) -> Result<String, RuntimeError> {
        match self {
            Object::Str(s) => Ok(s.to_string()),
            Object::Exception(e) => Ok(e.message.clone()),
            other => other.repr(),
        }
    }

    /// `repr()` rendering; cycles print as `[...]` / `{...}`.
    pub fn repr(&self) -> Result<String, RuntimeError> {
        let mut out = String::new();
        let mut path = Vec::new();
        self.write_repr(&mut out, &mut path)?;
        Ok(out)
    }

    fn write_repr(&self, out: &mut String, path: &mut Vec<*const ()>) -> Result<(), RuntimeError> {
        if path.len() > MAX_DEPTH {
            return Err(recursion_error());
        }
        match self {
            Object::None => out.push_str("None"),
            Object::Bool(true) => out.push_str("True"),
            Object::Bool(false) => out.push_str("False"),
            Object::Int(i) => out.push_str(&i.to_string()),
            Object::Float(f) => out.push_str(&float_repr(*f)),
            Object::Str(s) => out.push_str(&quote_str(s)),
            Object::List(l) => {
                let ptr = Rc::as_ptr(l) as *const ();
                if path.contains(&ptr) {
                    out.push_str("[...]");
                    return Ok(());
                }
                path.push(ptr);
                out.push('[');
                let items = l.borrow().clone();
                write_seq(&items, out, path)?;
                out.push(']');
                path.pop();
            }
            Object::Tuple(t) => {
                out.push('(');
                path.push(Rc::as_ptr(t) as *const ());
                write_seq(t.items(), out, path)?;
                path.pop();
                if t.items().len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Object::Dict(d) => {
                let ptr = Rc::as_ptr(d) as *const ();
                if path.contains(&ptr) {
                    out.push_str("{...}");
                    return Ok(());
                }
                path.push(ptr);
                out.push('{');
                let pairs: Vec<(Object, Object)> = d
                    .borrow()
                    .entries()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.write_repr(out, path)?;
                    out.push_str(": ");
                    v.write_repr(out, path)?;
                }
                out.push('}');
                path.pop();
            }
            Object::Range(r) => {
                if r.step == 1 {
                    out.push_str(&format!("range({}, {})", r.start, r.stop));
                } else {
                    out.push_str(&format!("range({}, {}, {})", r.start, r.stop, r.step));
                }
            }
            Object::Builtin(b) if b.is_type() => {
                out.push_str(&format!("<class '{}'>", b.name()));
            }
            Object::Builtin(b) => {
                out.push_str(&format!("<built-in function {}>", b.name()));
            }
            Object::Method(m) => {
                out.push_str(&format!(
                    "<built-in method {} of {} object>",
                    m.name,
                    m.receiver.type_name()
                ));
            }
            Object::Capability(c) => out.push_str(&format!("<capability '{}'>", c.name)),
            Object::Exception(e) => {
                out.push_str(&format!("{}({})", e.kind.as_str(), quote_str(&e.message)));
            }
        }
        Ok(())
    }

    // ---- comparison ----

    pub fn py_eq(&self, other: &Object) -> Result<bool, RuntimeError> {
        eq_at(self, other, 0)
    }

    /// Ordering for `<`-style comparisons; `None` when unordered (NaN).
    pub fn py_cmp(&self, other: &Object) -> Result<Option<Ordering>, RuntimeError> {
        cmp_at(self, other, 0)
    }

    pub fn is_same(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::None, Object::None) => true,
            (Object::Bool(a), Object::Bool(b)) => a == b,
            (Object::Int(a), Object::Int(b)) => a == b,
            (Object::Float(a), Object::Float(b)) => a.to_bits() == b.to_bits(),
            (Object::Str(a), Object::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Object::List(a), Object::List(b)) => Rc::ptr_eq(a, b),
            (Object::Tuple(a), Object::Tuple(b)) => Rc::ptr_eq(a, b),
            (Object::Dict(a), Object::Dict(b)) => Rc::ptr_eq(a, b),
            (Object::Builtin(a), Object::Builtin(b)) => a == b,
            (Object::Capability(a), Object::Capability(b)) => Rc::ptr_eq(a, b),
            (Object::Exception(a), Object::Exception(b)) => Rc::ptr_eq(a, b),
            (Object::Method(a), Object::Method(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    // ---- boundary conversion ----

    pub fn to_value(&self) -> Result<Value, RuntimeError> {
        let mut path = Vec::new();
        self.to_value_at(&mut path)
    }

    fn to_value_at(&self, path: &mut Vec<*const ()>) -> Result<Value, RuntimeError> {
        if path.len() > MAX_DEPTH {
            return Err(value_error("value is nested too deeply to export"));
        }
        Ok(match self {
            Object::None => Value::None,
            Object::Bool(b) => Value::Bool(*b),
            Object::Int(i) => Value::Int(*i),
            Object::Float(f) => Value::Float(*f),
            Object::Str(s) => Value::Str(s.to_string()),
            Object::List(l) => {
                enter_path(path, Rc::as_ptr(l) as *const ())?;
                let items = l.borrow().clone();
                let out = items
                    .iter()
                    .map(|item| item.to_value_at(path))
                    .collect::<Result<_, _>>()?;
                path.pop();
                Value::List(out)
            }
            Object::Tuple(t) => {
                enter_path(path, Rc::as_ptr(t) as *const ())?;
                let out = t
                    .items()
                    .iter()
                    .map(|item| item.to_value_at(path))
                    .collect::<Result<_, _>>()?;
                path.pop();
                Value::Tuple(out)
            }
            Object::Dict(d) => {
                enter_path(path, Rc::as_ptr(d) as *const ())?;
                let pairs: Vec<(Object, Object)> = d
                    .borrow()
                    .entries()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let mut out = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    out.push((k.to_value_at(path)?, v.to_value_at(path)?));
                }
                path.pop();
                Value::Dict(out)
            }
            Object::Range(r) => {
                const MAX_EXPORTED_RANGE: u64 = 1_000_000;
                if r.len() > MAX_EXPORTED_RANGE {
                    return Err(value_error("range is too large to export"));
                }
                Value::List((0..r.len()).map(|i| Value::Int(r.get(i))).collect())
            }
            Object::Capability(c) => Value::Capability(c.name.clone()),
            other => {
                return Err(type_error(format!(
                    "cannot export value of type '{}'",
                    other.type_name()
                )))
            }
        })
    }

    pub fn from_value(value: &Value) -> Object {
        match value {
            Value::None => Object::None,
            Value::Bool(b) => Object::Bool(*b),
            Value::Int(i) => Object::Int(*i),
            Value::Float(f) => Object::Float(*f),
            Value::Str(s) => Object::str(s.as_str()),
            Value::List(items) => Object::list(items.iter().map(Object::from_value).collect()),
            Value::Tuple(items) => Object::tuple(items.iter().map(Object::from_value).collect()),
            Value::Dict(entries) => {
                let mut dict = Dict::new();
                for (k, v) in entries {
                    let key = Object::from_value(k);
                    // Capability results are plain data; unhashable keys are rendered.
                    let key = match key.hash_key() {
                        Ok(_) => key,
                        Err(_) => Object::str(k.to_string()),
                    };
                    if let Ok(hash) = key.hash_key() {
                        dict.insert(hash, key, Object::from_value(v));
                    }
                }
                Object::dict(dict)
            }
            Value::Capability(name) => Object::str(format!("<capability '{}'>", name)),
        }
    }
}

fn enter_path(path: &mut Vec<*const ()>, ptr: *const ()) -> Result<(), RuntimeError> {
    if path.contains(&ptr) {
        return Err(value_error("value contains a reference cycle"));
    }
    path.push(ptr);
    Ok(())
}

fn write_seq(items: &[Object], out: &mut String, path: &mut Vec<*const ()>) -> Result<(), RuntimeError> {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out, path)?;
    }
    Ok(())
}

pub(crate) fn recursion_error() -> RuntimeError {
    RuntimeError::new(
        ErrorKind::Recursion,
        "maximum recursion depth exceeded",
    )
}

fn eq_at(a: &Object, b: &Object, depth: usize) -> Result<bool, RuntimeError> {
    if depth > MAX_DEPTH {
        return Err(recursion_error());
    }
    Ok(match (a, b) {
        (Object::None, Object::None) => true,
        (Object::Str(x), Object::Str(y)) => x == y,
        (Object::Int(_) | Object::Bool(_), Object::Int(_) | Object::Bool(_)) => {
            a.as_int() == b.as_int()
        }
        (
            Object::Int(_) | Object::Bool(_) | Object::Float(_),
            Object::Int(_) | Object::Bool(_) | Object::Float(_),
        ) => a.as_f64() == b.as_f64(),
        (Object::List(x), Object::List(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let (xs, ys) = (x.borrow().clone(), y.borrow().clone());
            seq_eq(&xs, &ys, depth)?
        }
        (Object::Tuple(x), Object::Tuple(y)) => {
            Rc::ptr_eq(x, y) || seq_eq(x.items(), y.items(), depth)?
        }
        (Object::Dict(x), Object::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let (xd, yd) = (x.borrow(), y.borrow());
            if xd.len() != yd.len() {
                return Ok(false);
            }
            let pairs: Vec<(HashKey, Object, Option<Object>)> = xd
                .entries
                .iter()
                .map(|e| (e.hash.clone(), e.value.clone(), yd.get(&e.hash).cloned()))
                .collect();
            drop((xd, yd));
            for (_, xv, yv) in pairs {
                match yv {
                    Some(yv) if eq_at(&xv, &yv, depth + 1)? => {}
                    _ => return Ok(false),
                }
            }
            true
        }
        (Object::Range(x), Object::Range(y)) => {
            let (lx, ly) = (x.len(), y.len());
            lx == ly && (lx == 0 || (x.start == y.start && (lx == 1 || x.step == y.step)))
        }
        (Object::Exception(x), Object::Exception(y)) => Rc::ptr_eq(x, y),
        _ => a.is_same(b),
    })
}

fn seq_eq(xs: &[Object], ys: &[Object], depth: usize) -> Result<bool, RuntimeError> {
    if xs.len() != ys.len() {
        return Ok(false);
    }
    for (x, y) in xs.iter().zip(ys) {
        if !eq_at(x, y, depth + 1)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn cmp_at(a: &Object, b: &Object, depth: usize) -> Result<Option<Ordering>, RuntimeError> {
    if depth > MAX_DEPTH {
        return Err(recursion_error());
    }
    match (a, b) {
        (Object::Int(_) | Object::Bool(_), Object::Int(_) | Object::Bool(_)) => {
            Ok(a.as_int().partial_cmp(&b.as_int()))
        }
        (
            Object::Int(_) | Object::Bool(_) | Object::Float(_),
            Object::Int(_) | Object::Bool(_) | Object::Float(_),
        ) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(x.partial_cmp(&y)),
            _ => Ok(None),
        },
        (Object::Str(x), Object::Str(y)) => Ok(Some(x.cmp(y))),
        (Object::List(x), Object::List(y)) => {
            let (xs, ys) = (x.borrow().clone(), y.borrow().clone());
            seq_cmp(&xs, &ys, depth)
        }
        (Object::Tuple(x), Object::Tuple(y)) => seq_cmp(x.items(), y.items(), depth),
        _ => Err(type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn seq_cmp(xs: &[Object], ys: &[Object], depth: usize) -> Result<Option<Ordering>, RuntimeError> {
    for (x, y) in xs.iter().zip(ys) {
        if !eq_at(x, y, depth + 1)? {
            return cmp_at(x, y, depth + 1);
        }
    }
    Ok(Some(xs.len().cmp(&ys.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cyclic_list_repr() {
        let list = List::new(vec![Object::Int(1)]);
        list.borrow_mut().push(Object::List(list.clone()));
        let obj = Object::List(list.clone());
        assert_eq!(obj.repr().unwrap(), "[1, [...]]");
        assert!(obj.to_value().is_err());
        // break the cycle so the test does not leak
        list.borrow_mut().clear();
    }

    #[test]
    fn test_deep_nesting_drops_without_overflow() {
        let mut obj = Object::list(Vec::new());
        for _ in 0..200_000 {
            obj = Object::list(vec![obj]);
        }
        drop(obj);
    }

    #[test]
    fn test_numeric_equality_and_hashing_agree() {
        assert!(Object::Int(1).py_eq(&Object::Float(1.0)).unwrap());
        assert!(Object::Bool(true).py_eq(&Object::Int(1)).unwrap());
        assert_eq!(
            Object::Int(1).hash_key().unwrap(),
            Object::Float(1.0).hash_key().unwrap()
        );
        assert!(Object::list(vec![]).hash_key().is_err());
    }

    #[test]
    fn test_nan_is_unordered() {
        let nan = Object::Float(f64::NAN);
        assert_eq!(nan.py_cmp(&Object::Float(1.0)).unwrap(), None);
        assert!(!nan.py_eq(&nan).unwrap());
    }

    #[test]
    fn test_dict_preserves_insertion_order_after_removal() {
        let mut d = Dict::new();
        for (i, k) in ["a", "b", "c"].iter().enumerate() {
            let key = Object::str(*k);
            d.insert(key.hash_key().unwrap(), key, Object::Int(i as i64));
        }
        d.remove(&HashKey::Str("a".into()));
        let keys: Vec<String> = d.keys().iter().map(|k| k.to_str().unwrap()).collect();
        assert_eq!(keys, vec!["b", "c"]);
        assert!(matches!(d.get(&HashKey::Str("c".into())), Some(Object::Int(2))));
    }

    #[test]
    fn test_range_len_and_contains() {
        let r = RangeObj { start: 10, stop: 0, step: -3 };
        assert_eq!(r.len(), 4);
        assert!(r.contains(4));
        assert!(!r.contains(5));
    }
}
