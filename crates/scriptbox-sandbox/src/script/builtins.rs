//! Allow-listed primitive functions and type constructors.

use std::cmp::Ordering;
use std::rc::Rc;

use super::ast::BinOp;
use super::error::{type_error, value_error, ErrorKind, RuntimeError};
use super::format::{format_object, quote_str};
use super::interp::{Flow, Interpreter, Unwind};
use super::object::{Builtin, Dict, ExceptionObj, Object, RangeObj};

/// Call arguments: positional values plus keyword values consumed by name.
pub(super) struct Args {
    name: String,
    pub pos: Vec<Object>,
    kw: Vec<(String, Object)>,
}

impl Args {
    pub fn new(name: impl Into<String>, pos: Vec<Object>, kw: Vec<(String, Object)>) -> Self {
        Self {
            name: name.into(),
            pos,
            kw,
        }
    }

    pub fn arity(&self, min: usize, max: usize) -> Result<(), RuntimeError> {
        let given = self.pos.len();
        if given >= min && given <= max {
            return Ok(());
        }
        let plural = |n: usize| if n == 1 { "" } else { "s" };
        let message = if min == max {
            format!(
                "{}() takes exactly {} argument{} ({} given)",
                self.name,
                min,
                plural(min),
                given
            )
        } else if given < min {
            format!(
                "{}() takes at least {} argument{} ({} given)",
                self.name,
                min,
                plural(min),
                given
            )
        } else {
            format!(
                "{}() takes at most {} argument{} ({} given)",
                self.name,
                max,
                plural(max),
                given
            )
        };
        Err(type_error(message))
    }

    pub fn get(&self, index: usize) -> Option<&Object> {
        self.pos.get(index)
    }

    /// Removes and returns keyword argument `key`.
    pub fn kwarg(&mut self, key: &str) -> Option<Object> {
        let i = self.kw.iter().position(|(k, _)| k == key)?;
        Some(self.kw.remove(i).1)
    }

    /// Positional argument `index`, or keyword `key` when not given positionally.
    pub fn take(&mut self, index: usize, key: &str) -> Option<Object> {
        match self.pos.get(index) {
            Some(value) => Some(value.clone()),
            None => self.kwarg(key),
        }
    }

    /// Fails on any keyword argument not consumed yet.
    pub fn finish(&self) -> Result<(), RuntimeError> {
        match self.kw.first() {
            Some((key, _)) => Err(type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                self.name, key
            ))),
            None => Ok(()),
        }
    }

    pub fn into_parts(self) -> (Vec<Object>, Vec<(String, Object)>) {
        (self.pos, self.kw)
    }

    pub fn no_kwargs(&self) -> Result<(), RuntimeError> {
        if self.kw.is_empty() {
            Ok(())
        } else {
            Err(type_error(format!(
                "{}() takes no keyword arguments",
                self.name
            )))
        }
    }
}

pub(super) fn int_arg(value: &Object) -> Result<i64, RuntimeError> {
    value.as_int().ok_or_else(|| {
        type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

pub(super) fn str_arg<'a>(value: &'a Object, what: &str) -> Result<&'a str, RuntimeError> {
    match value {
        Object::Str(s) => Ok(s),
        other => Err(type_error(format!(
            "{} must be str, not {}",
            what,
            other.type_name()
        ))),
    }
}

impl Interpreter<'_> {
    pub(super) fn call_builtin(
        &mut self,
        builtin: Builtin,
        pos: Vec<Object>,
        kw: Vec<(String, Object)>,
    ) -> Flow<Object> {
        let mut args = Args::new(builtin.name(), pos, kw);
        match builtin {
            Builtin::Abs => {
                args.no_kwargs()?;
                args.arity(1, 1)?;
                Ok(abs(&args.pos[0])?)
            }
            Builtin::All | Builtin::Any => {
                args.no_kwargs()?;
                args.arity(1, 1)?;
                let want = builtin == Builtin::Any;
                let mut items = self.iterate(&args.pos[0])?;
                while let Some(item) = items.next() {
                    self.meter.tick()?;
                    if item.truthy() == want {
                        return Ok(Object::Bool(want));
                    }
                }
                Ok(Object::Bool(!want))
            }
            Builtin::Bin | Builtin::Hex | Builtin::Oct => {
                args.no_kwargs()?;
                args.arity(1, 1)?;
                let value = int_arg(&args.pos[0])?;
                let digits = match builtin {
                    Builtin::Bin => format!("0b{:b}", value.unsigned_abs()),
                    Builtin::Hex => format!("0x{:x}", value.unsigned_abs()),
                    _ => format!("0o{:o}", value.unsigned_abs()),
                };
                let sign = if value < 0 { "-" } else { "" };
                Ok(Object::str(format!("{}{}", sign, digits)))
            }
            Builtin::Bool => {
                args.no_kwargs()?;
                args.arity(0, 1)?;
                Ok(Object::Bool(args.get(0).is_some_and(Object::truthy)))
            }
            Builtin::Chr => {
                args.no_kwargs()?;
                args.arity(1, 1)?;
                let code = int_arg(&args.pos[0])?;
                let c = u32::try_from(code)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| value_error("chr() arg not in range(0x110000)"))?;
                Ok(Object::str(c.to_string()))
            }
            Builtin::Dict => {
                args.arity(0, 1)?;
                let mut dict = Dict::new();
                if let Some(source) = args.get(0).cloned() {
                    for (k, v) in self.mapping_pairs(&source)? {
                        dict.insert(k.hash_key()?, k, v);
                    }
                }
                for (k, v) in std::mem::take(&mut args.kw) {
                    let key = Object::str(k);
                    dict.insert(key.hash_key()?, key, v);
                }
                Ok(Object::dict(dict))
            }
            Builtin::Divmod => {
                args.no_kwargs()?;
                args.arity(2, 2)?;
                let (a, b) = (args.pos[0].clone(), args.pos[1].clone());
                let q = self.binop(BinOp::FloorDiv, a.clone(), b.clone())?;
                let r = self.binop(BinOp::Mod, a, b)?;
                Ok(Object::tuple(vec![q, r]))
            }
            Builtin::Enumerate => {
                args.arity(1, 2)?;
                let start = match args.take(1, "start") {
                    Some(v) => int_arg(&v)?,
                    None => 0,
                };
                args.finish()?;
                let mut items = self.iterate(&args.pos[0])?;
                let mut out = Vec::new();
                let mut counter = start;
                while let Some(item) = items.next() {
                    self.meter.tick()?;
                    out.push(Object::tuple(vec![Object::Int(counter), item]));
                    self.check_growth(out.len())?;
                    counter = counter.checked_add(1).ok_or_else(|| {
                        RuntimeError::new(ErrorKind::Overflow, "integer overflow")
                    })?;
                }
                Ok(Object::list(out))
            }
            Builtin::Filter => {
                args.no_kwargs()?;
                args.arity(2, 2)?;
                let func = args.pos[0].clone();
                let mut items = self.iterate(&args.pos[1])?;
                let mut out = Vec::new();
                while let Some(item) = items.next() {
                    self.meter.tick()?;
                    let keep = match &func {
                        Object::None => item.truthy(),
                        f => self.call(f.clone(), vec![item.clone()], Vec::new())?.truthy(),
                    };
                    if keep {
                        out.push(item);
                        self.check_growth(out.len())?;
                    }
                }
                Ok(Object::list(out))
            }
            Builtin::Float => {
                args.no_kwargs()?;
                args.arity(0, 1)?;
                Ok(Object::Float(match args.get(0) {
                    None => 0.0,
                    Some(value) => to_float(value)?,
                }))
            }
            Builtin::Format => {
                args.no_kwargs()?;
                args.arity(1, 2)?;
                let spec = match args.get(1) {
                    Some(spec) => str_arg(spec, "format() argument 2")?,
                    None => "",
                };
                Ok(Object::str(format_object(&args.pos[0], spec)?))
            }
            Builtin::Int => {
                args.arity(0, 2)?;
                let base = args.take(1, "base");
                args.finish()?;
                let base = match base {
                    Some(b) => Some(int_arg(&b)?),
                    None => None,
                };
                Ok(Object::Int(match args.get(0) {
                    None => 0,
                    Some(value) => to_int(value, base)?,
                }))
            }
            Builtin::Len => {
                args.no_kwargs()?;
                args.arity(1, 1)?;
                let len = match &args.pos[0] {
                    Object::Str(s) => s.chars().count() as u64,
                    Object::List(l) => l.borrow().len() as u64,
                    Object::Tuple(t) => t.items().len() as u64,
                    Object::Dict(d) => d.borrow().len() as u64,
                    Object::Range(r) => r.len(),
                    other => {
                        return Err(type_error(format!(
                            "object of type '{}' has no len()",
                            other.type_name()
                        ))
                        .into())
                    }
                };
                let len = i64::try_from(len).map_err(|_| {
                    RuntimeError::new(ErrorKind::Overflow, "length does not fit in an int")
                })?;
                Ok(Object::Int(len))
            }
            Builtin::List | Builtin::Tuple => {
                args.no_kwargs()?;
                args.arity(0, 1)?;
                let items = match args.get(0).cloned() {
                    Some(source) => self.collect(&source)?,
                    None => Vec::new(),
                };
                Ok(if builtin == Builtin::List {
                    Object::list(items)
                } else {
                    Object::tuple(items)
                })
            }
            Builtin::Map => {
                args.no_kwargs()?;
                if args.pos.len() < 2 {
                    return Err(type_error("map() must have at least two arguments.").into());
                }
                let func = args.pos[0].clone();
                let rows = self.zip_rows(&args.pos[1..])?;
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    self.meter.tick()?;
                    out.push(self.call(func.clone(), row, Vec::new())?);
                }
                Ok(Object::list(out))
            }
            Builtin::Max | Builtin::Min => self.extreme(builtin, args),
            Builtin::Ord => {
                args.no_kwargs()?;
                args.arity(1, 1)?;
                let text = str_arg(&args.pos[0], "ord() argument")?;
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(Object::Int(c as i64)),
                    _ => Err(type_error(format!(
                        "ord() expected a character, but string of length {} found",
                        text.chars().count()
                    ))
                    .into()),
                }
            }
            Builtin::Pow => {
                args.arity(2, 3)?;
                let modulus = args.take(2, "mod");
                args.finish()?;
                let (base, exp) = (args.pos[0].clone(), args.pos[1].clone());
                match modulus {
                    None | Some(Object::None) => self.binop(BinOp::Pow, base, exp),
                    Some(modulus) => Ok(Object::Int(mod_pow(
                        int_arg(&base)?,
                        int_arg(&exp)?,
                        int_arg(&modulus)?,
                    )?)),
                }
            }
            Builtin::Print => {
                let sep = args.kwarg("sep");
                let end = args.kwarg("end");
                args.finish()?;
                let sep = match &sep {
                    Some(Object::Str(s)) => s.to_string(),
                    None | Some(Object::None) => " ".to_string(),
                    Some(other) => {
                        return Err(type_error(format!(
                            "sep must be None or a string, not {}",
                            other.type_name()
                        ))
                        .into())
                    }
                };
                let end = match &end {
                    Some(Object::Str(s)) => s.to_string(),
                    None | Some(Object::None) => "\n".to_string(),
                    Some(other) => {
                        return Err(type_error(format!(
                            "end must be None or a string, not {}",
                            other.type_name()
                        ))
                        .into())
                    }
                };
                let mut line = String::new();
                for (i, value) in args.pos.iter().enumerate() {
                    if i > 0 {
                        line.push_str(&sep);
                    }
                    line.push_str(&value.to_str()?);
                }
                line.push_str(&end);
                self.write_output(&line);
                Ok(Object::None)
            }
            Builtin::Range => {
                args.no_kwargs()?;
                args.arity(1, 3)?;
                let ints = args
                    .pos
                    .iter()
                    .map(int_arg)
                    .collect::<Result<Vec<i64>, _>>()?;
                let (start, stop, step) = match *ints.as_slice() {
                    [stop] => (0, stop, 1),
                    [start, stop] => (start, stop, 1),
                    [start, stop, step] => (start, stop, step),
                    _ => return Err(type_error("range expected at most 3 arguments").into()),
                };
                if step == 0 {
                    return Err(value_error("range() arg 3 must not be zero").into());
                }
                let range = RangeObj { start, stop, step };
                Ok(Object::Range(range))
            }
            Builtin::Repr => {
                args.no_kwargs()?;
                args.arity(1, 1)?;
                Ok(Object::str(args.pos[0].repr()?))
            }
            Builtin::Reversed => {
                args.no_kwargs()?;
                args.arity(1, 1)?;
                let source = args.pos[0].clone();
                let mut items = match source {
                    Object::List(_)
                    | Object::Tuple(_)
                    | Object::Str(_)
                    | Object::Range(_)
                    | Object::Dict(_) => self.collect(&source)?,
                    other => {
                        return Err(type_error(format!(
                            "'{}' object is not reversible",
                            other.type_name()
                        ))
                        .into())
                    }
                };
                items.reverse();
                Ok(Object::list(items))
            }
            Builtin::Round => {
                args.arity(1, 2)?;
                let ndigits = args.take(1, "ndigits");
                args.finish()?;
                let ndigits = match ndigits {
                    None | Some(Object::None) => None,
                    Some(n) => Some(int_arg(&n)?),
                };
                Ok(round(&args.pos[0], ndigits)?)
            }
            Builtin::Sorted => {
                args.arity(1, 1)?;
                let key = args.kwarg("key");
                let reverse = args.kwarg("reverse").is_some_and(|r| r.truthy());
                args.finish()?;
                let items = self.collect(&args.pos[0])?;
                Ok(Object::list(self.sort_objects(items, key, reverse)?))
            }
            Builtin::Str => {
                args.no_kwargs()?;
                args.arity(0, 1)?;
                Ok(match args.get(0) {
                    Some(value) => Object::str(value.to_str()?),
                    None => Object::str(""),
                })
            }
            Builtin::Sum => {
                args.arity(1, 2)?;
                let start = args.take(1, "start").unwrap_or(Object::Int(0));
                args.finish()?;
                if let Object::Str(_) = start {
                    return Err(
                        type_error("sum() can't sum strings [use ''.join(seq) instead]").into(),
                    );
                }
                let mut total = start;
                let mut items = self.iterate(&args.pos[0])?;
                while let Some(item) = items.next() {
                    self.meter.tick()?;
                    total = self.binop(BinOp::Add, total, item)?;
                }
                Ok(total)
            }
            Builtin::Type => {
                args.no_kwargs()?;
                if args.pos.len() != 1 {
                    return Err(type_error("type() takes 1 argument").into());
                }
                Ok(Object::Builtin(type_of(&args.pos[0])))
            }
            Builtin::Zip => {
                args.no_kwargs()?;
                let rows = self.zip_rows(&args.pos)?;
                Ok(Object::list(rows.into_iter().map(Object::tuple).collect()))
            }
            Builtin::Error(kind) => {
                args.no_kwargs()?;
                let message = match args.pos.as_slice() {
                    [] => String::new(),
                    [single] => single.to_str()?,
                    many => Object::tuple(many.to_vec()).repr()?,
                };
                Ok(Object::Exception(Rc::new(ExceptionObj { kind, message })))
            }
            Builtin::NamedType(name) => {
                Err(type_error(format!("cannot create '{}' instances", name)).into())
            }
        }
    }

    /// Key/value pairs of a dict or of an iterable of 2-item sequences.
    pub(super) fn mapping_pairs(&mut self, source: &Object) -> Flow<Vec<(Object, Object)>> {
        if let Object::Dict(d) = source {
            return Ok(d
                .borrow()
                .entries()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect());
        }
        let items = self.collect(source)?;
        let mut pairs = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            self.meter.tick()?;
            let pair = self.collect(item).map_err(|e| match e {
                Unwind::Raise(_) => Unwind::Raise(type_error(format!(
                    "cannot convert dictionary update sequence element #{} to a sequence",
                    i
                ))),
                other => other,
            })?;
            match <[Object; 2]>::try_from(pair) {
                Ok([k, v]) => pairs.push((k, v)),
                Err(pair) => {
                    return Err(value_error(format!(
                        "dictionary update sequence element #{} has length {}; 2 is required",
                        i,
                        pair.len()
                    ))
                    .into())
                }
            }
        }
        Ok(pairs)
    }

    /// Rows of a lazy zip over `sources`, stopping at the shortest.
    fn zip_rows(&mut self, sources: &[Object]) -> Flow<Vec<Vec<Object>>> {
        if sources.is_empty() {
            return Ok(Vec::new());
        }
        let mut iters = sources
            .iter()
            .map(|s| self.iterate(s))
            .collect::<Result<Vec<_>, _>>()?;
        let mut rows = Vec::new();
        'rows: loop {
            self.meter.tick()?;
            let mut row = Vec::with_capacity(iters.len());
            for it in iters.iter_mut() {
                match it.next() {
                    Some(item) => row.push(item),
                    None => break 'rows,
                }
            }
            rows.push(row);
            self.check_growth(rows.len())?;
        }
        Ok(rows)
    }

    fn extreme(&mut self, builtin: Builtin, mut args: Args) -> Flow<Object> {
        let key = args.kwarg("key").filter(|k| !matches!(k, Object::None));
        let default = args.kwarg("default");
        args.finish()?;
        let name = builtin.name();
        let want = if builtin == Builtin::Max {
            Ordering::Greater
        } else {
            Ordering::Less
        };
        let candidates = match args.pos.len() {
            0 => {
                return Err(type_error(format!(
                    "{} expected at least 1 argument, got 0",
                    name
                ))
                .into())
            }
            1 => self.collect(&args.pos[0])?,
            _ => {
                if default.is_some() {
                    return Err(type_error(format!(
                        "Cannot specify a default for {}() with multiple positional arguments",
                        name
                    ))
                    .into());
                }
                std::mem::take(&mut args.pos)
            }
        };
        let mut best: Option<(Object, Object)> = None;
        for item in candidates {
            self.meter.tick()?;
            let item_key = match &key {
                Some(f) => self.call(f.clone(), vec![item.clone()], Vec::new())?,
                None => item.clone(),
            };
            let replace = match &best {
                None => true,
                Some((best_key, _)) => item_key.py_cmp(best_key)? == Some(want),
            };
            if replace {
                best = Some((item_key, item));
            }
        }
        match (best, default) {
            (Some((_, item)), _) => Ok(item),
            (None, Some(default)) => Ok(default),
            (None, None) => {
                Err(value_error(format!("{}() arg is an empty sequence", name)).into())
            }
        }
    }

    /// Stable sort with an optional key function, as `sorted()` and
    /// `list.sort()` do.
    pub(super) fn sort_objects(
        &mut self,
        items: Vec<Object>,
        key: Option<Object>,
        reverse: bool,
    ) -> Flow<Vec<Object>> {
        let mut pairs = Vec::with_capacity(items.len());
        for item in items {
            let item_key = match &key {
                Some(Object::None) | None => item.clone(),
                Some(f) => {
                    self.meter.tick()?;
                    self.call(f.clone(), vec![item.clone()], Vec::new())?
                }
            };
            pairs.push((item_key, item));
        }
        if reverse {
            pairs.reverse();
        }
        let meter = &mut self.meter;
        let mut less = |a: &(Object, Object), b: &(Object, Object)| -> Flow<bool> {
            meter.tick()?;
            Ok(a.0.py_cmp(&b.0)? == Some(Ordering::Less))
        };
        let mut sorted = merge_sort(pairs, &mut less)?;
        if reverse {
            sorted.reverse();
        }
        Ok(sorted.into_iter().map(|(_, item)| item).collect())
    }
}

/// Stable bottom-up merge sort driven by a fallible `less` predicate.
/// Inconsistent orderings (NaN) produce some permutation rather than a panic.
fn merge_sort<T: Clone, E>(
    items: Vec<T>,
    less: &mut dyn FnMut(&T, &T) -> Result<bool, E>,
) -> Result<Vec<T>, E> {
    let n = items.len();
    let mut src = items;
    let mut width = 1;
    while width < n {
        let mut dst = Vec::with_capacity(n);
        let mut start = 0;
        while start < n {
            let mid = (start + width).min(n);
            let end = (start + 2 * width).min(n);
            let (mut i, mut j) = (start, mid);
            while i < mid && j < end {
                if less(&src[j], &src[i])? {
                    dst.push(src[j].clone());
                    j += 1;
                } else {
                    dst.push(src[i].clone());
                    i += 1;
                }
            }
            dst.extend_from_slice(&src[i..mid]);
            dst.extend_from_slice(&src[j..end]);
            start = end;
        }
        src = dst;
        width *= 2;
    }
    Ok(src)
}

fn abs(value: &Object) -> Result<Object, RuntimeError> {
    match value {
        Object::Int(_) | Object::Bool(_) => value
            .as_int()
            .unwrap_or(0)
            .checked_abs()
            .map(Object::Int)
            .ok_or_else(|| RuntimeError::new(ErrorKind::Overflow, "integer overflow")),
        Object::Float(f) => Ok(Object::Float(f.abs())),
        other => Err(type_error(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        ))),
    }
}

fn type_of(value: &Object) -> Builtin {
    match value {
        Object::None => Builtin::NamedType("NoneType"),
        Object::Bool(_) => Builtin::Bool,
        Object::Int(_) => Builtin::Int,
        Object::Float(_) => Builtin::Float,
        Object::Str(_) => Builtin::Str,
        Object::List(_) => Builtin::List,
        Object::Tuple(_) => Builtin::Tuple,
        Object::Dict(_) => Builtin::Dict,
        Object::Range(_) => Builtin::Range,
        Object::Builtin(b) if b.is_type() => Builtin::Type,
        Object::Builtin(_) => Builtin::NamedType("builtin_function_or_method"),
        Object::Method(_) => Builtin::NamedType("method"),
        Object::Capability(_) => Builtin::NamedType("capability"),
        Object::Exception(e) => Builtin::Error(e.kind),
    }
}

pub(super) fn float_to_int(f: f64) -> Result<i64, RuntimeError> {
    if f.is_nan() {
        return Err(value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(RuntimeError::new(
            ErrorKind::Overflow,
            "cannot convert float infinity to integer",
        ));
    }
    let t = f.trunc();
    if !(-9.223_372_036_854_776e18..9.223_372_036_854_776e18).contains(&t) {
        return Err(RuntimeError::new(
            ErrorKind::Overflow,
            "int too large to convert",
        ));
    }
    Ok(t as i64)
}

fn to_int(value: &Object, base: Option<i64>) -> Result<i64, RuntimeError> {
    match (value, base) {
        (Object::Int(_) | Object::Bool(_), None) => Ok(value.as_int().unwrap_or(0)),
        (Object::Float(f), None) => float_to_int(*f),
        (Object::Str(s), base) => parse_int(s, base.unwrap_or(10)),
        (_, Some(_)) => Err(type_error("int() can't convert non-string with explicit base")),
        (other, None) => Err(type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn parse_int(text: &str, base: i64) -> Result<i64, RuntimeError> {
    if base != 0 && !(2..=36).contains(&base) {
        return Err(value_error("int() base must be >= 2 and <= 36, or 0"));
    }
    let invalid = || {
        value_error(format!(
            "invalid literal for int() with base {}: {}",
            base,
            quote_str(text)
        ))
    };
    let trimmed = text.trim();
    let (negative, unsigned) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let lower = unsigned.to_ascii_lowercase();
    let prefixed = |p: &str, radix: i64| (base == 0 || base == radix) && lower.starts_with(p);
    let (radix, mut digits) = if prefixed("0x", 16) {
        (16, &unsigned[2..])
    } else if prefixed("0o", 8) {
        (8, &unsigned[2..])
    } else if prefixed("0b", 2) {
        (2, &unsigned[2..])
    } else if base == 0 {
        (10, unsigned)
    } else {
        (base, unsigned)
    };
    // "0x_ff" is valid: one underscore may follow a radix prefix.
    if digits.len() != unsigned.len() {
        digits = digits.strip_prefix('_').unwrap_or(digits);
    }
    if digits.is_empty()
        || digits.starts_with('_')
        || digits.ends_with('_')
        || digits.contains("__")
    {
        return Err(invalid());
    }
    let cleaned: String = digits.chars().filter(|&c| c != '_').collect();
    if !cleaned.chars().all(|c| c.is_digit(radix as u32)) {
        return Err(invalid());
    }
    let magnitude = u128::from_str_radix(&cleaned, radix as u32)
        .map_err(|_| RuntimeError::new(ErrorKind::Overflow, "int too large to convert"))?;
    let value = if negative {
        -(magnitude as i128)
    } else {
        magnitude as i128
    };
    i64::try_from(value)
        .map_err(|_| RuntimeError::new(ErrorKind::Overflow, "int too large to convert"))
}

fn to_float(value: &Object) -> Result<f64, RuntimeError> {
    match value {
        Object::Int(_) | Object::Bool(_) | Object::Float(_) => Ok(value.as_f64().unwrap_or(0.0)),
        Object::Str(s) => {
            let trimmed = s.trim();
            trimmed.parse::<f64>().map_err(|_| {
                value_error(format!(
                    "could not convert string to float: {}",
                    quote_str(s)
                ))
            })
        }
        other => Err(type_error(format!(
            "float() argument must be a string or a real number, not '{}'",
            other.type_name()
        ))),
    }
}

fn round(value: &Object, ndigits: Option<i64>) -> Result<Object, RuntimeError> {
    match value {
        Object::Int(_) | Object::Bool(_) => {
            let x = value.as_int().unwrap_or(0);
            match ndigits {
                Some(nd) if nd < 0 => Ok(Object::Int(round_int(x, nd)?)),
                _ => Ok(Object::Int(x)),
            }
        }
        Object::Float(f) => match ndigits {
            None => Ok(Object::Int(float_to_int(f.round_ties_even())?)),
            Some(nd) => Ok(Object::Float(round_float(*f, nd))),
        },
        other => Err(type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

fn round_float(x: f64, ndigits: i64) -> f64 {
    if !x.is_finite() || ndigits > 22 {
        return x;
    }
    if ndigits < -308 {
        return 0.0_f64.copysign(x);
    }
    let y = if ndigits >= 0 {
        let m = 10f64.powi(ndigits as i32);
        (x * m).round_ties_even() / m
    } else {
        let p = 10f64.powi((-ndigits) as i32);
        (x / p).round_ties_even() * p
    };
    if y.is_finite() {
        y
    } else {
        x
    }
}

fn round_int(x: i64, ndigits: i64) -> Result<i64, RuntimeError> {
    if ndigits < -18 {
        return Ok(0);
    }
    let p = 10i128.pow((-ndigits) as u32);
    let x = x as i128;
    let q = x.div_euclid(p);
    let r = x.rem_euclid(p);
    let q = if 2 * r > p || (2 * r == p && q % 2 != 0) {
        q + 1
    } else {
        q
    };
    i64::try_from(q * p).map_err(|_| RuntimeError::new(ErrorKind::Overflow, "integer overflow"))
}

fn mod_pow(base: i64, exp: i64, modulus: i64) -> Result<i64, RuntimeError> {
    if modulus == 0 {
        return Err(value_error("pow() 3rd argument cannot be 0"));
    }
    if exp < 0 {
        return Err(value_error(
            "pow() 2nd argument cannot be negative when 3rd argument specified",
        ));
    }
    let m = (modulus as i128).abs();
    let mut result: i128 = 1 % m;
    let mut b = (base as i128).rem_euclid(m);
    let mut e = exp as u64;
    while e > 0 {
        if e & 1 == 1 {
            result = result * b % m;
        }
        b = b * b % m;
        e >>= 1;
    }
    if modulus < 0 && result != 0 {
        result += modulus as i128;
    }
    Ok(result as i64)
}
