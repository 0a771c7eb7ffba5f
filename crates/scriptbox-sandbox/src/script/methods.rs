//! Methods of built-in types, and calls forwarded to capability handles.

use std::rc::Rc;

use super::builtins::{int_arg, str_arg, Args};
use super::error::{type_error, value_error, ErrorKind, RuntimeError};
use super::format::str_format;
use super::interp::{attribute_error, key_repr, Flow, Interpreter};
use super::object::{CapabilityObj, DictCell, List, Object, Tuple, SLOT_BYTES};
use crate::capability::CapabilityError;
use crate::value::Value;

const STR_METHODS: &[&str] = &[
    "capitalize",
    "center",
    "count",
    "endswith",
    "find",
    "format",
    "index",
    "isalnum",
    "isalpha",
    "isdigit",
    "islower",
    "isspace",
    "isupper",
    "join",
    "ljust",
    "lower",
    "lstrip",
    "partition",
    "replace",
    "rfind",
    "rindex",
    "rjust",
    "rpartition",
    "rsplit",
    "rstrip",
    "split",
    "splitlines",
    "startswith",
    "strip",
    "swapcase",
    "title",
    "upper",
    "zfill",
];

const LIST_METHODS: &[&str] = &[
    "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove", "reverse",
    "sort",
];

const DICT_METHODS: &[&str] = &[
    "clear",
    "copy",
    "get",
    "items",
    "keys",
    "pop",
    "popitem",
    "setdefault",
    "update",
    "values",
];

const TUPLE_METHODS: &[&str] = &["count", "index"];

pub(super) fn has_method(obj: &Object, name: &str) -> bool {
    let table: &[&str] = match obj {
        Object::Str(_) => STR_METHODS,
        Object::List(_) => LIST_METHODS,
        Object::Dict(_) => DICT_METHODS,
        Object::Tuple(_) => TUPLE_METHODS,
        Object::Float(_) => &["is_integer"],
        Object::Int(_) => &["bit_length"],
        Object::Capability(cap) => return cap.handle.has_method(name),
        _ => return false,
    };
    table.contains(&name)
}

impl Interpreter<'_> {
    pub(super) fn call_method(
        &mut self,
        receiver: &Object,
        name: &str,
        pos: Vec<Object>,
        kw: Vec<(String, Object)>,
    ) -> Flow<Object> {
        if let Object::Capability(cap) = receiver {
            return self.capability_call(cap, name, pos, kw);
        }
        let args = Args::new(name, pos, kw);
        match receiver {
            Object::Str(s) => self.str_method(s, name, args),
            Object::List(l) => self.list_method(l, name, args),
            Object::Dict(d) => self.dict_method(d, name, args),
            Object::Tuple(t) => Ok(tuple_method(t, name, args)?),
            Object::Float(f) if name == "is_integer" => {
                args.no_kwargs()?;
                args.arity(0, 0)?;
                Ok(Object::Bool(f.is_finite() && f.fract() == 0.0))
            }
            Object::Int(i) if name == "bit_length" => {
                args.no_kwargs()?;
                args.arity(0, 0)?;
                Ok(Object::Int(i64::from(64 - i.unsigned_abs().leading_zeros())))
            }
            other => Err(attribute_error(other, name).into()),
        }
    }

    fn capability_call(
        &mut self,
        cap: &CapabilityObj,
        method: &str,
        pos: Vec<Object>,
        kw: Vec<(String, Object)>,
    ) -> Flow<Object> {
        self.meter.tick()?;
        let args = pos
            .iter()
            .map(Object::to_value)
            .collect::<Result<Vec<Value>, _>>()?;
        let kwargs = kw
            .iter()
            .map(|(k, v)| Ok((k.clone(), v.to_value()?)))
            .collect::<Result<Vec<(String, Value)>, RuntimeError>>()?;
        let result = cap
            .handle
            .call(method, &args, &kwargs)
            .map_err(|e| capability_error(&cap.name, e))?;
        if let Value::List(items) | Value::Tuple(items) = &result {
            self.check_growth(items.len())?;
        }
        Ok(Object::from_value(&result))
    }

    fn str_method(&mut self, s: &Rc<str>, name: &str, mut args: Args) -> Flow<Object> {
        let text: &str = s;
        match name {
            "upper" | "lower" | "title" | "capitalize" | "swapcase" => {
                args.no_kwargs()?;
                args.arity(0, 0)?;
                Ok(Object::str(match name {
                    "upper" => text.to_uppercase(),
                    "lower" => text.to_lowercase(),
                    "title" => title_case(text),
                    "capitalize" => capitalize(text),
                    _ => swap_case(text),
                }))
            }
            "strip" | "lstrip" | "rstrip" => {
                args.no_kwargs()?;
                args.arity(0, 1)?;
                let chars = match args.get(0) {
                    None | Some(Object::None) => None,
                    Some(c) => Some(str_arg(c, "strip arg")?.to_string()),
                };
                let strip = |c: char| match &chars {
                    Some(set) => set.contains(c),
                    None => c.is_whitespace(),
                };
                Ok(Object::str(match name {
                    "strip" => text.trim_matches(strip),
                    "lstrip" => text.trim_start_matches(strip),
                    _ => text.trim_end_matches(strip),
                }))
            }
            "split" | "rsplit" => {
                args.arity(0, 2)?;
                let sep = args.take(0, "sep");
                let maxsplit = args.take(1, "maxsplit");
                args.finish()?;
                let maxsplit = match maxsplit {
                    Some(m) => usize::try_from(int_arg(&m)?).ok(),
                    None => None,
                };
                let reverse = name == "rsplit";
                let parts = match sep {
                    None | Some(Object::None) => split_whitespace(text, maxsplit, reverse),
                    Some(sep) => {
                        let sep = str_arg(&sep, "separator")?;
                        if sep.is_empty() {
                            return Err(value_error("empty separator").into());
                        }
                        split_on(text, sep, maxsplit, reverse)
                    }
                };
                self.check_growth(parts.len())?;
                Ok(Object::list(parts.into_iter().map(Object::str).collect()))
            }
            "splitlines" => {
                args.no_kwargs()?;
                args.arity(0, 0)?;
                Ok(Object::list(
                    text.split_terminator('\n')
                        .map(|line| Object::str(line.strip_suffix('\r').unwrap_or(line)))
                        .collect(),
                ))
            }
            "join" => {
                args.no_kwargs()?;
                args.arity(1, 1)?;
                let items = self.collect(&args.pos[0])?;
                let mut total: u128 = 0;
                let mut parts = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Object::Str(part) => {
                            total += (part.len() + text.len()) as u128;
                            parts.push(part.clone());
                        }
                        other => {
                            return Err(type_error(format!(
                                "sequence item {}: expected str instance, {} found",
                                i,
                                other.type_name()
                            ))
                            .into())
                        }
                    }
                }
                self.meter.check_alloc(total)?;
                let refs: Vec<&str> = parts.iter().map(|p| &**p).collect();
                Ok(Object::str(refs.join(text)))
            }
            "replace" => {
                args.no_kwargs()?;
                args.arity(2, 3)?;
                let old = str_arg(&args.pos[0], "replace() argument 1")?;
                let new = str_arg(&args.pos[1], "replace() argument 2")?;
                let limit = match args.get(2) {
                    Some(n) => usize::try_from(int_arg(n)?).ok(),
                    None => None,
                };
                let occurrences = text.matches(old).count();
                let replaced = limit.map_or(occurrences, |n| n.min(occurrences));
                self.meter.check_alloc(
                    text.len() as u128 + replaced as u128 * new.len() as u128,
                )?;
                Ok(Object::str(match limit {
                    Some(n) => text.replacen(old, new, n),
                    None => text.replace(old, new),
                }))
            }
            "startswith" | "endswith" => {
                args.no_kwargs()?;
                args.arity(1, 1)?;
                let candidates = match &args.pos[0] {
                    Object::Str(p) => vec![p.clone()],
                    Object::Tuple(t) => t
                        .items()
                        .iter()
                        .map(|p| match p {
                            Object::Str(p) => Ok(p.clone()),
                            other => Err(type_error(format!(
                                "tuple for {} must only contain str, not {}",
                                name,
                                other.type_name()
                            ))),
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                    other => {
                        return Err(type_error(format!(
                            "{} first arg must be str or a tuple of str, not {}",
                            name,
                            other.type_name()
                        ))
                        .into())
                    }
                };
                let hit = candidates.iter().any(|p| {
                    if name == "startswith" {
                        text.starts_with(&**p)
                    } else {
                        text.ends_with(&**p)
                    }
                });
                Ok(Object::Bool(hit))
            }
            "find" | "rfind" | "index" | "rindex" | "count" => {
                args.no_kwargs()?;
                args.arity(1, 3)?;
                let sub = str_arg(&args.pos[0], "substring")?;
                let (lo, hi, char_lo) = char_window(text, args.get(1), args.get(2))?;
                let window = &text[lo..hi];
                if name == "count" {
                    return Ok(Object::Int(window.matches(sub).count() as i64));
                }
                let found = if name.starts_with('r') {
                    window.rfind(sub)
                } else {
                    window.find(sub)
                };
                match found {
                    Some(b) => Ok(Object::Int((char_lo + window[..b].chars().count()) as i64)),
                    None if name.ends_with("find") => Ok(Object::Int(-1)),
                    None => Err(value_error("substring not found").into()),
                }
            }
            "format" => {
                let (pos, kw) = args.into_parts();
                Ok(Object::str(str_format(text, &pos, &kw)?))
            }
            "isdigit" | "isalpha" | "isalnum" | "isspace" | "isupper" | "islower" => {
                args.no_kwargs()?;
                args.arity(0, 0)?;
                let result = match name {
                    "isdigit" => !text.is_empty() && text.chars().all(|c| c.is_numeric()),
                    "isalpha" => !text.is_empty() && text.chars().all(char::is_alphabetic),
                    "isalnum" => !text.is_empty() && text.chars().all(char::is_alphanumeric),
                    "isspace" => !text.is_empty() && text.chars().all(char::is_whitespace),
                    "isupper" => {
                        text.chars().any(char::is_uppercase) && !text.chars().any(char::is_lowercase)
                    }
                    _ => {
                        text.chars().any(char::is_lowercase) && !text.chars().any(char::is_uppercase)
                    }
                };
                Ok(Object::Bool(result))
            }
            "zfill" | "center" | "ljust" | "rjust" => {
                args.no_kwargs()?;
                let max = if name == "zfill" { 1 } else { 2 };
                args.arity(1, max)?;
                let width = int_arg(&args.pos[0])?;
                let fill = match args.get(1) {
                    Some(f) => {
                        let f = str_arg(f, "The fill character")?;
                        let mut chars = f.chars();
                        match (chars.next(), chars.next()) {
                            (Some(c), None) => c,
                            _ => {
                                return Err(type_error(
                                    "The fill character must be exactly one character long",
                                )
                                .into())
                            }
                        }
                    }
                    None => ' ',
                };
                let len = text.chars().count();
                let width = usize::try_from(width).unwrap_or(0);
                if width <= len {
                    return Ok(Object::Str(s.clone()));
                }
                self.meter
                    .check_alloc(width as u128 * fill.len_utf8().max(1) as u128)?;
                let pad = width - len;
                let repeat = |n: usize, c: char| c.to_string().repeat(n);
                Ok(Object::str(match name {
                    "zfill" => {
                        let (sign, digits) = match text.chars().next() {
                            Some(c @ ('+' | '-')) => (c.to_string(), &text[1..]),
                            _ => (String::new(), text),
                        };
                        format!("{}{}{}", sign, repeat(pad, '0'), digits)
                    }
                    "ljust" => format!("{}{}", text, repeat(pad, fill)),
                    "rjust" => format!("{}{}", repeat(pad, fill), text),
                    _ => {
                        let left = pad / 2 + (pad & width & 1);
                        format!("{}{}{}", repeat(left, fill), text, repeat(pad - left, fill))
                    }
                }))
            }
            "partition" | "rpartition" => {
                args.no_kwargs()?;
                args.arity(1, 1)?;
                let sep = str_arg(&args.pos[0], "separator")?;
                if sep.is_empty() {
                    return Err(value_error("empty separator").into());
                }
                let found = if name == "partition" {
                    text.find(sep)
                } else {
                    text.rfind(sep)
                };
                let parts = match found {
                    Some(i) => [&text[..i], sep, &text[i + sep.len()..]],
                    None if name == "partition" => [text, "", ""],
                    None => ["", "", text],
                };
                Ok(Object::tuple(parts.into_iter().map(Object::str).collect()))
            }
            _ => Err(attribute_error(&Object::Str(s.clone()), name).into()),
        }
    }

    fn list_method(&mut self, list: &Rc<List>, name: &str, mut args: Args) -> Flow<Object> {
        match name {
            "append" => {
                args.no_kwargs()?;
                args.arity(1, 1)?;
                let len = {
                    let mut items = list.borrow_mut();
                    items.push(args.pos[0].clone());
                    items.len()
                };
                self.check_growth(len)?;
                Ok(Object::None)
            }
            "extend" => {
                args.no_kwargs()?;
                args.arity(1, 1)?;
                let extra = self.collect(&args.pos[0])?;
                let new_len = list.borrow().len() as u128 + extra.len() as u128;
                self.meter.check_alloc(new_len * SLOT_BYTES as u128)?;
                list.borrow_mut().extend(extra);
                Ok(Object::None)
            }
            "insert" => {
                args.no_kwargs()?;
                args.arity(2, 2)?;
                let index = int_arg(&args.pos[0])?;
                let len = {
                    let mut items = list.borrow_mut();
                    let at = clamp_index(index, items.len());
                    items.insert(at, args.pos[1].clone());
                    items.len()
                };
                self.check_growth(len)?;
                Ok(Object::None)
            }
            "pop" => {
                args.no_kwargs()?;
                args.arity(0, 1)?;
                let mut items = list.borrow_mut();
                if items.is_empty() {
                    return Err(RuntimeError::new(ErrorKind::Index, "pop from empty list").into());
                }
                let len = items.len() as i64;
                let index = match args.get(0) {
                    Some(i) => int_arg(i)?,
                    None => -1,
                };
                let at = if index < 0 { index + len } else { index };
                if !(0..len).contains(&at) {
                    return Err(
                        RuntimeError::new(ErrorKind::Index, "pop index out of range").into(),
                    );
                }
                Ok(items.remove(at as usize))
            }
            "remove" => {
                args.no_kwargs()?;
                args.arity(1, 1)?;
                let at = position(&list.borrow(), &args.pos[0])?;
                match at {
                    Some(i) => {
                        let removed = list.borrow_mut().remove(i);
                        drop(removed);
                        Ok(Object::None)
                    }
                    None => Err(value_error("list.remove(x): x not in list").into()),
                }
            }
            "index" => {
                args.no_kwargs()?;
                args.arity(1, 1)?;
                match position(&list.borrow(), &args.pos[0])? {
                    Some(i) => Ok(Object::Int(i as i64)),
                    None => Err(value_error(format!(
                        "{} is not in list",
                        args.pos[0].repr()?
                    ))
                    .into()),
                }
            }
            "count" => {
                args.no_kwargs()?;
                args.arity(1, 1)?;
                Ok(Object::Int(count(&list.borrow(), &args.pos[0])?))
            }
            "sort" => {
                args.arity(0, 0)?;
                let key = args.kwarg("key");
                let reverse = args.kwarg("reverse").is_some_and(|r| r.truthy());
                args.finish()?;
                let items = list.borrow().clone();
                let sorted = self.sort_objects(items, key, reverse)?;
                let previous = std::mem::replace(&mut *list.borrow_mut(), sorted);
                drop(previous);
                Ok(Object::None)
            }
            "reverse" => {
                args.no_kwargs()?;
                args.arity(0, 0)?;
                list.borrow_mut().reverse();
                Ok(Object::None)
            }
            "copy" => {
                args.no_kwargs()?;
                args.arity(0, 0)?;
                let items = list.borrow().clone();
                Ok(Object::list(items))
            }
            "clear" => {
                args.no_kwargs()?;
                args.arity(0, 0)?;
                let previous = std::mem::take(&mut *list.borrow_mut());
                drop(previous);
                Ok(Object::None)
            }
            _ => Err(attribute_error(&Object::List(list.clone()), name).into()),
        }
    }

    fn dict_method(&mut self, dict: &Rc<DictCell>, name: &str, args: Args) -> Flow<Object> {
        match name {
            "keys" | "values" | "items" => {
                args.no_kwargs()?;
                args.arity(0, 0)?;
                let d = dict.borrow();
                Ok(Object::list(match name {
                    "keys" => d.keys(),
                    "values" => d.values(),
                    _ => d.items(),
                }))
            }
            "get" => {
                args.no_kwargs()?;
                args.arity(1, 2)?;
                let hash = args.pos[0].hash_key()?;
                let found = dict.borrow().get(&hash).cloned();
                Ok(found.unwrap_or_else(|| args.get(1).cloned().unwrap_or(Object::None)))
            }
            "pop" => {
                args.no_kwargs()?;
                args.arity(1, 2)?;
                let hash = args.pos[0].hash_key()?;
                let removed = dict.borrow_mut().remove(&hash);
                match (removed, args.get(1)) {
                    (Some((_, value)), _) => Ok(value),
                    (None, Some(default)) => Ok(default.clone()),
                    (None, None) => {
                        Err(RuntimeError::new(ErrorKind::Key, key_repr(&args.pos[0])).into())
                    }
                }
            }
            "popitem" => {
                args.no_kwargs()?;
                args.arity(0, 0)?;
                let last = dict.borrow_mut().pop_last();
                match last {
                    Some((k, v)) => Ok(Object::tuple(vec![k, v])),
                    None => Err(RuntimeError::new(
                        ErrorKind::Key,
                        "popitem(): dictionary is empty",
                    )
                    .into()),
                }
            }
            "setdefault" => {
                args.no_kwargs()?;
                args.arity(1, 2)?;
                let key = args.pos[0].clone();
                let hash = key.hash_key()?;
                if let Some(existing) = dict.borrow().get(&hash) {
                    return Ok(existing.clone());
                }
                let default = args.get(1).cloned().unwrap_or(Object::None);
                let len = {
                    let mut d = dict.borrow_mut();
                    d.insert(hash, key, default.clone());
                    d.len()
                };
                self.check_growth(len)?;
                Ok(default)
            }
            "update" => {
                args.arity(0, 1)?;
                let mut pairs = match args.get(0).cloned() {
                    Some(source) => self.mapping_pairs(&source)?,
                    None => Vec::new(),
                };
                let (_, kw) = args.into_parts();
                pairs.extend(kw.into_iter().map(|(k, v)| (Object::str(k), v)));
                let mut hashed = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    hashed.push((k.hash_key()?, k, v));
                }
                let len = {
                    let mut d = dict.borrow_mut();
                    for (hash, k, v) in hashed {
                        d.insert(hash, k, v);
                    }
                    d.len()
                };
                self.check_growth(len)?;
                Ok(Object::None)
            }
            "copy" => {
                args.no_kwargs()?;
                args.arity(0, 0)?;
                let copy = dict.borrow().copy();
                Ok(Object::dict(copy))
            }
            "clear" => {
                args.no_kwargs()?;
                args.arity(0, 0)?;
                dict.borrow_mut().clear();
                Ok(Object::None)
            }
            _ => Err(attribute_error(&Object::Dict(dict.clone()), name).into()),
        }
    }
}

fn tuple_method(tuple: &Rc<Tuple>, name: &str, args: Args) -> Result<Object, RuntimeError> {
    args.no_kwargs()?;
    args.arity(1, 1)?;
    match name {
        "count" => Ok(Object::Int(count(tuple.items(), &args.pos[0])?)),
        "index" => match position(tuple.items(), &args.pos[0])? {
            Some(i) => Ok(Object::Int(i as i64)),
            None => Err(value_error("tuple.index(x): x not in tuple")),
        },
        _ => Err(attribute_error(&Object::Tuple(tuple.clone()), name)),
    }
}

fn capability_error(binding: &str, err: CapabilityError) -> RuntimeError {
    let kind = match &err {
        CapabilityError::UnknownMethod { .. } => ErrorKind::Attribute,
        CapabilityError::InvalidArgument(_) => ErrorKind::Type,
        CapabilityError::NotFound(_) => ErrorKind::Key,
        CapabilityError::Failed(_) => ErrorKind::Capability,
    };
    tracing::debug!(capability = %binding, error = %err, "Capability call failed");
    RuntimeError::new(kind, err.to_string())
}

fn position(items: &[Object], needle: &Object) -> Result<Option<usize>, RuntimeError> {
    for (i, item) in items.iter().enumerate() {
        if item.is_same(needle) || item.py_eq(needle)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

fn count(items: &[Object], needle: &Object) -> Result<i64, RuntimeError> {
    let mut n = 0;
    for item in items {
        if item.is_same(needle) || item.py_eq(needle)? {
            n += 1;
        }
    }
    Ok(n)
}

fn clamp_index(index: i64, len: usize) -> usize {
    let len = len as i64;
    let at = if index < 0 { index + len } else { index };
    at.clamp(0, len) as usize
}

/// Byte bounds and starting char offset of `text[start:end]` in char units.
fn char_window(
    text: &str,
    start: Option<&Object>,
    end: Option<&Object>,
) -> Result<(usize, usize, usize), RuntimeError> {
    let len = text.chars().count();
    let bound = |value: Option<&Object>, default: usize| -> Result<usize, RuntimeError> {
        match value {
            None | Some(Object::None) => Ok(default),
            Some(v) => Ok(clamp_index(int_arg(v)?, len)),
        }
    };
    let lo = bound(start, 0)?;
    let hi = bound(end, len)?.max(lo);
    let byte_at = |n: usize| text.char_indices().nth(n).map_or(text.len(), |(b, _)| b);
    Ok((byte_at(lo), byte_at(hi), lo))
}

fn split_whitespace(text: &str, maxsplit: Option<usize>, reverse: bool) -> Vec<String> {
    let mut out = Vec::new();
    if reverse {
        let mut rest = text.trim_end();
        while !rest.is_empty() {
            if maxsplit == Some(out.len()) {
                out.push(rest.to_string());
                break;
            }
            match rest.rfind(char::is_whitespace) {
                Some(i) => {
                    let ws = rest[i..].chars().next().map_or(1, char::len_utf8);
                    out.push(rest[i + ws..].to_string());
                    rest = rest[..i].trim_end();
                }
                None => {
                    out.push(rest.to_string());
                    break;
                }
            }
        }
        out.reverse();
    } else {
        let mut rest = text.trim_start();
        while !rest.is_empty() {
            if maxsplit == Some(out.len()) {
                out.push(rest.to_string());
                break;
            }
            match rest.find(char::is_whitespace) {
                Some(i) => {
                    out.push(rest[..i].to_string());
                    rest = rest[i..].trim_start();
                }
                None => {
                    out.push(rest.to_string());
                    break;
                }
            }
        }
    }
    out
}

fn split_on(text: &str, sep: &str, maxsplit: Option<usize>, reverse: bool) -> Vec<String> {
    match (maxsplit, reverse) {
        (None, _) => text.split(sep).map(str::to_string).collect(),
        (Some(n), false) => text.splitn(n + 1, sep).map(str::to_string).collect(),
        (Some(n), true) => {
            let mut parts: Vec<String> = text.rsplitn(n + 1, sep).map(str::to_string).collect();
            parts.reverse();
            parts
        }
    }
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_cased = false;
    for c in text.chars() {
        if prev_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_cased = c.is_alphabetic();
    }
    out
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
        None => String::new(),
    }
}

fn swap_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_uppercase() {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
    }
    out
}
