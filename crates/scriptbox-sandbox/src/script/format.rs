//! Text formatting: `repr` of scalars, format specs (`format()`, f-strings,
//! `str.format`) and printf-style `%` formatting.

use super::error::{type_error, value_error, ErrorKind, RuntimeError};
use super::object::Object;

/// Widest padded field a format spec may request.
const MAX_FORMAT_WIDTH: usize = 1 << 20;

/// `repr()` of a float: shortest round-trip digits, scientific notation
/// outside `1e-4 <= |x| < 1e16`.
pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }
    let sci = format!("{:e}", f);
    let (mantissa, exp) = split_exponent(&sci);
    if (-4..16).contains(&exp) {
        let plain = format!("{}", f);
        if plain.contains('.') {
            plain
        } else {
            format!("{}.0", plain)
        }
    } else {
        format!("{}e{}{:02}", mantissa, if exp < 0 { '-' } else { '+' }, exp.abs())
    }
}

fn split_exponent(sci: &str) -> (&str, i32) {
    match sci.split_once('e') {
        Some((m, e)) => (m, e.parse().unwrap_or(0)),
        None => (sci, 0),
    }
}

/// `repr()` of a string.
pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32))
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Parsed `[[fill]align][sign][#][0][width][grouping][.precision][type]`.
#[derive(Debug, Default, Clone, PartialEq)]
struct Spec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    alternate: bool,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str) -> Result<Spec, RuntimeError> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = Spec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');

    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = Some(chars[0]);
        out.align = Some(chars[1]);
        i = 2;
    } else if !chars.is_empty() && is_align(chars[0]) {
        out.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c @ ('+' | '-' | ' ')) = chars.get(i) {
        out.sign = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'#') {
        out.alternate = true;
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        out.zero = true;
        i += 1;
    }
    let start = i;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i > start {
        let digits: String = chars[start..i].iter().collect();
        out.width = digits
            .parse()
            .map_err(|_| value_error("Too many decimal digits in format string"))?;
        if out.width > MAX_FORMAT_WIDTH {
            return Err(RuntimeError::new(
                ErrorKind::Value,
                "format width is too large",
            ));
        }
    }
    if let Some(&c @ (',' | '_')) = chars.get(i) {
        out.grouping = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return Err(value_error("Format specifier missing precision"));
        }
        let digits: String = chars[start..i].iter().collect();
        let precision: usize = digits
            .parse()
            .map_err(|_| value_error("Too many decimal digits in format string"))?;
        if precision > MAX_FORMAT_WIDTH {
            return Err(value_error("precision is too large"));
        }
        out.precision = Some(precision);
    }
    if i < chars.len() {
        out.kind = Some(chars[i]);
        i += 1;
    }
    if i != chars.len() {
        return Err(value_error(format!("Invalid format specifier '{}'", spec)));
    }
    Ok(out)
}

/// Applies a format spec to an object (`format(obj, spec)`).
pub(crate) fn format_object(obj: &Object, spec: &str) -> Result<String, RuntimeError> {
    if spec.is_empty() {
        return obj.to_str();
    }
    let spec = parse_spec(spec)?;
    match obj {
        Object::Int(_) | Object::Bool(_) => {
            let value = obj.as_int().unwrap_or(0);
            match spec.kind {
                None | Some('d') | Some('n') => format_int(value, &spec, 10),
                Some('x') => format_int(value, &spec, 16),
                Some('X') => format_int(value, &spec, 16).map(|s| s.to_uppercase()),
                Some('o') => format_int(value, &spec, 8),
                Some('b') => format_int(value, &spec, 2),
                Some('c') => {
                    let c = u32::try_from(value)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or_else(|| RuntimeError::new(ErrorKind::Overflow, "%c arg not in range(0x110000)"))?;
                    pad(c.to_string(), &spec, '<')
                }
                Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') => format_float(value as f64, &spec),
                Some(k) => Err(unknown_code(k, "int")),
            }
        }
        Object::Float(f) => match spec.kind {
            None | Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%' | 'n') => format_float(*f, &spec),
            Some(k) => Err(unknown_code(k, "float")),
        },
        Object::Str(s) => match spec.kind {
            None | Some('s') => {
                if spec.sign.is_some() {
                    return Err(value_error("Sign not allowed in string format specifier"));
                }
                let text: String = match spec.precision {
                    Some(p) => s.chars().take(p).collect(),
                    None => s.to_string(),
                };
                pad(text, &spec, '<')
            }
            Some(k) => Err(unknown_code(k, "str")),
        },
        Object::None | Object::List(_) | Object::Tuple(_) | Object::Dict(_) => {
            if spec.kind.is_some() || spec.precision.is_some() || spec.sign.is_some() {
                return Err(type_error(format!(
                    "unsupported format string passed to {}.__format__",
                    obj.type_name()
                )));
            }
            pad(obj.to_str()?, &spec, '<')
        }
        other => Err(type_error(format!(
            "unsupported format string passed to {}.__format__",
            other.type_name()
        ))),
    }
}

fn unknown_code(code: char, type_name: &str) -> RuntimeError {
    value_error(format!(
        "Unknown format code '{}' for object of type '{}'",
        code, type_name
    ))
}

fn format_int(value: i64, spec: &Spec, radix: u32) -> Result<String, RuntimeError> {
    if spec.precision.is_some() {
        return Err(value_error("Precision not allowed in integer format specifier"));
    }
    let magnitude = value.unsigned_abs();
    let mut digits = match radix {
        16 => format!("{:x}", magnitude),
        8 => format!("{:o}", magnitude),
        2 => format!("{:b}", magnitude),
        _ => magnitude.to_string(),
    };
    if let Some(sep) = spec.grouping {
        let group = if radix == 10 { 3 } else { 4 };
        digits = group_digits(&digits, sep, group);
    }
    let prefix = if spec.alternate {
        match radix {
            16 => "0x",
            8 => "0o",
            2 => "0b",
            _ => "",
        }
    } else {
        ""
    };
    let sign = sign_text(value < 0, spec.sign);
    finish_number(sign, &format!("{}{}", prefix, digits), spec)
}

fn sign_text(negative: bool, sign: Option<char>) -> &'static str {
    if negative {
        "-"
    } else {
        match sign {
            Some('+') => "+",
            Some(' ') => " ",
            _ => "",
        }
    }
}

fn group_digits(digits: &str, sep: char, group: usize) -> String {
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::with_capacity(chars.len() + chars.len() / group);
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % group == 0 {
            out.push(sep);
        }
        out.push(*c);
    }
    out
}

fn format_float(value: f64, spec: &Spec) -> Result<String, RuntimeError> {
    let negative = value.is_sign_negative() && !value.is_nan();
    let magnitude = value.abs();
    let upper = matches!(spec.kind, Some('E' | 'F' | 'G'));

    let body = if !magnitude.is_finite() {
        let text = if magnitude.is_nan() { "nan" } else { "inf" };
        let text = if upper { text.to_uppercase() } else { text.to_string() };
        if spec.kind == Some('%') {
            format!("{}%", text)
        } else {
            text
        }
    } else {
        match spec.kind {
            Some('f' | 'F') => fixed(magnitude, spec.precision.unwrap_or(6), spec),
            Some('e' | 'E') => {
                let text = scientific(magnitude, spec.precision.unwrap_or(6), spec.alternate);
                if upper {
                    text.to_uppercase()
                } else {
                    text
                }
            }
            Some('%') => format!("{}%", fixed(magnitude * 100.0, spec.precision.unwrap_or(6), spec)),
            Some('g' | 'G' | 'n') => {
                let text = general(magnitude, spec.precision.unwrap_or(6), spec.alternate, spec);
                if upper {
                    text.to_uppercase()
                } else {
                    text
                }
            }
            _ => match spec.precision {
                // No type with a precision behaves like 'g' but keeps a
                // fractional digit.
                Some(p) => {
                    let text = general(magnitude, p, spec.alternate, spec);
                    if text.contains(['.', 'e']) {
                        text
                    } else {
                        format!("{}.0", text)
                    }
                }
                None => {
                    let text = float_repr(magnitude);
                    match spec.grouping {
                        Some(sep) if !text.contains('e') => group_integral(&text, sep),
                        _ => text,
                    }
                }
            },
        }
    };
    finish_number(sign_text(negative, spec.sign), &body, spec)
}

fn fixed(magnitude: f64, precision: usize, spec: &Spec) -> String {
    let mut text = format!("{:.*}", precision, magnitude);
    if spec.alternate && precision == 0 {
        text.push('.');
    }
    match spec.grouping {
        Some(sep) => group_integral(&text, sep),
        None => text,
    }
}

fn group_integral(text: &str, sep: char) -> String {
    let (int_part, rest) = match text.find('.') {
        Some(i) => text.split_at(i),
        None => (text, ""),
    };
    format!("{}{}", group_digits(int_part, sep, 3), rest)
}

fn scientific(magnitude: f64, precision: usize, alternate: bool) -> String {
    let text = format!("{:.*e}", precision, magnitude);
    let (mantissa, exp) = split_exponent(&text);
    let mantissa = if alternate && precision == 0 {
        format!("{}.", mantissa)
    } else {
        mantissa.to_string()
    };
    format!("{}e{}{:02}", mantissa, if exp < 0 { '-' } else { '+' }, exp.abs())
}

fn general(magnitude: f64, precision: usize, alternate: bool, spec: &Spec) -> String {
    let p = precision.max(1);
    if magnitude == 0.0 {
        return if alternate {
            format!("{:.*}", p - 1, 0.0)
        } else {
            "0".to_string()
        };
    }
    let probe = format!("{:.*e}", p - 1, magnitude);
    let (_, exp) = split_exponent(&probe);
    if exp >= -4 && (exp as i64) < p as i64 {
        let decimals = (p as i64 - 1 - exp as i64).max(0) as usize;
        let mut text = format!("{:.*}", decimals, magnitude);
        if !alternate {
            text = strip_fraction_zeros(&text);
        }
        match spec.grouping {
            Some(sep) => group_integral(&text, sep),
            None => text,
        }
    } else {
        let text = scientific(magnitude, p - 1, alternate);
        if alternate {
            return text;
        }
        let (mantissa, exp) = split_exponent(&text);
        format!(
            "{}e{}{:02}",
            strip_fraction_zeros(mantissa),
            if exp < 0 { '-' } else { '+' },
            exp.abs()
        )
    }
}

fn strip_fraction_zeros(text: &str) -> String {
    if !text.contains('.') {
        return text.to_string();
    }
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn finish_number(sign: &str, body: &str, spec: &Spec) -> Result<String, RuntimeError> {
    if spec.zero && spec.align.is_none() {
        let fill = spec.fill.unwrap_or('0');
        let used = sign.chars().count() + body.chars().count();
        let padding = spec.width.saturating_sub(used);
        let fill_text: String = std::iter::repeat(fill).take(padding).collect();
        return Ok(format!("{}{}{}", sign, fill_text, body));
    }
    if spec.align == Some('=') {
        let fill = spec.fill.unwrap_or(' ');
        let used = sign.chars().count() + body.chars().count();
        let padding = spec.width.saturating_sub(used);
        let fill_text: String = std::iter::repeat(fill).take(padding).collect();
        return Ok(format!("{}{}{}", sign, fill_text, body));
    }
    pad(format!("{}{}", sign, body), spec, '>')
}

fn pad(text: String, spec: &Spec, default_align: char) -> Result<String, RuntimeError> {
    let len = text.chars().count();
    if spec.width <= len {
        return Ok(text);
    }
    let fill = spec.fill.unwrap_or(' ');
    let padding = spec.width - len;
    let repeat = |n: usize| -> String { std::iter::repeat(fill).take(n).collect() };
    Ok(match spec.align.unwrap_or(default_align) {
        '<' => format!("{}{}", text, repeat(padding)),
        '^' => format!("{}{}{}", repeat(padding / 2), text, repeat(padding - padding / 2)),
        _ => format!("{}{}", repeat(padding), text),
    })
}

/// printf-style `template % args`.
pub(crate) fn percent_format(template: &str, args: &Object) -> Result<String, RuntimeError> {
    let positional: Vec<Object> = match args {
        Object::Tuple(t) => t.items().to_vec(),
        Object::Dict(_) => Vec::new(),
        other => vec![other.clone()],
    };
    let mapping = match args {
        Object::Dict(d) => Some(d.clone()),
        _ => None,
    };

    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut next = 0usize;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c != '%' {
            out.push(c);
            i += 1;
            continue;
        }
        i += 1;
        if chars.get(i) == Some(&'%') {
            out.push('%');
            i += 1;
            continue;
        }

        let mut key = None;
        if chars.get(i) == Some(&'(') {
            let end = chars[i..]
                .iter()
                .position(|&c| c == ')')
                .map(|p| i + p)
                .ok_or_else(|| value_error("incomplete format key"))?;
            key = Some(chars[i + 1..end].iter().collect::<String>());
            i = end + 1;
        }

        let mut spec_text = String::new();
        while let Some(&c) = chars.get(i) {
            if matches!(c, '-' | '+' | ' ' | '#' | '0') {
                spec_text.push(c);
                i += 1;
            } else {
                break;
            }
        }
        while let Some(&c) = chars.get(i) {
            if c.is_ascii_digit() || c == '.' {
                spec_text.push(c);
                i += 1;
            } else {
                break;
            }
        }
        let Some(&code) = chars.get(i) else {
            return Err(value_error("incomplete format"));
        };
        i += 1;

        let arg = match (&key, &mapping) {
            (Some(k), Some(d)) => d
                .borrow()
                .get(&Object::str(k.as_str()).hash_key()?)
                .cloned()
                .ok_or_else(|| RuntimeError::new(ErrorKind::Key, quote_str(k)))?,
            (Some(_), None) => return Err(type_error("format requires a mapping")),
            (None, _) => {
                let arg = positional
                    .get(next)
                    .cloned()
                    .ok_or_else(|| type_error("not enough arguments for format string"))?;
                next += 1;
                arg
            }
        };

        // Translate printf flags to a format spec.
        let left = spec_text.contains('-');
        let mut spec = String::new();
        if left {
            spec.push('<');
        }
        if spec_text.contains('+') {
            spec.push('+');
        } else if spec_text.contains(' ') {
            spec.push(' ');
        }
        if spec_text.contains('#') {
            spec.push('#');
        }
        let numeric_part: String = spec_text
            .chars()
            .skip_while(|c| matches!(c, '-' | '+' | ' ' | '#' | '0'))
            .collect();
        if spec_text.contains('0') && !left && spec_text.starts_with(['-', '+', ' ', '#', '0']) {
            let flags: String = spec_text
                .chars()
                .take_while(|c| matches!(c, '-' | '+' | ' ' | '#' | '0'))
                .collect();
            if flags.contains('0') {
                spec.push('0');
            }
        }
        spec.push_str(&numeric_part);

        let piece = match code {
            's' => format_object(&Object::str(arg.to_str()?), &spec)?,
            'r' | 'a' => format_object(&Object::str(arg.repr()?), &spec)?,
            'd' | 'i' | 'u' => {
                let int = match &arg {
                    Object::Float(f) if f.is_finite() => Object::Int(f.trunc() as i64),
                    Object::Int(_) | Object::Bool(_) => Object::Int(arg.as_int().unwrap_or(0)),
                    other => {
                        return Err(type_error(format!(
                            "%d format: a real number is required, not {}",
                            other.type_name()
                        )))
                    }
                };
                let spec = spec.split('.').next().unwrap_or("").to_string();
                format_object(&int, &spec)?
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'x' | 'X' | 'o' | 'c' => {
                let numeric = match (&arg, code) {
                    (Object::Int(_) | Object::Bool(_) | Object::Float(_), 'f' | 'F' | 'e' | 'E' | 'g' | 'G') => {
                        Object::Float(arg.as_f64().unwrap_or(0.0))
                    }
                    (Object::Int(_) | Object::Bool(_), _) => Object::Int(arg.as_int().unwrap_or(0)),
                    (Object::Str(s), 'c') if s.chars().count() == 1 => arg.clone(),
                    (other, _) => {
                        return Err(type_error(format!(
                            "%{} format: a number is required, not {}",
                            code,
                            other.type_name()
                        )))
                    }
                };
                if let Object::Str(s) = &numeric {
                    s.to_string()
                } else {
                    format_object(&numeric, &format!("{}{}", spec, code))?
                }
            }
            other => {
                return Err(value_error(format!(
                    "unsupported format character '{}'",
                    other
                )))
            }
        };
        out.push_str(&piece);
    }
    if mapping.is_none() && next < positional.len() {
        return Err(type_error("not all arguments converted during string formatting"));
    }
    Ok(out)
}

/// `str.format(*args, **kwargs)`.
pub(crate) fn str_format(
    template: &str,
    args: &[Object],
    kwargs: &[(String, Object)],
) -> Result<String, RuntimeError> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut auto_index = 0usize;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '{' {
            if chars.get(i + 1) == Some(&'{') {
                out.push('{');
                i += 2;
                continue;
            }
            let end = chars[i..]
                .iter()
                .position(|&c| c == '}')
                .map(|p| i + p)
                .ok_or_else(|| value_error("Single '{' encountered in format string"))?;
            let field: String = chars[i + 1..end].iter().collect();
            i = end + 1;

            let (head, spec) = match field.split_once(':') {
                Some((h, s)) => (h.to_string(), s.to_string()),
                None => (field.clone(), String::new()),
            };
            let (name, conversion) = match head.split_once('!') {
                Some((n, c)) => (n.to_string(), c.chars().next()),
                None => (head, None),
            };
            let value = if name.is_empty() {
                let v = args.get(auto_index).cloned().ok_or_else(|| {
                    RuntimeError::new(
                        ErrorKind::Index,
                        format!("Replacement index {} out of range for positional args tuple", auto_index),
                    )
                })?;
                auto_index += 1;
                v
            } else if let Ok(index) = name.parse::<usize>() {
                args.get(index).cloned().ok_or_else(|| {
                    RuntimeError::new(
                        ErrorKind::Index,
                        format!("Replacement index {} out of range for positional args tuple", index),
                    )
                })?
            } else {
                kwargs
                    .iter()
                    .find(|(k, _)| *k == name)
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| RuntimeError::new(ErrorKind::Key, quote_str(&name)))?
            };
            let value = match conversion {
                Some('r') | Some('a') => Object::str(value.repr()?),
                Some('s') => Object::str(value.to_str()?),
                Some(other) => {
                    return Err(value_error(format!(
                        "Unknown conversion specifier {}",
                        other
                    )))
                }
                None => value,
            };
            out.push_str(&format_object(&value, &spec)?);
            continue;
        }
        if c == '}' {
            if chars.get(i + 1) == Some(&'}') {
                out.push('}');
                i += 2;
                continue;
            }
            return Err(value_error("Single '}' encountered in format string"));
        }
        out.push(c);
        i += 1;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(obj: Object, spec: &str) -> String {
        format_object(&obj, spec).unwrap()
    }

    #[test]
    fn test_float_repr() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e-7), "1.5e-07");
        assert_eq!(float_repr(123456.789), "123456.789");
        assert_eq!(float_repr(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn test_quote_str() {
        assert_eq!(quote_str("abc"), "'abc'");
        assert_eq!(quote_str("it's"), "\"it's\"");
        assert_eq!(quote_str("a\nb"), "'a\\nb'");
    }

    #[test]
    fn test_format_specs() {
        assert_eq!(fmt(Object::Float(3.14159), ".2f"), "3.14");
        assert_eq!(fmt(Object::Float(1234567.891), ",.2f"), "1,234,567.89");
        assert_eq!(fmt(Object::Int(1234567), ","), "1,234,567");
        assert_eq!(fmt(Object::Int(42), "05d"), "00042");
        assert_eq!(fmt(Object::Int(-42), "+06d"), "-00042");
        assert_eq!(fmt(Object::Int(255), "#x"), "0xff");
        assert_eq!(fmt(Object::str("ab"), ">5"), "   ab");
        assert_eq!(fmt(Object::str("ab"), "*^6"), "**ab**");
        assert_eq!(fmt(Object::Float(0.256), ".1%"), "25.6%");
        assert_eq!(fmt(Object::Float(1234.5), ".3g"), "1.23e+03");
        assert_eq!(fmt(Object::Float(0.0001234), "g"), "0.0001234");
        assert_eq!(fmt(Object::Float(2.0), ".3"), "2.0");
        assert_eq!(fmt(Object::Float(12345.678), "e"), "1.234568e+04");
    }

    #[test]
    fn test_format_rejects_bad_specs() {
        assert!(format_object(&Object::str("x"), "d").is_err());
        assert!(format_object(&Object::Int(1), "1000000000").is_err());
        assert!(format_object(&Object::Int(1), ".2d").is_err());
    }

    #[test]
    fn test_percent_format() {
        let args = Object::tuple(vec![Object::str("x"), Object::Float(2.5), Object::Int(7)]);
        assert_eq!(
            percent_format("%s=%.1f (%03d) 100%%", &args).unwrap(),
            "x=2.5 (007) 100%"
        );
        assert_eq!(percent_format("%-4s|", &Object::str("a")).unwrap(), "a   |");
        assert!(percent_format("%s %s", &Object::str("a")).is_err());
        assert!(percent_format("%s", &Object::tuple(vec![Object::Int(1), Object::Int(2)])).is_err());
    }

    #[test]
    fn test_str_format() {
        let args = vec![Object::Int(1), Object::Float(2.345)];
        let kwargs = vec![("name".to_string(), Object::str("x"))];
        assert_eq!(
            str_format("{} {:.1f} {name!r} {0} {{}}", &args, &kwargs).unwrap(),
            "1 2.3 'x' 1 {}"
        );
        assert!(str_format("{5}", &args, &kwargs).is_err());
    }
}
