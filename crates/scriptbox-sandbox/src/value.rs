//! Owned data model that crosses the sandbox boundary.
//!
//! Script results, bindings and capability call arguments are all expressed
//! as [`Value`]. Unlike the interpreter's internal objects a `Value` is plain
//! data: it owns its contents, is `Send`, and serialises losslessly (tuples
//! stay tuples, dict keys keep their types, non-finite floats survive).

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(#[serde(with = "float_repr")] f64),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    /// Insertion-ordered key/value pairs.
    Dict(Vec<(Value, Value)>),
    /// Reference to a bound capability, by binding name.
    Capability(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Capability(_) => "capability",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Looks up a key in a `Dict`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dict(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Converts to plain JSON: dicts become objects (non-string keys are
    /// rendered as text), tuples become arrays, non-finite floats become
    /// strings.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::None => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(J::Number)
                .unwrap_or_else(|| J::String(float_repr::name(*f).to_string())),
            Value::Str(s) => J::String(s.clone()),
            Value::List(items) | Value::Tuple(items) => {
                J::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Dict(entries) => {
                let mut map = serde_json::Map::new();
                for (k, v) in entries {
                    let key = match k {
                        Value::Str(s) => s.clone(),
                        other => other.to_string(),
                    };
                    map.insert(key, v.to_json());
                }
                J::Object(map)
            }
            Value::Capability(name) => J::String(format!("<capability {}>", name)),
        }
    }

    /// Builds a value from plain JSON (objects become string-keyed dicts).
    pub fn from_json(json: &serde_json::Value) -> Value {
        use serde_json::Value as J;
        match json {
            J::Null => Value::None,
            J::Bool(b) => Value::Bool(*b),
            J::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            J::String(s) => Value::Str(s.clone()),
            J::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            J::Object(map) => Value::Dict(
                map.iter()
                    .map(|(k, v)| (Value::Str(k.clone()), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => f.write_str(&crate::script::format::float_repr(*x)),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(items) => {
                f.write_str("[")?;
                write_items(f, items)?;
                f.write_str("]")
            }
            Value::Tuple(items) => {
                f.write_str("(")?;
                write_items(f, items)?;
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Value::Dict(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_item(f, k)?;
                    f.write_str(": ")?;
                    write_item(f, v)?;
                }
                f.write_str("}")
            }
            Value::Capability(name) => write!(f, "<capability {}>", name),
        }
    }
}

fn write_items(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_item(f, item)?;
    }
    Ok(())
}

fn write_item(f: &mut fmt::Formatter<'_>, item: &Value) -> fmt::Result {
    match item {
        Value::Str(s) => f.write_str(&crate::script::format::quote_str(s)),
        other => write!(f, "{}", other),
    }
}

/// Serialises finite floats as JSON numbers and non-finite ones as
/// `"nan"`, `"inf"` or `"-inf"`.
mod float_repr {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn name(f: f64) -> &'static str {
        if f.is_nan() {
            "nan"
        } else if f > 0.0 {
            "inf"
        } else {
            "-inf"
        }
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_str(name(*value))
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(f) => Ok(f),
            Repr::Text(s) => match s.as_str() {
                "nan" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(serde::de::Error::custom(format!(
                    "invalid float value '{}'",
                    other
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_finite_floats_survive_serialization() {
        let value = Value::List(vec![
            Value::Float(f64::INFINITY),
            Value::Float(f64::NEG_INFINITY),
            Value::Float(1.5),
        ]);
        let json = serde_json::to_string(&value).unwrap();
        assert!(json.contains("\"inf\""));
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);

        let nan = serde_json::to_string(&Value::Float(f64::NAN)).unwrap();
        match serde_json::from_str::<Value>(&nan).unwrap() {
            Value::Float(f) => assert!(f.is_nan()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tuple_and_dict_keys_keep_their_types() {
        let value = Value::Dict(vec![(
            Value::Tuple(vec![Value::Int(1), Value::Int(2)]),
            Value::Str("pair".into()),
        )]);
        let json = serde_json::to_string(&value).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_display_matches_script_repr() {
        let value = Value::Dict(vec![
            (Value::Str("a".into()), Value::List(vec![Value::Int(1), Value::Float(2.0)])),
            (Value::Str("b".into()), Value::Tuple(vec![Value::None])),
        ]);
        assert_eq!(value.to_string(), "{'a': [1, 2.0], 'b': (None,)}");
    }

    #[test]
    fn test_plain_json_rendering() {
        let value = Value::Dict(vec![
            (Value::Str("n".into()), Value::Int(3)),
            (Value::Int(7), Value::Float(f64::NAN)),
        ]);
        assert_eq!(
            value.to_json(),
            serde_json::json!({ "n": 3, "7": "nan" })
        );
    }
}
