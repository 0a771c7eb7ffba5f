//! Reference tabular capability: named in-memory tables with read-only
//! query methods.
//!
//! Tables are loaded from JSON arrays of records (objects). Columns are the
//! union of record keys in first-seen order; missing cells are `None`.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

use super::{Capability, CapabilityError};
use crate::value::Value;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read dataset {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in dataset '{name}': {source}")]
    Parse {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("dataset '{name}' must be a JSON array of objects ({detail})")]
    Shape { name: String, detail: String },
}

#[derive(Debug, Clone, Default)]
struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    fn column_index(&self, table: &str, column: &str) -> Result<usize, CapabilityError> {
        self.columns.iter().position(|c| c == column).ok_or_else(|| {
            CapabilityError::NotFound(format!("table '{}' has no column '{}'", table, column))
        })
    }

    fn record(&self, row: &[Value]) -> Value {
        Value::Dict(
            self.columns
                .iter()
                .cloned()
                .map(Value::Str)
                .zip(row.iter().cloned())
                .collect(),
        )
    }
}

const METHODS: &[&str] = &[
    "tables",
    "columns",
    "column",
    "head",
    "rows",
    "count",
    "mean",
    "sum",
    "min",
    "max",
    "unique",
    "value_counts",
    "filter_eq",
];

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: BTreeMap<String, Table>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a table from a JSON array of records.
    pub fn add_records(&mut self, name: &str, records: &serde_json::Value) -> Result<(), CatalogError> {
        let shape = |detail: &str| CatalogError::Shape {
            name: name.to_string(),
            detail: detail.to_string(),
        };
        let items = records.as_array().ok_or_else(|| shape("top level is not an array"))?;

        let mut table = Table::default();
        let mut objects = Vec::with_capacity(items.len());
        for item in items {
            let object = item.as_object().ok_or_else(|| shape("element is not an object"))?;
            for key in object.keys() {
                if !table.columns.contains(key) {
                    table.columns.push(key.clone());
                }
            }
            objects.push(object);
        }
        for object in objects {
            let row = table
                .columns
                .iter()
                .map(|c| object.get(c).map(Value::from_json).unwrap_or(Value::None))
                .collect();
            table.rows.push(row);
        }
        self.tables.insert(name.to_string(), table);
        Ok(())
    }

    pub fn add_json_str(&mut self, name: &str, json: &str) -> Result<(), CatalogError> {
        let records: serde_json::Value =
            serde_json::from_str(json).map_err(|source| CatalogError::Parse {
                name: name.to_string(),
                source,
            })?;
        self.add_records(name, &records)
    }

    pub fn load_json_file(&mut self, name: &str, path: &Path) -> Result<(), CatalogError> {
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.add_json_str(name, &text)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    fn table(&self, name: &str) -> Result<&Table, CapabilityError> {
        self.tables
            .get(name)
            .ok_or_else(|| CapabilityError::NotFound(format!("no table named '{}'", name)))
    }

    fn column_values(&self, table: &str, column: &str) -> Result<Vec<&Value>, CapabilityError> {
        let t = self.table(table)?;
        let idx = t.column_index(table, column)?;
        Ok(t.rows.iter().map(|r| &r[idx]).collect())
    }

    fn numbers(&self, method: &str, table: &str, column: &str) -> Result<Vec<f64>, CapabilityError> {
        let mut out = Vec::new();
        for value in self.column_values(table, column)? {
            match value {
                Value::None => {}
                Value::Int(_) | Value::Float(_) | Value::Bool(_) => {
                    out.push(value.as_f64().unwrap_or(0.0))
                }
                other => {
                    return Err(CapabilityError::InvalidArgument(format!(
                        "{}() requires a numeric column; '{}' contains {}",
                        method,
                        column,
                        other.type_name()
                    )))
                }
            }
        }
        Ok(out)
    }

    fn extreme(&self, table: &str, column: &str, want_max: bool) -> Result<Value, CapabilityError> {
        let mut best: Option<&Value> = None;
        for value in self.column_values(table, column)? {
            if matches!(value, Value::None) {
                continue;
            }
            best = match best {
                None => Some(value),
                Some(current) => {
                    let ord = order(value, current).ok_or_else(|| {
                        CapabilityError::InvalidArgument(format!(
                            "column '{}' mixes incomparable values",
                            column
                        ))
                    })?;
                    let better = if want_max { ord.is_gt() } else { ord.is_lt() };
                    Some(if better { value } else { current })
                }
            };
        }
        Ok(best.cloned().unwrap_or(Value::None))
    }
}

fn order(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if !matches!(a, Value::Str(_)) && !matches!(b, Value::Str(_)) => x == y,
        _ => a == b,
    }
}

/// Positional-or-keyword argument lookup.
fn arg<'a>(
    method: &str,
    args: &'a [Value],
    kwargs: &'a [(String, Value)],
    index: usize,
    name: &str,
) -> Option<&'a Value> {
    let _ = method;
    args.get(index)
        .or_else(|| kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v))
}

fn str_arg<'a>(
    method: &str,
    args: &'a [Value],
    kwargs: &'a [(String, Value)],
    index: usize,
    name: &str,
) -> Result<&'a str, CapabilityError> {
    match arg(method, args, kwargs, index, name) {
        Some(Value::Str(s)) => Ok(s),
        Some(other) => Err(CapabilityError::InvalidArgument(format!(
            "{}() argument '{}' must be str, not {}",
            method,
            name,
            other.type_name()
        ))),
        None => Err(CapabilityError::InvalidArgument(format!(
            "{}() missing required argument '{}'",
            method, name
        ))),
    }
}

impl Capability for Catalog {
    fn kind(&self) -> &str {
        "catalog"
    }

    fn has_method(&self, name: &str) -> bool {
        METHODS.contains(&name)
    }

    fn call(
        &self,
        method: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
    ) -> Result<Value, CapabilityError> {
        match method {
            "tables" => Ok(Value::List(
                self.table_names().map(|n| Value::Str(n.to_string())).collect(),
            )),
            "columns" => {
                let table = str_arg(method, args, kwargs, 0, "table")?;
                Ok(Value::List(
                    self.table(table)?
                        .columns
                        .iter()
                        .cloned()
                        .map(Value::Str)
                        .collect(),
                ))
            }
            "column" => {
                let table = str_arg(method, args, kwargs, 0, "table")?;
                let column = str_arg(method, args, kwargs, 1, "column")?;
                Ok(Value::List(
                    self.column_values(table, column)?.into_iter().cloned().collect(),
                ))
            }
            "head" | "rows" => {
                let table_name = str_arg(method, args, kwargs, 0, "table")?;
                let table = self.table(table_name)?;
                let limit = if method == "head" {
                    match arg(method, args, kwargs, 1, "n") {
                        None => 5,
                        Some(v) => v
                            .as_int()
                            .filter(|n| *n >= 0)
                            .ok_or_else(|| {
                                CapabilityError::InvalidArgument(
                                    "head() argument 'n' must be a non-negative int".to_string(),
                                )
                            })? as usize,
                    }
                } else {
                    usize::MAX
                };
                Ok(Value::List(
                    table
                        .rows
                        .iter()
                        .take(limit)
                        .map(|r| table.record(r))
                        .collect(),
                ))
            }
            "count" => {
                let table = str_arg(method, args, kwargs, 0, "table")?;
                Ok(Value::Int(self.table(table)?.rows.len() as i64))
            }
            "mean" | "sum" => {
                let table = str_arg(method, args, kwargs, 0, "table")?;
                let column = str_arg(method, args, kwargs, 1, "column")?;
                let numbers = self.numbers(method, table, column)?;
                let total: f64 = numbers.iter().sum();
                if method == "sum" {
                    return Ok(Value::Float(total));
                }
                if numbers.is_empty() {
                    return Ok(Value::None);
                }
                Ok(Value::Float(total / numbers.len() as f64))
            }
            "min" | "max" => {
                let table = str_arg(method, args, kwargs, 0, "table")?;
                let column = str_arg(method, args, kwargs, 1, "column")?;
                self.extreme(table, column, method == "max")
            }
            "unique" => {
                let table = str_arg(method, args, kwargs, 0, "table")?;
                let column = str_arg(method, args, kwargs, 1, "column")?;
                let mut seen: Vec<Value> = Vec::new();
                for value in self.column_values(table, column)? {
                    if !seen.iter().any(|s| loosely_equal(s, value)) {
                        seen.push(value.clone());
                    }
                }
                Ok(Value::List(seen))
            }
            "value_counts" => {
                let table = str_arg(method, args, kwargs, 0, "table")?;
                let column = str_arg(method, args, kwargs, 1, "column")?;
                let mut counts: Vec<(Value, i64)> = Vec::new();
                for value in self.column_values(table, column)? {
                    match counts.iter_mut().find(|(v, _)| loosely_equal(v, value)) {
                        Some((_, n)) => *n += 1,
                        None => counts.push((value.clone(), 1)),
                    }
                }
                // Stable: ties keep first-seen order.
                counts.sort_by(|a, b| b.1.cmp(&a.1));
                Ok(Value::Dict(
                    counts.into_iter().map(|(v, n)| (v, Value::Int(n))).collect(),
                ))
            }
            "filter_eq" => {
                let table_name = str_arg(method, args, kwargs, 0, "table")?;
                let column = str_arg(method, args, kwargs, 1, "column")?;
                let wanted = arg(method, args, kwargs, 2, "value").ok_or_else(|| {
                    CapabilityError::InvalidArgument(
                        "filter_eq() missing required argument 'value'".to_string(),
                    )
                })?;
                let table = self.table(table_name)?;
                let idx = table.column_index(table_name, column)?;
                Ok(Value::List(
                    table
                        .rows
                        .iter()
                        .filter(|r| loosely_equal(&r[idx], wanted))
                        .map(|r| table.record(r))
                        .collect(),
                ))
            }
            other => Err(CapabilityError::UnknownMethod {
                capability: self.kind().to_string(),
                method: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Catalog {
        let mut catalog = Catalog::new();
        catalog
            .add_json_str(
                "cities",
                r#"[
                    {"name": "Oslo", "country": "NO", "pop": 700000},
                    {"name": "Bergen", "country": "NO", "pop": 285000.5},
                    {"name": "Lyon", "country": "FR"}
                ]"#,
            )
            .unwrap();
        catalog
    }

    fn call(catalog: &Catalog, method: &str, args: Vec<Value>) -> Result<Value, CapabilityError> {
        catalog.call(method, &args, &[])
    }

    fn s(text: &str) -> Value {
        Value::Str(text.to_string())
    }

    #[test]
    fn test_columns_are_union_of_keys() {
        let catalog = sample();
        assert_eq!(
            call(&catalog, "columns", vec![s("cities")]).unwrap(),
            Value::List(vec![s("name"), s("country"), s("pop")])
        );
        assert_eq!(
            call(&catalog, "column", vec![s("cities"), s("pop")]).unwrap(),
            Value::List(vec![Value::Int(700000), Value::Float(285000.5), Value::None])
        );
    }

    #[test]
    fn test_aggregates_skip_missing() {
        let catalog = sample();
        assert_eq!(
            call(&catalog, "mean", vec![s("cities"), s("pop")]).unwrap(),
            Value::Float(492500.25)
        );
        assert_eq!(
            call(&catalog, "max", vec![s("cities"), s("name")]).unwrap(),
            s("Oslo")
        );
        assert!(matches!(
            call(&catalog, "sum", vec![s("cities"), s("name")]),
            Err(CapabilityError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_value_counts_and_filter() {
        let catalog = sample();
        assert_eq!(
            call(&catalog, "value_counts", vec![s("cities"), s("country")]).unwrap(),
            Value::Dict(vec![(s("NO"), Value::Int(2)), (s("FR"), Value::Int(1))])
        );
        let rows = call(&catalog, "filter_eq", vec![s("cities"), s("country"), s("FR")]).unwrap();
        match rows {
            Value::List(rows) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].get("name"), Some(&s("Lyon")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_head_keyword_and_errors() {
        let catalog = sample();
        let head = catalog
            .call("head", &[s("cities")], &[("n".to_string(), Value::Int(1))])
            .unwrap();
        assert!(matches!(head, Value::List(ref rows) if rows.len() == 1));
        assert!(matches!(
            call(&catalog, "count", vec![s("missing")]),
            Err(CapabilityError::NotFound(_))
        ));
        assert!(matches!(
            call(&catalog, "drop", vec![]),
            Err(CapabilityError::UnknownMethod { .. })
        ));
    }

    #[test]
    fn test_rejects_non_record_json() {
        let mut catalog = Catalog::new();
        assert!(matches!(
            catalog.add_json_str("bad", "{\"a\": 1}"),
            Err(CatalogError::Shape { .. })
        ));
        assert!(matches!(
            catalog.add_json_str("bad", "[1, 2]"),
            Err(CatalogError::Shape { .. })
        ));
        assert!(matches!(
            catalog.add_json_str("bad", "not json"),
            Err(CatalogError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trips.json");
        std::fs::write(&path, r#"[{"city": "Oslo", "km": 12.5}]"#).unwrap();

        let mut catalog = Catalog::new();
        catalog.load_json_file("trips", &path).unwrap();
        assert_eq!(catalog.table_names().collect::<Vec<_>>(), vec!["trips"]);
        assert_eq!(
            call(&catalog, "count", vec![s("trips")]).unwrap(),
            Value::Int(1)
        );

        let missing = dir.path().join("missing.json");
        assert!(matches!(
            catalog.load_json_file("x", &missing),
            Err(CatalogError::Io { .. })
        ));
    }
}
