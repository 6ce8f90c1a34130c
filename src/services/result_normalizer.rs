// Shapes driver row-sets and federated JSON output into one column/row table.
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::str::FromStr;

use crate::api::middleware::AppError;
use crate::models::ResultTable;

/// Raw output of a backend before normalization.
#[derive(Debug, Clone)]
pub enum RawQueryOutput {
    /// Native driver result: ordered column names plus ordered rows.
    Tabular {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    /// Federated client `filteredResults` payload.
    Json(Value),
}

pub struct ResultNormalizer;

impl ResultNormalizer {
    pub fn normalize(raw: RawQueryOutput) -> Result<ResultTable, AppError> {
        match raw {
            RawQueryOutput::Tabular { columns, rows } => Ok(Self::from_driver(columns, rows)),
            RawQueryOutput::Json(value) => Self::from_json_rows(value),
        }
    }

    pub fn from_driver(columns: Vec<String>, rows: Vec<Vec<Value>>) -> ResultTable {
        Self::square(columns, rows)
    }

    /// Header-first array of arrays, or an array of objects.
    pub fn from_json_rows(value: Value) -> Result<ResultTable, AppError> {
        let items = match value {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                return Err(AppError::Database(format!(
                    "filteredResults must be an array, got {}",
                    json_type_name(&other)
                )))
            }
        };

        if items.is_empty() {
            return Ok(ResultTable::default());
        }

        if items.iter().all(Value::is_object) {
            return Ok(Self::from_objects(items));
        }

        let mut rows = items.into_iter().map(|item| match item {
            Value::Array(values) => values,
            scalar => vec![scalar],
        });

        let header = rows
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(|v| match v {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            })
            .collect();

        Ok(Self::square(header, rows.collect()))
    }

    fn from_objects(items: Vec<Value>) -> ResultTable {
        let mut columns: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        let objects: Vec<Map<String, Value>> = items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();

        for object in &objects {
            for key in object.keys() {
                if seen.insert(key.clone()) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = objects
            .into_iter()
            .map(|mut object| {
                columns
                    .iter()
                    .map(|column| object.remove(column).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Self::square(columns, rows)
    }

    /// Pad every row to the widest width and sanitize the header.
    fn square(mut columns: Vec<String>, mut rows: Vec<Vec<Value>>) -> ResultTable {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0).max(columns.len());

        while columns.len() < width {
            columns.push(String::new());
        }
        for row in &mut rows {
            row.resize(width, Value::Null);
        }

        ResultTable {
            columns: sanitize_columns(columns),
            rows,
        }
    }
}

/// Restrict names to `[A-Za-z0-9_]`, filling blanks and de-duplicating.
pub fn sanitize_columns(columns: Vec<String>) -> Vec<String> {
    let mut used = HashSet::new();
    columns
        .into_iter()
        .enumerate()
        .map(|(idx, name)| {
            let mut cleaned: String = name
                .trim()
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
                .collect();
            if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
                cleaned = format!("column_{}", idx + 1);
            }

            let mut candidate = cleaned.clone();
            let mut suffix = 2;
            while !used.insert(candidate.clone()) {
                candidate = format!("{}_{}", cleaned, suffix);
                suffix += 1;
            }
            candidate
        })
        .collect()
}

/// Decimal text from a driver. Integral values become JSON integers and values
/// an `f64` reproduces exactly become JSON numbers; anything else (high
/// precision, `NaN`) stays the exact text.
pub fn decimal_to_json(text: &str) -> Value {
    let Ok(decimal) = Decimal::from_str(text.trim()) else {
        return Value::String(text.to_string());
    };
    let decimal = decimal.normalize();
    if decimal.scale() == 0 {
        if let Some(int) = decimal.to_i64() {
            return json!(int);
        }
    }

    let exact = decimal.to_string();
    match exact.parse::<f64>() {
        Ok(float) if float.is_finite() && float.to_string() == exact => json!(float),
        _ => Value::String(exact),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
