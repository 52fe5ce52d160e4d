use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tracing::{debug, info};

use super::{ParseOutcome, Parser};
use crate::constants::{FORMAT_JSON, JSON_WRAPPER_KEYS};
use crate::domain::{Dataset, Value};
use crate::error::{FormataError, Result};

/// JSON documents: a bare array of objects, an object wrapping that array under one of
/// [`JSON_WRAPPER_KEYS`], or a single object read as one row.
///
/// Nested objects are flattened with `_`-joined keys; arrays are kept as JSON text.
pub struct JsonParser;

impl Parser for JsonParser {
    fn format(&self) -> &'static str {
        FORMAT_JSON
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParseOutcome> {
        debug!("JsonParser: start bytes_len={}", bytes.len());
        let text = std::str::from_utf8(bytes)
            .map_err(|e| FormataError::parse(FORMAT_JSON, 1, format!("invalid UTF-8: {}", e)))?;
        if text.trim().is_empty() {
            return Ok(ParseOutcome::default());
        }

        let doc: JsonValue = serde_json::from_str(text)
            .map_err(|e| FormataError::parse(FORMAT_JSON, e.line(), e.to_string()))?;

        let items = match doc {
            JsonValue::Array(items) => items,
            JsonValue::Object(mut map) => {
                let wrapper = JSON_WRAPPER_KEYS
                    .iter()
                    .find(|key| matches!(map.get(**key), Some(JsonValue::Array(_))));
                match wrapper {
                    Some(key) => {
                        info!("JsonParser: found rows under '{}'", key);
                        match map.remove(*key) {
                            Some(JsonValue::Array(items)) => items,
                            _ => Vec::new(),
                        }
                    }
                    None if map.is_empty() => Vec::new(),
                    None => vec![JsonValue::Object(map)],
                }
            }
            other => {
                return Err(FormataError::parse(
                    FORMAT_JSON,
                    1,
                    format!("expected an array or object at the top level, found {}", type_name(&other)),
                ))
            }
        };

        Ok(ParseOutcome {
            dataset: rows_to_dataset(items)?,
            issues: Vec::new(),
        })
    }
}

fn rows_to_dataset(items: Vec<JsonValue>) -> Result<Dataset> {
    let mut columns: Vec<String> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut flat_rows = Vec::with_capacity(items.len());

    for item in items {
        let mut cells = Vec::new();
        match item {
            JsonValue::Object(_) => flatten("", item, &mut cells),
            scalar => cells.push(("value".to_string(), json_to_value(scalar))),
        }
        for (name, _) in &cells {
            if !positions.contains_key(name) {
                positions.insert(name.clone(), columns.len());
                columns.push(name.clone());
            }
        }
        flat_rows.push(cells);
    }

    let mut dataset = Dataset::new(columns);
    for cells in flat_rows {
        let mut row = vec![Value::Null; dataset.column_count()];
        for (name, value) in cells {
            if let Some(&idx) = positions.get(&name) {
                row[idx] = value;
            }
        }
        if row.iter().all(Value::is_null) {
            continue;
        }
        dataset.push_row(row)?;
    }
    Ok(dataset)
}

fn flatten(prefix: &str, value: JsonValue, out: &mut Vec<(String, Value)>) {
    match value {
        JsonValue::Object(map) => {
            for (key, nested) in map {
                let name = if prefix.is_empty() {
                    key
                } else {
                    format!("{}_{}", prefix, key)
                };
                flatten(&name, nested, out);
            }
        }
        other => out.push((prefix.to_string(), json_to_value(other))),
    }
}

fn json_to_value(value: JsonValue) -> Value {
    match value {
        JsonValue::String(s) => Value::from_raw(&s),
        JsonValue::Array(_) => Value::Text(value.to_string()),
        other => Value::from(other),
    }
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}
