use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::constants::NULL_TOKENS;

/// A single cell in a [`crate::domain::Dataset`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    DateTime(NaiveDateTime),
    Text(String),
}

/// Semantic type of a column, computed once by the normalizer and carried as data.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Boolean,
    Numeric,
    #[serde(alias = "date")]
    DateTime,
    #[serde(alias = "string")]
    Text,
    /// No non-null value has been seen yet.
    Unknown,
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];

/// Parse the date grammar shared by inference, coercion and filtering.
///
/// Timezone-qualified timestamps are converted to UTC; bare dates map to midnight.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d.and_time(NaiveTime::MIN));
        }
    }
    None
}

fn parse_number(raw: &str) -> Option<f64> {
    let n: f64 = raw.trim().parse().ok()?;
    n.is_finite().then_some(n)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "t" | "1" => Some(true),
        "false" | "no" | "n" | "f" | "0" => Some(false),
        _ => None,
    }
}

impl Value {
    /// Build a cell from raw text, mapping the null tokens to [`Value::Null`].
    pub fn from_raw(raw: &str) -> Self {
        let trimmed = raw.trim();
        if is_null_token(trimmed) {
            Value::Null
        } else {
            Value::Text(trimmed.to_string())
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => parse_number(s),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            Value::Text(s) => parse_datetime(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Text(s) => parse_bool(s),
            Value::Number(n) if *n == 0.0 => Some(false),
            Value::Number(n) if *n == 1.0 => Some(true),
            _ => None,
        }
    }

    /// Coerce this cell to `target`. `None` means the cell cannot represent that type.
    pub fn coerce(&self, target: ColumnType) -> Option<Value> {
        if self.is_null() {
            return Some(Value::Null);
        }
        match target {
            ColumnType::Boolean => self.as_bool().map(Value::Bool),
            ColumnType::Numeric => self.as_f64().map(Value::Number),
            ColumnType::DateTime => self.as_datetime().map(Value::DateTime),
            ColumnType::Text => Some(Value::Text(self.to_string())),
            ColumnType::Unknown => Some(self.clone()),
        }
    }

    /// Whether the cell already holds a value of `column_type` (nulls conform to anything).
    pub fn conforms_to(&self, column_type: ColumnType) -> bool {
        match (self, column_type) {
            (Value::Null, _) | (_, ColumnType::Unknown) => true,
            (Value::Bool(_), ColumnType::Boolean)
            | (Value::Number(_), ColumnType::Numeric)
            | (Value::DateTime(_), ColumnType::DateTime)
            | (Value::Text(_), ColumnType::Text) => true,
            _ => false,
        }
    }
}

pub(crate) fn is_null_token(raw: &str) -> bool {
    let lowered = raw.trim().to_ascii_lowercase();
    NULL_TOKENS.contains(&lowered.as_str())
}

impl ColumnType {
    /// Infer a type from one sample value.
    ///
    /// Booleans first, then numbers, then datetimes (strings longer than 8 characters that
    /// match the date grammar), else text.
    pub fn infer(sample: &Value) -> ColumnType {
        match sample {
            Value::Null => ColumnType::Unknown,
            Value::Bool(_) => ColumnType::Boolean,
            Value::Number(_) => ColumnType::Numeric,
            Value::DateTime(_) => ColumnType::DateTime,
            Value::Text(s) => {
                let s = s.trim();
                let lowered = s.to_ascii_lowercase();
                if matches!(lowered.as_str(), "true" | "false" | "yes" | "no") {
                    ColumnType::Boolean
                } else if parse_number(s).is_some() {
                    ColumnType::Numeric
                } else if s.len() > 8 && parse_datetime(s).is_some() {
                    ColumnType::DateTime
                } else {
                    ColumnType::Text
                }
            }
        }
    }

    /// Infer from the first non-null value in `values`.
    pub fn infer_first<'a, I>(values: I) -> ColumnType
    where
        I: IntoIterator<Item = &'a Value>,
    {
        values
            .into_iter()
            .find(|v| !v.is_null())
            .map(ColumnType::infer)
            .unwrap_or(ColumnType::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "boolean",
            ColumnType::Numeric => "numeric",
            ColumnType::DateTime => "datetime",
            ColumnType::Text => "text",
            ColumnType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn format_datetime(dt: &NaiveDateTime) -> String {
    if dt.time() == NaiveTime::MIN {
        dt.format("%Y-%m-%d").to_string()
    } else {
        dt.format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::DateTime(dt) => f.write_str(&format_datetime(dt)),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                serializer.serialize_i64(*n as i64)
            }
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::DateTime(dt) => serializer.serialize_str(&format_datetime(dt)),
            Value::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(Value::from(raw))
    }
}

impl From<serde_json::Value> for Value {
    fn from(raw: serde_json::Value) -> Self {
        match raw {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Text(other.to_string()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_from_first_sample() {
        assert_eq!(ColumnType::infer(&Value::from("29")), ColumnType::Numeric);
        assert_eq!(ColumnType::infer(&Value::from("TRUE")), ColumnType::Boolean);
        assert_eq!(ColumnType::infer(&Value::from("2024-03-01")), ColumnType::DateTime);
        // Too short for the date grammar even though it parses
        assert_eq!(ColumnType::infer(&Value::from("2024-3-1")), ColumnType::Text);
        assert_eq!(ColumnType::infer(&Value::from("hello")), ColumnType::Text);
        assert_eq!(ColumnType::infer(&Value::from("NaN")), ColumnType::Text);
        assert_eq!(
            ColumnType::infer_first(&[Value::Null, Value::from("3.5")]),
            ColumnType::Numeric
        );
        assert_eq!(ColumnType::infer_first(&[Value::Null]), ColumnType::Unknown);
    }

    #[test]
    fn test_parse_datetime_grammar() {
        let d = parse_datetime("2024-03-01").unwrap();
        assert_eq!(d.format("%Y-%m-%d %H:%M").to_string(), "2024-03-01 00:00");
        let d = parse_datetime("03/15/2024 10:30").unwrap();
        assert_eq!(d.format("%Y-%m-%d %H:%M").to_string(), "2024-03-15 10:30");
        let d = parse_datetime("2024-03-01T12:00:00+02:00").unwrap();
        assert_eq!(d.format("%H").to_string(), "10");
        assert!(parse_datetime("not a date").is_none());
    }

    #[test]
    fn test_display_and_serialize() {
        assert_eq!(Value::Number(29.0).to_string(), "29");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(Value::Null.to_string(), "");
        let dt = parse_datetime("2024-03-01").unwrap();
        assert_eq!(Value::DateTime(dt).to_string(), "2024-03-01");

        let json = serde_json::to_string(&vec![
            Value::Number(29.0),
            Value::Bool(true),
            Value::Null,
            Value::from("x"),
        ])
        .unwrap();
        assert_eq!(json, r#"[29,true,null,"x"]"#);
    }

    #[test]
    fn test_coerce_failure_is_none() {
        assert_eq!(
            Value::from("29").coerce(ColumnType::Numeric),
            Some(Value::Number(29.0))
        );
        assert_eq!(Value::from("not_a_number").coerce(ColumnType::Numeric), None);
        assert_eq!(Value::Null.coerce(ColumnType::Numeric), Some(Value::Null));
        assert_eq!(Value::from("yes").coerce(ColumnType::Boolean), Some(Value::Bool(true)));
    }

    #[test]
    fn test_null_tokens() {
        assert!(Value::from_raw("  N/A ").is_null());
        assert!(Value::from_raw("undefined").is_null());
        assert_eq!(Value::from_raw(" John "), Value::from("John"));
    }
}
