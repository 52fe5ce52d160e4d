use chrono::NaiveDateTime;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::domain::{parse_datetime, Value};
use crate::error::{FormataError, Result};

/// One declarative predicate as it arrives on the wire.
///
/// Which operand fields matter depends on `op`: `value` for comparisons and text matches,
/// `min`/`max` for `between`, `start`/`end` for `range`. A bare scalar in place of a rule
/// object is shorthand for `equals`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<JsonValue>,
}

impl FilterRule {
    pub fn new(op: &str) -> Self {
        Self {
            op: Some(op.to_string()),
            ..Self::default()
        }
    }

    pub fn with_value(mut self, value: impl Into<JsonValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn between(min: impl Into<JsonValue>, max: impl Into<JsonValue>) -> Self {
        Self {
            min: Some(min.into()),
            max: Some(max.into()),
            ..Self::new("between")
        }
    }

    pub fn range(start: Option<&str>, end: Option<&str>) -> Self {
        Self {
            start: start.map(JsonValue::from),
            end: end.map(JsonValue::from),
            ..Self::new("range")
        }
    }

    fn from_json(raw: JsonValue) -> Self {
        match raw {
            JsonValue::Object(_) => serde_json::from_value(raw).unwrap_or_else(|_| Self::new("<malformed>")),
            scalar => Self {
                value: Some(scalar),
                ..Self::default()
            },
        }
    }

    /// Resolve the operator and operands into an evaluable condition.
    pub fn compile(&self) -> Condition {
        let op = match self.op.as_deref().map(str::trim) {
            Some(op) => op.to_ascii_lowercase(),
            None if self.value.is_some() => "equals".to_string(),
            None => return Condition::Invalid("rule has no operator".to_string()),
        };

        let value = || self.value.clone().map(Value::from).filter(|v| !v.is_null());
        let needs_value = |build: fn(Value) -> Condition| match value() {
            Some(v) => build(v),
            None => Condition::Invalid(format!("operator '{}' needs a value", op)),
        };

        match op.as_str() {
            "equals" | "==" => needs_value(Condition::Equals),
            "contains" => needs_value(|v| Condition::Contains(v.to_string().to_lowercase())),
            "starts_with" => needs_value(|v| Condition::StartsWith(v.to_string().to_lowercase())),
            "ends_with" => needs_value(|v| Condition::EndsWith(v.to_string().to_lowercase())),
            ">" => needs_value(|v| Condition::Compare(Comparison::Gt, v)),
            ">=" => needs_value(|v| Condition::Compare(Comparison::Gte, v)),
            "<" => needs_value(|v| Condition::Compare(Comparison::Lt, v)),
            "<=" => needs_value(|v| Condition::Compare(Comparison::Lte, v)),
            "between" => {
                let bound = |b: &Option<JsonValue>| b.clone().map(Value::from).and_then(|v| v.as_f64());
                match (bound(&self.min), bound(&self.max)) {
                    (Some(min), Some(max)) => Condition::Between { min, max },
                    _ => Condition::Invalid("between needs numeric min and max".to_string()),
                }
            }
            "range" => {
                let start = date_bound(&self.start);
                let end = date_bound(&self.end);
                match (start, end) {
                    (Ok(start), Ok(end)) => Condition::Range { start, end },
                    _ => Condition::Invalid("range bounds must be dates".to_string()),
                }
            }
            "in" => match &self.value {
                Some(JsonValue::Array(items)) => Condition::In(
                    items
                        .iter()
                        .map(|item| Value::from(item.clone()).to_string().trim().to_lowercase())
                        .filter(|s| !s.is_empty())
                        .collect(),
                ),
                Some(JsonValue::Null) | None => Condition::Invalid("operator 'in' needs a value".to_string()),
                Some(other) => Condition::In(
                    Value::from(other.clone())
                        .to_string()
                        .split(',')
                        .map(|s| s.trim().to_lowercase())
                        .filter(|s| !s.is_empty())
                        .collect(),
                ),
            },
            other => Condition::Invalid(format!("unsupported operator '{}'", other)),
        }
    }
}

/// Absent or null bounds are unbounded; present bounds must parse.
fn date_bound(raw: &Option<JsonValue>) -> std::result::Result<Option<NaiveDateTime>, ()> {
    match raw {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) if s.trim().is_empty() => Ok(None),
        Some(JsonValue::String(s)) => parse_datetime(s).map(Some).ok_or(()),
        Some(_) => Err(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    pub fn holds<T: PartialOrd>(&self, left: T, right: T) -> bool {
        match self {
            Comparison::Gt => left > right,
            Comparison::Gte => left >= right,
            Comparison::Lt => left < right,
            Comparison::Lte => left <= right,
        }
    }
}

/// A compiled rule. Text operands are stored lowercased.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals(Value),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Compare(Comparison, Value),
    Between { min: f64, max: f64 },
    Range {
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    },
    In(Vec<String>),
    /// Bad shape or operator; matches nothing.
    Invalid(String),
}

/// Rules keyed by column (or pseudo-column), evaluated with AND semantics.
///
/// On the wire this is a JSON object whose values are a rule or an array of rules; repeated
/// rules on one column must all pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    pub rules: Vec<(String, FilterRule)>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, rule: FilterRule) -> Self {
        self.rules.push((column.into(), rule));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn from_json(raw: JsonValue) -> Result<Self> {
        let map = match raw {
            JsonValue::Null => return Ok(Self::default()),
            JsonValue::Object(map) => map,
            other => {
                return Err(FormataError::Filter {
                    column: "*".to_string(),
                    message: format!("filters must be an object keyed by column, got {}", other),
                })
            }
        };

        let mut rules = Vec::new();
        for (column, spec) in map {
            match spec {
                JsonValue::Array(items) => {
                    for item in items {
                        rules.push((column.clone(), FilterRule::from_json(item)));
                    }
                }
                single => rules.push((column, FilterRule::from_json(single))),
            }
        }
        Ok(Self { rules })
    }
}

impl Serialize for FilterSet {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut grouped: Vec<(&str, Vec<&FilterRule>)> = Vec::new();
        for (column, rule) in &self.rules {
            match grouped.iter().position(|(c, _)| *c == column.as_str()) {
                Some(i) => grouped[i].1.push(rule),
                None => grouped.push((column.as_str(), vec![rule])),
            }
        }
        let mut map = serializer.serialize_map(Some(grouped.len()))?;
        for (column, rules) in grouped {
            if rules.len() == 1 {
                map.serialize_entry(column, rules[0])?;
            } else {
                map.serialize_entry(column, &rules)?;
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FilterSet {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = JsonValue::deserialize(deserializer)?;
        FilterSet::from_json(raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_single_and_repeated_rules() {
        let set: FilterSet = serde_json::from_value(json!({
            "age": [{"op": ">=", "value": 18}, {"op": "<", "value": 65}],
            "city": {"op": "contains", "value": "os"},
            "country": "NO"
        }))
        .unwrap();
        assert_eq!(set.len(), 4);
        assert_eq!(set.rules[0].0, "age");
        assert_eq!(set.rules[3].1.compile(), Condition::Equals(Value::from("NO")));

        let back = serde_json::to_value(&set).unwrap();
        assert_eq!(back["age"].as_array().unwrap().len(), 2);
        assert_eq!(back["city"]["op"], "contains");
    }

    #[test]
    fn test_compile_operators() {
        assert_eq!(
            FilterRule::new(">=").with_value(30).compile(),
            Condition::Compare(Comparison::Gte, Value::Number(30.0))
        );
        assert_eq!(
            FilterRule::new("Contains").with_value("OsL").compile(),
            Condition::Contains("osl".to_string())
        );
        assert_eq!(
            FilterRule::between(10, "20").compile(),
            Condition::Between { min: 10.0, max: 20.0 }
        );
        assert_eq!(
            FilterRule::new("in").with_value("Oslo, Rome ,").compile(),
            Condition::In(vec!["oslo".to_string(), "rome".to_string()])
        );
        assert_eq!(
            FilterRule::new("in").with_value(json!(["A", 2])).compile(),
            Condition::In(vec!["a".to_string(), "2".to_string()])
        );
    }

    #[test]
    fn test_range_bounds_are_optional() {
        match FilterRule::range(Some("2024-01-01"), None).compile() {
            Condition::Range { start, end } => {
                assert!(start.is_some());
                assert!(end.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            FilterRule::range(Some("yesterday-ish"), None).compile(),
            Condition::Invalid(_)
        ));
    }

    #[test]
    fn test_invalid_shapes() {
        assert!(matches!(FilterRule::new("between").compile(), Condition::Invalid(_)));
        assert!(matches!(FilterRule::new(">").compile(), Condition::Invalid(_)));
        assert!(matches!(FilterRule::new("like").with_value("x").compile(), Condition::Invalid(_)));
        assert!(matches!(FilterRule::default().compile(), Condition::Invalid(_)));
        let set = FilterSet::from_json(json!({"a": {"op": 5}})).unwrap();
        assert!(matches!(set.rules[0].1.compile(), Condition::Invalid(_)));
        assert!(FilterSet::from_json(json!([1, 2])).is_err());
    }
}
