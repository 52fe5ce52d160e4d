use serde::{Deserialize, Serialize};
use std::fmt;

use super::value::Value;

/// Severity of a recorded finding. Ordered so `Info < Warning < Error`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Machine-readable finding codes.
pub mod codes {
    pub const MALFORMED_ROW: &str = "malformed_row";
    pub const COERCION_FAILED: &str = "coercion_failed";
    pub const COLUMN_RENAMED: &str = "column_renamed";
    pub const UNSUPPORTED_STRATEGY: &str = "unsupported_strategy";
    pub const UNKNOWN_FILTER_COLUMN: &str = "unknown_filter_column";
    pub const INVALID_FILTER: &str = "invalid_filter";
    pub const OUTLIER: &str = "outlier";
    pub const MISSING_COLUMN: &str = "missing_column";
    pub const NULL_VIOLATION: &str = "null_violation";
    pub const TYPE_MISMATCH: &str = "type_mismatch";
    pub const BELOW_MINIMUM: &str = "below_minimum";
    pub const ABOVE_MAXIMUM: &str = "above_maximum";
    pub const VALUE_CLIPPED: &str = "value_clipped";
    pub const ROW_DROPPED: &str = "row_dropped";
    pub const PATTERN_MISMATCH: &str = "pattern_mismatch";
    pub const VALUE_NOT_ALLOWED: &str = "value_not_allowed";
    pub const INVALID_RULE: &str = "invalid_rule";
}

/// A non-fatal finding recorded against a job. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationError {
    /// Zero-based row index in the dataset the stage saw; `None` for dataset-level findings.
    pub row: Option<usize>,
    pub column: Option<String>,
    pub message: String,
    pub value: Option<Value>,
    pub code: String,
    pub severity: Severity,
    /// Pipeline stage that produced the finding.
    pub stage: String,
}

impl ValidationError {
    pub fn new(
        stage: impl Into<String>,
        code: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            row: None,
            column: None,
            message: message.into(),
            value: None,
            code: code.into(),
            severity,
            stage: stage.into(),
        }
    }

    pub fn warning(stage: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage, code, Severity::Warning, message)
    }

    pub fn error(stage: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage, code, Severity::Error, message)
    }

    pub fn info(stage: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage, code, Severity::Info, message)
    }

    pub fn at_row(mut self, row: usize) -> Self {
        self.row = Some(row);
        self
    }

    pub fn in_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.severity, self.message, self.code)?;
        if let Some(row) = self.row {
            write!(f, " row={}", row)?;
        }
        if let Some(column) = &self.column {
            write!(f, " column={}", column)?;
        }
        if let Some(value) = &self.value {
            write!(f, " value={:?}", value.to_string())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_display() {
        let issue = ValidationError::warning("normalize", codes::COERCION_FAILED, "not a number")
            .at_row(1)
            .in_column("age")
            .with_value(Value::from("abc"));

        assert_eq!(issue.severity, Severity::Warning);
        assert_eq!(
            issue.to_string(),
            r#"[warning] not a number (coercion_failed) row=1 column=age value="abc""#
        );
        assert!(Severity::Info < Severity::Warning && Severity::Warning < Severity::Error);
    }
}
