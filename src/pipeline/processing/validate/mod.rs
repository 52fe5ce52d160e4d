//! Schema checks over a dataset.
//!
//! Validation never fails the pipeline: every violation becomes a [`ValidationError`] and
//! processing continues. Rules may also clip out-of-range values or drop the offending row.

pub mod quality;

pub use quality::quality_score;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::filter::resolve_column;
use crate::domain::{codes, ColumnType, Dataset, QualityReport, Stage, ValidationError, Value};

/// What to do with a value outside `min..=max`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RangeAction {
    /// Record an error and keep the value.
    #[default]
    Flag,
    /// Clamp to the violated bound and record a warning.
    Clip,
    /// Remove the row and record a warning.
    Drop,
}

/// Constraints for one column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ColumnRule {
    /// Expected type; cells that cannot be read as this type are type mismatches
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub column_type: Option<ColumnType>,
    /// The column must be present
    pub required: bool,
    /// Null cells are allowed
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Regular expression the string form must match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Permitted values, compared case-insensitively on their string form
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    pub action: RangeAction,
}

impl Default for ColumnRule {
    fn default() -> Self {
        Self {
            column_type: None,
            required: false,
            nullable: true,
            min: None,
            max: None,
            pattern: None,
            allowed: None,
            action: RangeAction::Flag,
        }
    }
}

/// Rules keyed by column name.
pub type ValidationRules = BTreeMap<String, ColumnRule>;

#[derive(Debug, Clone)]
pub struct ValidateOutcome {
    pub dataset: Dataset,
    pub issues: Vec<ValidationError>,
    pub transformations: Vec<String>,
    pub quality: QualityReport,
}

fn issue(code: &str, severity_error: bool, column: &str, message: String) -> ValidationError {
    let stage = Stage::Validate.as_str();
    let issue = if severity_error {
        ValidationError::error(stage, code, message)
    } else {
        ValidationError::warning(stage, code, message)
    };
    issue.in_column(column)
}

pub struct Validator<'a> {
    rules: &'a ValidationRules,
}

impl<'a> Validator<'a> {
    pub fn new(rules: &'a ValidationRules) -> Self {
        Self { rules }
    }

    /// Validate `dataset`. `prior_issues` are earlier findings on the same job, used for
    /// the quality score only.
    pub fn validate(&self, mut dataset: Dataset, prior_issues: &[ValidationError]) -> ValidateOutcome {
        let mut issues = Vec::new();
        let mut transformations = Vec::new();

        if self.rules.is_empty() {
            check_inferred_schema(&dataset, &mut issues);
        } else {
            let mut dropped_rows = vec![false; dataset.row_count()];
            let mut clipped = 0usize;
            for (name, rule) in self.rules {
                clipped += apply_rule(&mut dataset, name, rule, &mut dropped_rows, &mut issues);
            }
            let dropped = dropped_rows.iter().filter(|d| **d).count();
            if dropped > 0 {
                let keep: Vec<bool> = dropped_rows.iter().map(|d| !d).collect();
                dataset.retain_rows(&keep);
                transformations.push(format!("dropped {} rows violating validation rules", dropped));
            }
            if clipped > 0 {
                transformations.push(format!("clipped {} values to rule bounds", clipped));
            }
        }

        let mut all_issues: Vec<ValidationError> = prior_issues.to_vec();
        all_issues.extend(issues.iter().cloned());
        let quality = quality_score(&dataset, &all_issues);

        info!(
            "Validated dataset: rows={} issues={} quality={:.1} ({})",
            dataset.row_count(),
            issues.len(),
            quality.overall_score,
            quality.grade
        );

        ValidateOutcome {
            dataset,
            issues,
            transformations,
            quality,
        }
    }
}

/// Without explicit rules, every column is checked against its own (declared or inferred) type.
fn check_inferred_schema(dataset: &Dataset, issues: &mut Vec<ValidationError>) {
    for idx in 0..dataset.column_count() {
        let column_type = dataset.effective_type(idx);
        let column = &dataset.columns[idx].name;
        for (row_idx, cell) in dataset.column_values(idx).enumerate() {
            if cell.conforms_to(column_type) || cell.coerce(column_type).is_some() {
                continue;
            }
            issues.push(
                issue(
                    codes::TYPE_MISMATCH,
                    true,
                    column,
                    format!("expected {} value", column_type),
                )
                .at_row(row_idx)
                .with_value(cell.clone()),
            );
        }
    }
}

/// Apply one column rule, returning the number of clipped cells.
fn apply_rule(
    dataset: &mut Dataset,
    name: &str,
    rule: &ColumnRule,
    dropped_rows: &mut [bool],
    issues: &mut Vec<ValidationError>,
) -> usize {
    let Some(idx) = resolve_column(dataset, name) else {
        if rule.required {
            issues.push(issue(
                codes::MISSING_COLUMN,
                true,
                name,
                format!("required column '{}' is missing", name),
            ));
        }
        return 0;
    };
    let column = dataset.columns[idx].name.clone();

    let pattern = match rule.pattern.as_deref().map(Regex::new) {
        Some(Ok(re)) => Some(re),
        Some(Err(e)) => {
            warn!("Invalid pattern for column '{}': {}", column, e);
            issues.push(issue(
                codes::INVALID_RULE,
                false,
                &column,
                format!("pattern is not a valid regular expression: {}", e),
            ));
            None
        }
        None => None,
    };
    let allowed: Option<Vec<String>> = rule
        .allowed
        .as_ref()
        .map(|values| values.iter().map(|v| v.to_string().to_lowercase()).collect());

    let mut clipped = 0;
    for (row_idx, row) in dataset.rows.iter_mut().enumerate() {
        let cell = &row[idx];
        if cell.is_null() {
            if !rule.nullable {
                issues.push(
                    issue(codes::NULL_VIOLATION, true, &column, "value is required".to_string())
                        .at_row(row_idx),
                );
            }
            continue;
        }

        if let Some(expected) = rule.column_type {
            if !cell.conforms_to(expected) && cell.coerce(expected).is_none() {
                issues.push(
                    issue(codes::TYPE_MISMATCH, true, &column, format!("expected {} value", expected))
                        .at_row(row_idx)
                        .with_value(cell.clone()),
                );
                continue;
            }
        }

        if let Some(re) = &pattern {
            if !re.is_match(&cell.to_string()) {
                issues.push(
                    issue(
                        codes::PATTERN_MISMATCH,
                        true,
                        &column,
                        format!("value does not match pattern '{}'", re.as_str()),
                    )
                    .at_row(row_idx)
                    .with_value(cell.clone()),
                );
            }
        }

        if let Some(allowed) = &allowed {
            if !allowed.contains(&cell.to_string().to_lowercase()) {
                issues.push(
                    issue(codes::VALUE_NOT_ALLOWED, true, &column, "value is not in the allowed set".to_string())
                        .at_row(row_idx)
                        .with_value(cell.clone()),
                );
            }
        }

        let Some(x) = cell.as_f64() else {
            continue;
        };
        let violation = match (rule.min, rule.max) {
            (Some(min), _) if x < min => Some((codes::BELOW_MINIMUM, min, "below minimum")),
            (_, Some(max)) if x > max => Some((codes::ABOVE_MAXIMUM, max, "above maximum")),
            _ => None,
        };
        let Some((code, bound, label)) = violation else {
            continue;
        };
        let original = cell.clone();
        match rule.action {
            RangeAction::Flag => issues.push(
                issue(code, true, &column, format!("value {} {} {}", x, label, bound))
                    .at_row(row_idx)
                    .with_value(original),
            ),
            RangeAction::Clip => {
                row[idx] = Value::Number(bound);
                clipped += 1;
                issues.push(
                    issue(
                        codes::VALUE_CLIPPED,
                        false,
                        &column,
                        format!("value {} {} {}; clipped", x, label, bound),
                    )
                    .at_row(row_idx)
                    .with_value(original),
                );
            }
            RangeAction::Drop => {
                dropped_rows[row_idx] = true;
                issues.push(
                    issue(
                        codes::ROW_DROPPED,
                        false,
                        &column,
                        format!("value {} {} {}; row dropped", x, label, bound),
                    )
                    .at_row(row_idx)
                    .with_value(original),
                );
            }
        }
    }
    clipped
}
