//! Row filtering over a [`Dataset`].
//!
//! Every rule narrows a shared row mask, so the result is the AND of all rules (including
//! repeated rules on one column). Null cells never match. Rules that cannot be evaluated
//! (unknown column, bad shape, unsupported operator) match nothing and are reported.

pub mod rules;

pub use rules::{Comparison, Condition, FilterRule, FilterSet};

use tracing::{debug, info};

use super::normalize::canonical_name;
use crate::constants::{FILTER_DATE_RANGE, FILTER_NUMERIC_RANGE, FILTER_TEXT_SEARCH};
use crate::domain::{codes, ColumnType, Dataset, Stage, ValidationError, Value};

#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    pub dataset: Dataset,
    pub issues: Vec<ValidationError>,
    pub removed: usize,
}

/// Find a column by exact name, then case-insensitively, then by canonical name.
pub fn resolve_column(dataset: &Dataset, key: &str) -> Option<usize> {
    let key = key.trim();
    if let Some(idx) = dataset.column_index(key) {
        return Some(idx);
    }
    if let Some(idx) = dataset
        .columns
        .iter()
        .position(|c| c.name.eq_ignore_ascii_case(key))
    {
        return Some(idx);
    }
    let canonical = canonical_name(key);
    dataset
        .columns
        .iter()
        .position(|c| canonical_name(&c.name) == canonical)
}

impl Condition {
    /// Evaluate against a non-null cell of a column typed `column_type`.
    pub fn matches(&self, cell: &Value, column_type: ColumnType) -> bool {
        match self {
            Condition::Equals(operand) => match column_type {
                ColumnType::Numeric => matches!(
                    (cell.as_f64(), operand.as_f64()),
                    (Some(a), Some(b)) if a == b
                ),
                ColumnType::Boolean => matches!(
                    (cell.as_bool(), operand.as_bool()),
                    (Some(a), Some(b)) if a == b
                ),
                ColumnType::DateTime => matches!(
                    (cell.as_datetime(), operand.as_datetime()),
                    (Some(a), Some(b)) if a == b
                ),
                ColumnType::Text | ColumnType::Unknown => cell.to_string() == operand.to_string(),
            },
            Condition::Contains(needle) => cell.to_string().to_lowercase().contains(needle.as_str()),
            Condition::StartsWith(prefix) => cell.to_string().to_lowercase().starts_with(prefix.as_str()),
            Condition::EndsWith(suffix) => cell.to_string().to_lowercase().ends_with(suffix.as_str()),
            Condition::Compare(cmp, operand) => match column_type {
                ColumnType::Numeric => match (cell.as_f64(), operand.as_f64()) {
                    (Some(a), Some(b)) => cmp.holds(a, b),
                    _ => false,
                },
                ColumnType::DateTime => match (cell.as_datetime(), operand.as_datetime()) {
                    (Some(a), Some(b)) => cmp.holds(a, b),
                    _ => false,
                },
                _ => false,
            },
            Condition::Between { min, max } => {
                column_type == ColumnType::Numeric
                    && cell.as_f64().map_or(false, |x| *min <= x && x <= *max)
            }
            Condition::Range { start, end } => {
                column_type == ColumnType::DateTime
                    && cell.as_datetime().map_or(false, |dt| {
                        start.map_or(true, |s| dt >= s) && end.map_or(true, |e| dt <= e)
                    })
            }
            Condition::In(options) => {
                let needle = cell.to_string().trim().to_lowercase();
                options.iter().any(|o| *o == needle)
            }
            Condition::Invalid(_) => false,
        }
    }
}

fn filter_issue(code: &str, column: &str, message: String) -> ValidationError {
    ValidationError::warning(Stage::Filter.as_str(), code, message).in_column(column)
}

/// Compute which rows pass every rule, plus findings for rules that could not be evaluated.
pub fn matching_rows(dataset: &Dataset, filters: &FilterSet) -> (Vec<bool>, Vec<ValidationError>) {
    let mut mask = vec![true; dataset.row_count()];
    let mut issues = Vec::new();
    let types: Vec<ColumnType> = (0..dataset.column_count())
        .map(|idx| dataset.effective_type(idx))
        .collect();

    for (key, rule) in &filters.rules {
        let condition = rule.compile();
        if let Condition::Invalid(reason) = &condition {
            issues.push(filter_issue(codes::INVALID_FILTER, key, format!("filter on '{}' ignored: {}", key, reason)));
            mask.iter_mut().for_each(|keep| *keep = false);
            continue;
        }

        match key.as_str() {
            FILTER_TEXT_SEARCH => {
                let needle = match &condition {
                    Condition::Contains(needle) => needle.trim().to_lowercase(),
                    Condition::Equals(operand) => operand.to_string().trim().to_lowercase(),
                    _ => String::new(),
                };
                if needle.is_empty() {
                    continue;
                }
                for (keep, row) in mask.iter_mut().zip(&dataset.rows) {
                    *keep = *keep
                        && row
                            .iter()
                            .any(|cell| !cell.is_null() && cell.to_string().to_lowercase().contains(&needle));
                }
            }
            FILTER_DATE_RANGE | FILTER_NUMERIC_RANGE => {
                let wanted = if key == FILTER_DATE_RANGE {
                    ColumnType::DateTime
                } else {
                    ColumnType::Numeric
                };
                // Only the first column of the matching type is filtered; none means pass-through
                let Some(idx) = types.iter().position(|t| *t == wanted) else {
                    debug!("No {} column for {}; rows pass through", wanted, key);
                    continue;
                };
                apply_condition(&mut mask, dataset, idx, types[idx], &condition);
            }
            _ => match resolve_column(dataset, key) {
                Some(idx) => apply_condition(&mut mask, dataset, idx, types[idx], &condition),
                None => {
                    issues.push(filter_issue(
                        codes::UNKNOWN_FILTER_COLUMN,
                        key,
                        format!("filter column '{}' does not exist; no rows match", key),
                    ));
                    mask.iter_mut().for_each(|keep| *keep = false);
                }
            },
        }
    }

    (mask, issues)
}

fn apply_condition(mask: &mut [bool], dataset: &Dataset, idx: usize, column_type: ColumnType, condition: &Condition) {
    for (keep, row) in mask.iter_mut().zip(&dataset.rows) {
        if !*keep {
            continue;
        }
        let cell = &row[idx];
        *keep = !cell.is_null() && condition.matches(cell, column_type);
    }
}

/// Keep the rows that satisfy every rule, in their original order.
///
/// Column types used for evaluation are written back into the output metadata, so applying
/// the same filters again selects the same rows.
pub fn apply_filters(mut dataset: Dataset, filters: &FilterSet) -> FilterOutcome {
    if filters.is_empty() {
        return FilterOutcome {
            dataset,
            ..FilterOutcome::default()
        };
    }

    for idx in 0..dataset.column_count() {
        let resolved = dataset.effective_type(idx);
        dataset.columns[idx].column_type = resolved;
    }

    let before = dataset.row_count();
    let (mask, issues) = matching_rows(&dataset, filters);
    dataset.retain_rows(&mask);
    let removed = before - dataset.row_count();
    info!(
        "Applied {} filter rules: kept {} of {} rows",
        filters.len(),
        dataset.row_count(),
        before
    );

    FilterOutcome {
        dataset,
        issues,
        removed,
    }
}
