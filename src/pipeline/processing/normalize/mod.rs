//! Column naming, type inference and missing-value handling.

pub mod missing;

pub use missing::{analyze_missing, apply_strategy, MissingReport, MissingStrategy, StrategyOutcome};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::domain::{codes, dedupe_names, ColumnType, Dataset, Stage, ValidationError};

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w]+").expect("valid regex"));
static UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").expect("valid regex"));

/// Canonical column name: lowercase, runs of non-word characters collapsed to `_`,
/// no leading or trailing underscores. An empty result becomes `column`.
pub fn canonical_name(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let replaced = NON_WORD.replace_all(&lowered, "_");
    let collapsed = UNDERSCORES.replace_all(&replaced, "_");
    let trimmed = collapsed.trim_matches('_');
    if trimmed.is_empty() {
        "column".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Options for one normalization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeOptions {
    /// Rewrite column names to their canonical form.
    pub standardize_names: bool,
    /// Infer a type per column and coerce every cell to it.
    pub infer_types: bool,
    /// Strategy for columns without an override.
    pub missing: MissingStrategy,
    /// Per-column overrides, keyed by original or canonical column name.
    pub column_strategies: HashMap<String, MissingStrategy>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            standardize_names: true,
            infer_types: true,
            missing: MissingStrategy::Keep,
            column_strategies: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NormalizeOutcome {
    pub dataset: Dataset,
    pub issues: Vec<ValidationError>,
    pub transformations: Vec<String>,
}

pub struct Normalizer {
    pub options: NormalizeOptions,
}

impl Normalizer {
    pub fn new(options: NormalizeOptions) -> Self {
        Self { options }
    }

    pub fn normalize(&self, mut dataset: Dataset) -> NormalizeOutcome {
        let mut issues = Vec::new();
        let mut transformations = Vec::new();

        // Overrides may name a column before or after renaming
        let mut strategies: HashMap<String, MissingStrategy> = HashMap::new();
        for (key, strategy) in &self.options.column_strategies {
            strategies.insert(canonical_name(key), strategy.clone());
        }

        if self.options.standardize_names {
            let renamed = self.standardize_names(&mut dataset);
            if renamed > 0 {
                transformations.push(format!("standardized {} column names", renamed));
            }
        }

        if self.options.infer_types {
            let (coerced, coercion_issues) = infer_and_coerce(&mut dataset);
            if coerced > 0 {
                transformations.push(format!("coerced {} cells to inferred column types", coerced));
            }
            issues.extend(coercion_issues);
        }

        // Column indices shift when a column is dropped, so walk by name
        let names: Vec<String> = dataset.column_names().iter().map(|s| s.to_string()).collect();
        for name in names {
            let strategy = strategies
                .get(&canonical_name(&name))
                .unwrap_or(&self.options.missing);
            let Some(idx) = dataset.column_index(&name) else {
                continue;
            };
            match apply_strategy(&mut dataset, idx, strategy) {
                StrategyOutcome::Unchanged => {}
                StrategyOutcome::Applied(description) => {
                    debug!("Missing values: {}", description);
                    transformations.push(description);
                }
                StrategyOutcome::Unsupported(issue) => issues.push(issue),
            }
        }

        dataset.refresh_nullability();
        info!(
            "Normalized dataset: rows={} columns={} issues={}",
            dataset.row_count(),
            dataset.column_count(),
            issues.len()
        );

        NormalizeOutcome {
            dataset,
            issues,
            transformations,
        }
    }

    fn standardize_names(&self, dataset: &mut Dataset) -> usize {
        let canonical = dedupe_names(dataset.columns.iter().map(|c| canonical_name(&c.name)));
        let mut renamed = 0;
        for (meta, name) in dataset.columns.iter_mut().zip(canonical) {
            if meta.name != name {
                debug!("Renamed column '{}' -> '{}'", meta.name, name);
                meta.name = name;
                renamed += 1;
            }
        }
        renamed
    }
}

/// Infer each column's type from its first non-null value and coerce every cell.
///
/// Cells that cannot be coerced become null and are reported as `coercion_failed`.
fn infer_and_coerce(dataset: &mut Dataset) -> (usize, Vec<ValidationError>) {
    let mut coerced = 0;
    let mut issues = Vec::new();

    for idx in 0..dataset.column_count() {
        let column_type = ColumnType::infer_first(dataset.column_values(idx));
        let column = dataset.columns[idx].name.clone();
        dataset.columns[idx].column_type = column_type;
        if column_type == ColumnType::Unknown {
            continue;
        }

        for (row_idx, row) in dataset.rows.iter_mut().enumerate() {
            let cell = &row[idx];
            if cell.conforms_to(column_type) {
                continue;
            }
            match cell.coerce(column_type) {
                Some(value) => {
                    row[idx] = value;
                    coerced += 1;
                }
                None => {
                    issues.push(
                        ValidationError::warning(
                            Stage::Normalize.as_str(),
                            codes::COERCION_FAILED,
                            format!("value cannot be read as {}", column_type),
                        )
                        .at_row(row_idx)
                        .in_column(column.clone())
                        .with_value(cell.clone()),
                    );
                    row[idx] = crate::domain::Value::Null;
                }
            }
        }
    }

    (coerced, issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Value;

    fn dataset(columns: &[&str], rows: Vec<Vec<Value>>) -> Dataset {
        let mut ds = Dataset::new(columns.iter().copied());
        for row in rows {
            ds.push_row(row).unwrap();
        }
        ds
    }

    #[test]
    fn test_canonical_name() {
        assert_eq!(canonical_name("First Name"), "first_name");
        assert_eq!(canonical_name("  Amount ($) "), "amount");
        assert_eq!(canonical_name("e-mail__Address"), "e_mail_address");
        assert_eq!(canonical_name("%%%"), "column");
    }

    #[test]
    fn test_colliding_names_get_suffixes() {
        let ds = dataset(&["First Name", "first_name", "FIRST-NAME"], vec![]);
        let out = Normalizer::new(NormalizeOptions::default()).normalize(ds);
        assert_eq!(
            out.dataset.column_names(),
            vec!["first_name", "first_name_1", "first_name_2"]
        );
    }

    #[test]
    fn test_unparseable_cell_becomes_null_with_warning() {
        let ds = dataset(
            &["age"],
            vec![vec![Value::from("29")], vec![Value::from("not_a_number")]],
        );
        let out = Normalizer::new(NormalizeOptions::default()).normalize(ds);

        assert_eq!(out.dataset.columns[0].column_type, ColumnType::Numeric);
        assert_eq!(out.dataset.rows[0][0], Value::Number(29.0));
        assert_eq!(out.dataset.rows[1][0], Value::Null);
        assert!(out.dataset.columns[0].nullable);
        assert_eq!(out.issues.len(), 1);
        let issue = &out.issues[0];
        assert_eq!(issue.code, codes::COERCION_FAILED);
        assert_eq!(issue.row, Some(1));
        assert_eq!(issue.column.as_deref(), Some("age"));
        assert_eq!(issue.value, Some(Value::from("not_a_number")));
    }

    #[test]
    fn test_type_inference_per_column() {
        let ds = dataset(
            &["active", "joined", "note"],
            vec![
                vec![Value::Null, Value::from("2024-01-15"), Value::from("hi")],
                vec![Value::from("yes"), Value::from("2024-02-01"), Value::from("3")],
            ],
        );
        let out = Normalizer::new(NormalizeOptions::default()).normalize(ds);
        let types: Vec<ColumnType> = out.dataset.columns.iter().map(|c| c.column_type).collect();
        assert_eq!(
            types,
            vec![ColumnType::Boolean, ColumnType::DateTime, ColumnType::Text]
        );
        assert_eq!(out.dataset.rows[1][0], Value::Bool(true));
        assert_eq!(out.dataset.rows[1][2], Value::from("3"));
    }

    #[test]
    fn test_column_override_by_original_name() {
        let ds = dataset(
            &["Score", "City"],
            vec![
                vec![Value::from("10"), Value::Null],
                vec![Value::Null, Value::from("Oslo")],
                vec![Value::from("30"), Value::from("Oslo")],
            ],
        );
        let mut options = NormalizeOptions {
            missing: MissingStrategy::Mode,
            ..NormalizeOptions::default()
        };
        options
            .column_strategies
            .insert("Score".to_string(), MissingStrategy::Mean);
        let out = Normalizer::new(options).normalize(ds);

        assert_eq!(out.dataset.rows[1][0], Value::Number(20.0));
        assert_eq!(out.dataset.rows[0][1], Value::from("Oslo"));
        assert_eq!(out.transformations.len(), 4);
    }
}
