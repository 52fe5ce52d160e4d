use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::{codes, ColumnMeta, ColumnType, Dataset, Stage, ValidationError, Value};

/// What to do with null cells in a column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissingStrategy {
    /// Leave nulls in place.
    #[default]
    Keep,
    /// Remove every row whose cell in this column is null.
    DropRows,
    /// Remove the column entirely.
    DropColumn,
    /// Carry the previous value down; leading nulls take the first value.
    ForwardFill,
    /// Carry the next value up; trailing nulls take the last value.
    BackFill,
    /// Numeric columns only.
    Mean,
    /// Numeric columns only.
    Median,
    /// Most frequent value; ties go to the value seen first.
    Mode,
    FillValue(Value),
    /// Keep nulls and add a boolean `{column}_missing` column.
    Flag,
}

impl MissingStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            MissingStrategy::Keep => "keep",
            MissingStrategy::DropRows => "drop_rows",
            MissingStrategy::DropColumn => "drop_column",
            MissingStrategy::ForwardFill => "forward_fill",
            MissingStrategy::BackFill => "back_fill",
            MissingStrategy::Mean => "mean",
            MissingStrategy::Median => "median",
            MissingStrategy::Mode => "mode",
            MissingStrategy::FillValue(_) => "fill_value",
            MissingStrategy::Flag => "flag",
        }
    }
}

/// Result of applying one strategy to one column.
#[derive(Debug, PartialEq)]
pub enum StrategyOutcome {
    /// Nothing to do (no nulls, or `keep`).
    Unchanged,
    /// Description of what was done, for the job's transformation list.
    Applied(String),
    /// The strategy does not fit the column's type.
    Unsupported(ValidationError),
}

/// Apply `strategy` to the column at `idx`.
pub fn apply_strategy(dataset: &mut Dataset, idx: usize, strategy: &MissingStrategy) -> StrategyOutcome {
    let column = dataset.columns[idx].name.clone();
    let nulls = dataset.null_count(idx);
    if nulls == 0 || *strategy == MissingStrategy::Keep {
        return StrategyOutcome::Unchanged;
    }
    let column_type = dataset.effective_type(idx);

    match strategy {
        MissingStrategy::Keep => StrategyOutcome::Unchanged,
        MissingStrategy::DropRows => {
            let keep: Vec<bool> = dataset.rows.iter().map(|row| !row[idx].is_null()).collect();
            dataset.retain_rows(&keep);
            StrategyOutcome::Applied(format!("{}: dropped {} rows with missing values", column, nulls))
        }
        MissingStrategy::DropColumn => {
            dataset.remove_column(idx);
            StrategyOutcome::Applied(format!("{}: dropped column ({} missing values)", column, nulls))
        }
        MissingStrategy::ForwardFill => {
            forward_fill(dataset, idx);
            back_fill(dataset, idx);
            StrategyOutcome::Applied(format!("{}: forward filled {} values", column, nulls))
        }
        MissingStrategy::BackFill => {
            back_fill(dataset, idx);
            forward_fill(dataset, idx);
            StrategyOutcome::Applied(format!("{}: back filled {} values", column, nulls))
        }
        MissingStrategy::Mean | MissingStrategy::Median => {
            if column_type != ColumnType::Numeric {
                return unsupported(&column, strategy, column_type);
            }
            let mut numbers: Vec<f64> = dataset.column_values(idx).filter_map(Value::as_f64).collect();
            if numbers.is_empty() {
                return StrategyOutcome::Unchanged;
            }
            let fill = if *strategy == MissingStrategy::Mean {
                numbers.iter().sum::<f64>() / numbers.len() as f64
            } else {
                median(&mut numbers)
            };
            fill_nulls(dataset, idx, &Value::Number(fill));
            StrategyOutcome::Applied(format!(
                "{}: filled {} values with {} ({:.2})",
                column,
                nulls,
                strategy.name(),
                fill
            ))
        }
        MissingStrategy::Mode => match mode(dataset.column_values(idx)) {
            Some(fill) => {
                let shown = fill.to_string();
                fill_nulls(dataset, idx, &fill);
                StrategyOutcome::Applied(format!("{}: filled {} values with mode ({})", column, nulls, shown))
            }
            None => StrategyOutcome::Unchanged,
        },
        MissingStrategy::FillValue(raw) => match raw.coerce(column_type) {
            Some(fill) if !fill.is_null() => {
                fill_nulls(dataset, idx, &fill);
                StrategyOutcome::Applied(format!("{}: filled {} values with '{}'", column, nulls, fill))
            }
            _ => StrategyOutcome::Unsupported(
                ValidationError::warning(
                    Stage::Normalize.as_str(),
                    codes::UNSUPPORTED_STRATEGY,
                    format!("fill value '{}' is not a valid {} value", raw, column_type),
                )
                .in_column(column)
                .with_value(raw.clone()),
            ),
        },
        MissingStrategy::Flag => {
            let names: Vec<String> = dataset.column_names().iter().map(|s| s.to_string()).collect();
            let flag_name = crate::domain::dedupe_names(
                names.into_iter().chain(std::iter::once(format!("{}_missing", column))),
            )
            .pop()
            .unwrap_or_else(|| format!("{}_missing", column));
            for row in dataset.rows.iter_mut() {
                let missing = row[idx].is_null();
                row.push(Value::Bool(missing));
            }
            dataset
                .columns
                .push(ColumnMeta::typed(flag_name.clone(), ColumnType::Boolean));
            StrategyOutcome::Applied(format!("{}: flagged {} missing values in {}", column, nulls, flag_name))
        }
    }
}

fn unsupported(column: &str, strategy: &MissingStrategy, column_type: ColumnType) -> StrategyOutcome {
    StrategyOutcome::Unsupported(
        ValidationError::warning(
            Stage::Normalize.as_str(),
            codes::UNSUPPORTED_STRATEGY,
            format!(
                "strategy '{}' is not supported for {} column '{}'",
                strategy.name(),
                column_type,
                column
            ),
        )
        .in_column(column),
    )
}

fn fill_nulls(dataset: &mut Dataset, idx: usize, fill: &Value) {
    for row in dataset.rows.iter_mut() {
        if row[idx].is_null() {
            row[idx] = fill.clone();
        }
    }
}

fn forward_fill(dataset: &mut Dataset, idx: usize) {
    let mut last: Option<Value> = None;
    for row in dataset.rows.iter_mut() {
        if row[idx].is_null() {
            if let Some(v) = &last {
                row[idx] = v.clone();
            }
        } else {
            last = Some(row[idx].clone());
        }
    }
}

fn back_fill(dataset: &mut Dataset, idx: usize) {
    let mut next: Option<Value> = None;
    for row in dataset.rows.iter_mut().rev() {
        if row[idx].is_null() {
            if let Some(v) = &next {
                row[idx] = v.clone();
            }
        } else {
            next = Some(row[idx].clone());
        }
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn mode<'a, I>(values: I) -> Option<Value>
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut counts: HashMap<String, (usize, usize, &'a Value)> = HashMap::new();
    for (order, value) in values.into_iter().filter(|v| !v.is_null()).enumerate() {
        counts
            .entry(value.to_string())
            .and_modify(|entry| entry.0 += 1)
            .or_insert((1, order, value));
    }
    counts
        .into_values()
        .max_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
        .map(|(_, _, value)| value.clone())
}

/// Per-column null statistics for one column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnMissing {
    pub column: String,
    pub missing_count: usize,
    pub missing_percentage: f64,
    pub column_type: ColumnType,
    pub recommended: MissingStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MissingReport {
    pub total_rows: usize,
    pub total_missing: usize,
    pub missing_percentage: f64,
    /// Only columns with at least one null.
    pub columns: Vec<ColumnMissing>,
}

/// Summarize nulls per column and recommend a strategy for each affected column.
pub fn analyze_missing(dataset: &Dataset) -> MissingReport {
    let total_rows = dataset.row_count();
    let total_cells = total_rows * dataset.column_count();
    let mut report = MissingReport {
        total_rows,
        ..MissingReport::default()
    };
    if total_rows == 0 {
        return report;
    }

    for (idx, meta) in dataset.columns.iter().enumerate() {
        let missing_count = dataset.null_count(idx);
        if missing_count == 0 {
            continue;
        }
        let missing_percentage = round2(missing_count as f64 * 100.0 / total_rows as f64);
        let column_type = dataset.effective_type(idx);
        let recommended = if missing_percentage > 50.0 {
            MissingStrategy::DropColumn
        } else {
            match column_type {
                ColumnType::Numeric => MissingStrategy::Median,
                ColumnType::DateTime => MissingStrategy::ForwardFill,
                _ => MissingStrategy::Mode,
            }
        };
        report.total_missing += missing_count;
        report.columns.push(ColumnMissing {
            column: meta.name.clone(),
            missing_count,
            missing_percentage,
            column_type,
            recommended,
        });
    }
    report.missing_percentage = round2(report.total_missing as f64 * 100.0 / total_cells as f64);
    report
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores() -> Dataset {
        let mut ds = Dataset::with_columns(vec![
            ColumnMeta::typed("score", ColumnType::Numeric),
            ColumnMeta::typed("city", ColumnType::Text),
        ]);
        for (score, city) in [
            (Value::Null, Value::from("Oslo")),
            (Value::Number(10.0), Value::Null),
            (Value::Null, Value::from("Rome")),
            (Value::Number(30.0), Value::from("Oslo")),
            (Value::Null, Value::Null),
        ] {
            ds.push_row(vec![score, city]).unwrap();
        }
        ds
    }

    fn column(ds: &Dataset, idx: usize) -> Vec<Value> {
        ds.column_values(idx).cloned().collect()
    }

    #[test]
    fn test_forward_fill_falls_back_to_back_fill() {
        let mut ds = scores();
        let outcome = apply_strategy(&mut ds, 0, &MissingStrategy::ForwardFill);
        assert!(matches!(outcome, StrategyOutcome::Applied(_)));
        assert_eq!(
            column(&ds, 0),
            vec![10.0, 10.0, 10.0, 30.0, 30.0].into_iter().map(Value::Number).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_back_fill_falls_back_to_forward_fill() {
        let mut ds = scores();
        apply_strategy(&mut ds, 0, &MissingStrategy::BackFill);
        assert_eq!(
            column(&ds, 0),
            vec![10.0, 10.0, 30.0, 30.0, 30.0].into_iter().map(Value::Number).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_mean_median_numeric_only() {
        let mut ds = scores();
        apply_strategy(&mut ds, 0, &MissingStrategy::Median);
        assert_eq!(ds.rows[0][0], Value::Number(20.0));

        let outcome = apply_strategy(&mut ds, 1, &MissingStrategy::Mean);
        match outcome {
            StrategyOutcome::Unsupported(issue) => {
                assert_eq!(issue.code, codes::UNSUPPORTED_STRATEGY);
                assert_eq!(issue.column.as_deref(), Some("city"));
            }
            other => panic!("expected unsupported, got {:?}", other),
        }
        assert_eq!(ds.null_count(1), 2);
    }

    #[test]
    fn test_mode_and_drop_rows() {
        let mut ds = scores();
        apply_strategy(&mut ds, 1, &MissingStrategy::Mode);
        assert_eq!(ds.rows[1][1], Value::from("Oslo"));

        let mut ds = scores();
        apply_strategy(&mut ds, 0, &MissingStrategy::DropRows);
        assert_eq!(ds.row_count(), 2);
    }

    #[test]
    fn test_fill_value_is_coerced() {
        let mut ds = scores();
        apply_strategy(&mut ds, 0, &MissingStrategy::FillValue(Value::from("0")));
        assert_eq!(ds.rows[0][0], Value::Number(0.0));

        let outcome = apply_strategy(&mut ds, 0, &MissingStrategy::Keep);
        assert_eq!(outcome, StrategyOutcome::Unchanged);
    }

    #[test]
    fn test_flag_adds_boolean_column() {
        let mut ds = scores();
        apply_strategy(&mut ds, 1, &MissingStrategy::Flag);
        assert_eq!(ds.column_names(), vec!["score", "city", "city_missing"]);
        assert_eq!(ds.rows[1][2], Value::Bool(true));
        assert_eq!(ds.rows[0][2], Value::Bool(false));
    }

    #[test]
    fn test_analyze_missing_recommendations() {
        let report = analyze_missing(&scores());
        assert_eq!(report.total_missing, 5);
        assert_eq!(report.columns[0].missing_percentage, 60.0);
        assert_eq!(report.columns[0].recommended, MissingStrategy::DropColumn);
        assert_eq!(report.columns[1].recommended, MissingStrategy::Mode);
        assert_eq!(report.missing_percentage, 50.0);
    }

    #[test]
    fn test_strategy_serde() {
        let s: MissingStrategy = serde_json::from_str(r#""forward_fill""#).unwrap();
        assert_eq!(s, MissingStrategy::ForwardFill);
        let s: MissingStrategy = serde_json::from_str(r#"{"fill_value": 0}"#).unwrap();
        assert_eq!(s, MissingStrategy::FillValue(Value::Number(0.0)));
    }
}
