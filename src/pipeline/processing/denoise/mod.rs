//! Duplicate removal and statistical outlier detection.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

use super::filter::resolve_column;
use crate::domain::{
    codes, ColumnType, Dataset, OutlierFlag, OutlierMethod, Stage, ValidationError, Value,
};

/// Configuration for the denoise stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoiseOptions {
    /// Drop rows that repeat an earlier row
    pub remove_duplicates: bool,
    /// Compare only these columns when deduplicating; all columns when unset
    pub duplicate_columns: Option<Vec<String>>,
    /// Flag numeric outliers
    pub detect_outliers: bool,
    /// Also drop rows holding a flagged outlier
    pub remove_outliers: bool,
    pub outlier_method: OutlierMethod,
    /// Numeric columns to scan; every numeric column when unset
    pub outlier_columns: Option<Vec<String>>,
    /// Columns with fewer non-null values are not scanned
    pub min_samples: usize,
}

impl Default for DenoiseOptions {
    fn default() -> Self {
        Self {
            remove_duplicates: false,
            duplicate_columns: None,
            detect_outliers: false,
            remove_outliers: false,
            outlier_method: OutlierMethod::Iqr,
            outlier_columns: None,
            min_samples: 10,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DenoiseOutcome {
    pub dataset: Dataset,
    /// Row indices refer to the dataset after duplicate removal.
    pub outliers: Vec<OutlierFlag>,
    pub issues: Vec<ValidationError>,
    pub duplicates_removed: usize,
    pub outliers_removed: usize,
    pub transformations: Vec<String>,
}

fn fingerprint(row: &[Value], columns: &[usize]) -> String {
    let mut parts = Vec::with_capacity(columns.len());
    for &idx in columns {
        match &row[idx] {
            Value::Null => parts.push("\u{0}".to_string()),
            cell => parts.push(cell.to_string().trim().to_lowercase()),
        }
    }
    parts.join("\u{1f}")
}

fn resolve_columns(
    dataset: &Dataset,
    names: Option<&[String]>,
    issues: &mut Vec<ValidationError>,
) -> Vec<usize> {
    match names {
        None => (0..dataset.column_count()).collect(),
        Some(names) => names
            .iter()
            .filter_map(|name| {
                let idx = resolve_column(dataset, name);
                if idx.is_none() {
                    issues.push(
                        ValidationError::warning(
                            Stage::Denoise.as_str(),
                            codes::MISSING_COLUMN,
                            format!("column '{}' does not exist and was ignored", name),
                        )
                        .in_column(name.clone()),
                    );
                }
                idx
            })
            .collect(),
    }
}

/// Remove rows whose fingerprint (trimmed, lowercased cells) repeats an earlier row.
/// The first occurrence wins and survivors keep their order. An empty `subset` compares
/// nothing, so no row is removed.
pub fn remove_duplicates(dataset: &mut Dataset, subset: &[usize]) -> usize {
    if subset.is_empty() {
        return 0;
    }
    let mut seen = HashSet::new();
    let keep: Vec<bool> = dataset
        .rows
        .iter()
        .map(|row| seen.insert(fingerprint(row, subset)))
        .collect();
    let before = dataset.row_count();
    dataset.retain_rows(&keep);
    before - dataset.row_count()
}

/// Number of rows that repeat an earlier row's fingerprint.
pub fn count_duplicates(dataset: &Dataset, subset: &[usize]) -> usize {
    if subset.is_empty() {
        return 0;
    }
    let mut seen = HashSet::new();
    dataset
        .rows
        .iter()
        .filter(|row| !seen.insert(fingerprint(row, subset)))
        .count()
}

/// Quantile with linear interpolation between closest ranks. `sorted` must be ascending.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = (sorted.len() - 1) as f64 * q;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (pos - lower as f64)
}

/// Outlier bounds for one column, or `None` when the column is too sparse or constant.
fn bounds(values: &[f64], method: OutlierMethod, min_samples: usize) -> Option<(f64, f64)> {
    if values.len() < min_samples {
        return None;
    }
    let unique: HashSet<u64> = values.iter().map(|v| v.to_bits()).collect();
    if unique.len() <= 2 {
        return None;
    }

    match method {
        OutlierMethod::Iqr => {
            let mut sorted = values.to_vec();
            sorted.sort_by(|a, b| a.total_cmp(b));
            let q1 = quantile(&sorted, 0.25);
            let q3 = quantile(&sorted, 0.75);
            let iqr = q3 - q1;
            if iqr == 0.0 || !iqr.is_finite() {
                return None;
            }
            Some((q1 - 1.5 * iqr, q3 + 1.5 * iqr))
        }
        OutlierMethod::ZScore { threshold } => {
            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            let std = variance.sqrt();
            if std == 0.0 || !std.is_finite() {
                return None;
            }
            Some((mean - threshold * std, mean + threshold * std))
        }
    }
}

pub fn detect_outliers(
    dataset: &Dataset,
    columns: &[usize],
    method: OutlierMethod,
    min_samples: usize,
) -> Vec<OutlierFlag> {
    let mut flags = Vec::new();
    for &idx in columns {
        if dataset.effective_type(idx) != ColumnType::Numeric {
            continue;
        }
        let values: Vec<f64> = dataset.column_values(idx).filter_map(Value::as_f64).collect();
        let Some((lower, upper)) = bounds(&values, method, min_samples) else {
            debug!("Skipping outlier scan for '{}'", dataset.columns[idx].name);
            continue;
        };
        for (row_idx, row) in dataset.rows.iter().enumerate() {
            if let Some(x) = row[idx].as_f64() {
                if x < lower || x > upper {
                    flags.push(OutlierFlag {
                        row: row_idx,
                        column: dataset.columns[idx].name.clone(),
                        value: row[idx].clone(),
                        lower_bound: lower,
                        upper_bound: upper,
                    });
                }
            }
        }
    }
    flags
}

pub struct Denoiser {
    pub options: DenoiseOptions,
}

impl Denoiser {
    pub fn new(options: DenoiseOptions) -> Self {
        Self { options }
    }

    pub fn denoise(&self, mut dataset: Dataset) -> DenoiseOutcome {
        let mut outcome = DenoiseOutcome::default();

        if self.options.remove_duplicates {
            let subset = resolve_columns(
                &dataset,
                self.options.duplicate_columns.as_deref(),
                &mut outcome.issues,
            );
            outcome.duplicates_removed = remove_duplicates(&mut dataset, &subset);
            if outcome.duplicates_removed > 0 {
                outcome
                    .transformations
                    .push(format!("removed {} duplicate rows", outcome.duplicates_removed));
            }
        }

        if self.options.detect_outliers || self.options.remove_outliers {
            let columns = resolve_columns(
                &dataset,
                self.options.outlier_columns.as_deref(),
                &mut outcome.issues,
            );
            let flags = detect_outliers(
                &dataset,
                &columns,
                self.options.outlier_method,
                self.options.min_samples,
            );
            for flag in &flags {
                outcome.issues.push(
                    ValidationError::info(
                        Stage::Denoise.as_str(),
                        codes::OUTLIER,
                        format!(
                            "value outside [{:.2}, {:.2}]",
                            flag.lower_bound, flag.upper_bound
                        ),
                    )
                    .at_row(flag.row)
                    .in_column(flag.column.clone())
                    .with_value(flag.value.clone()),
                );
            }

            if self.options.remove_outliers && !flags.is_empty() {
                let flagged: HashSet<usize> = flags.iter().map(|f| f.row).collect();
                let keep: Vec<bool> = (0..dataset.row_count()).map(|i| !flagged.contains(&i)).collect();
                let before = dataset.row_count();
                dataset.retain_rows(&keep);
                outcome.outliers_removed = before - dataset.row_count();
                outcome
                    .transformations
                    .push(format!("removed {} outlier rows", outcome.outliers_removed));
            } else if !flags.is_empty() {
                outcome
                    .transformations
                    .push(format!("flagged {} outlier values", flags.len()));
            }
            outcome.outliers = flags;
        }

        info!(
            "Denoised dataset: rows={} duplicates_removed={} outliers={}",
            dataset.row_count(),
            outcome.duplicates_removed,
            outcome.outliers.len()
        );
        outcome.dataset = dataset;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ColumnMeta;

    fn numbers(values: &[f64]) -> Dataset {
        let mut ds = Dataset::with_columns(vec![ColumnMeta::typed("x", ColumnType::Numeric)]);
        for v in values {
            ds.push_row(vec![Value::Number(*v)]).unwrap();
        }
        ds
    }

    #[test]
    fn test_duplicates_keep_first_and_order() {
        let mut ds = Dataset::new(["name", "city"]);
        for (n, c) in [("Ann", "Oslo"), ("Bob", "Rome"), (" ann ", "OSLO"), ("Cy", "Oslo"), ("Bob", "Rome")] {
            ds.push_row(vec![Value::from(n), Value::from(c)]).unwrap();
        }
        let out = Denoiser::new(DenoiseOptions {
            remove_duplicates: true,
            ..DenoiseOptions::default()
        })
        .denoise(ds);
        assert_eq!(out.duplicates_removed, 2);
        let names: Vec<String> = out.dataset.column_values(0).map(|v| v.to_string()).collect();
        assert_eq!(names, vec!["Ann", "Bob", "Cy"]);
    }

    #[test]
    fn test_duplicates_on_subset() {
        let mut ds = Dataset::new(["name", "city"]);
        for (n, c) in [("Ann", "Oslo"), ("Bob", "Oslo"), ("Cy", "Rome")] {
            ds.push_row(vec![Value::from(n), Value::from(c)]).unwrap();
        }
        let out = Denoiser::new(DenoiseOptions {
            remove_duplicates: true,
            duplicate_columns: Some(vec!["City".to_string(), "nope".to_string()]),
            ..DenoiseOptions::default()
        })
        .denoise(ds);
        assert_eq!(out.dataset.row_count(), 2);
        assert_eq!(out.issues.len(), 1);
        assert_eq!(out.issues[0].code, codes::MISSING_COLUMN);
    }

    #[test]
    fn test_unknown_subset_keeps_every_row() {
        let mut ds = Dataset::new(["name", "city"]);
        for (n, c) in [("Ann", "Oslo"), ("Bob", "Rome"), ("Cy", "Lima")] {
            ds.push_row(vec![Value::from(n), Value::from(c)]).unwrap();
        }
        let out = Denoiser::new(DenoiseOptions {
            remove_duplicates: true,
            duplicate_columns: Some(vec!["nope".to_string()]),
            ..DenoiseOptions::default()
        })
        .denoise(ds);
        assert_eq!(out.dataset.row_count(), 3);
        assert_eq!(out.duplicates_removed, 0);
        assert!(out.transformations.is_empty());
        assert_eq!(out.issues.len(), 1);
        assert_eq!(out.issues[0].code, codes::MISSING_COLUMN);
        assert_eq!(count_duplicates(&out.dataset, &[]), 0);
    }

    #[test]
    fn test_null_and_empty_text_differ() {
        let mut ds = Dataset::new(["a"]);
        ds.push_row(vec![Value::Null]).unwrap();
        ds.push_row(vec![Value::from("")]).unwrap();
        assert_eq!(remove_duplicates(&mut ds, &[0]), 0);
    }

    #[test]
    fn test_quantile_interpolates() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&sorted, 0.25), 1.75);
        assert_eq!(quantile(&sorted, 0.5), 2.5);
        assert_eq!(quantile(&sorted, 1.0), 4.0);
    }

    #[test]
    fn test_iqr_flags_without_removing() {
        let ds = numbers(&[10.0, 11.0, 12.0, 13.0, 12.0, 11.0, 10.0, 13.0, 12.0, 11.0, 500.0]);
        let out = Denoiser::new(DenoiseOptions {
            detect_outliers: true,
            ..DenoiseOptions::default()
        })
        .denoise(ds);
        assert_eq!(out.dataset.row_count(), 11);
        assert_eq!(out.outliers.len(), 1);
        assert_eq!(out.outliers[0].row, 10);
        assert_eq!(out.issues[0].code, codes::OUTLIER);
    }

    #[test]
    fn test_remove_outliers_opt_in() {
        let ds = numbers(&[10.0, 11.0, 12.0, 13.0, 12.0, 11.0, 10.0, 13.0, 12.0, 11.0, 500.0]);
        let out = Denoiser::new(DenoiseOptions {
            remove_outliers: true,
            ..DenoiseOptions::default()
        })
        .denoise(ds);
        assert_eq!(out.dataset.row_count(), 10);
        assert_eq!(out.outliers_removed, 1);
    }

    #[test]
    fn test_zscore_and_sparse_columns() {
        let mut values = vec![50.0; 20];
        values[3] = 49.0;
        values[7] = 51.0;
        values[12] = 48.0;
        values.push(120.0);
        let flags = detect_outliers(&numbers(&values), &[0], OutlierMethod::ZScore { threshold: 3.0 }, 10);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].value, Value::Number(120.0));

        let sparse = numbers(&[1.0, 2.0, 300.0]);
        assert!(detect_outliers(&sparse, &[0], OutlierMethod::Iqr, 10).is_empty());
    }
}
