use std::collections::HashSet;

use crate::domain::{
    Dataset, OutlierMethod, QualityFactor, QualityReport, Severity, ValidationError,
};
use crate::pipeline::processing::denoise::{count_duplicates, detect_outliers};

const COMPLETENESS_WEIGHT: f64 = 30.0;
const VALIDITY_WEIGHT: f64 = 30.0;
const CONSISTENCY_WEIGHT: f64 = 20.0;
const ACCURACY_WEIGHT: f64 = 20.0;

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn factor(name: &str, score: f64, weight: f64, description: String) -> QualityFactor {
    QualityFactor {
        name: name.to_string(),
        score: round2(score.clamp(0.0, 100.0)),
        weight,
        description,
    }
}

/// Score a dataset on completeness, validity, consistency and accuracy.
///
/// `issues` are the findings recorded against the dataset so far; cell-level warnings and
/// errors count against validity.
pub fn quality_score(dataset: &Dataset, issues: &[ValidationError]) -> QualityReport {
    let rows = dataset.row_count();
    let total_cells = rows * dataset.column_count();

    let null_cells: usize = (0..dataset.column_count()).map(|idx| dataset.null_count(idx)).sum();
    let completeness = if total_cells == 0 {
        100.0
    } else {
        100.0 * (total_cells - null_cells) as f64 / total_cells as f64
    };

    let invalid_cells: HashSet<(usize, &str)> = issues
        .iter()
        .filter(|issue| issue.severity >= Severity::Warning)
        .filter_map(|issue| Some((issue.row?, issue.column.as_deref()?)))
        .collect();
    let validity = if total_cells == 0 {
        100.0
    } else {
        100.0 * (1.0 - invalid_cells.len().min(total_cells) as f64 / total_cells as f64)
    };

    // Share of non-null cells that already hold their column's type
    let mut conforming = 0usize;
    let mut non_null = 0usize;
    for idx in 0..dataset.column_count() {
        let column_type = dataset.effective_type(idx);
        for cell in dataset.column_values(idx).filter(|v| !v.is_null()) {
            non_null += 1;
            if cell.conforms_to(column_type) || cell.coerce(column_type).is_some() {
                conforming += 1;
            }
        }
    }
    let consistency = if non_null == 0 {
        100.0
    } else {
        100.0 * conforming as f64 / non_null as f64
    };

    let all_columns: Vec<usize> = (0..dataset.column_count()).collect();
    let duplicates = count_duplicates(dataset, &all_columns);
    let outlier_rows: HashSet<usize> = detect_outliers(dataset, &all_columns, OutlierMethod::Iqr, 10)
        .into_iter()
        .map(|flag| flag.row)
        .collect();
    let accuracy = if rows == 0 {
        100.0
    } else {
        100.0 * (1.0 - ((duplicates + outlier_rows.len()).min(rows)) as f64 / rows as f64)
    };

    let factors = vec![
        factor(
            "completeness",
            completeness,
            COMPLETENESS_WEIGHT,
            format!("{} of {} cells are populated", total_cells - null_cells, total_cells),
        ),
        factor(
            "validity",
            validity,
            VALIDITY_WEIGHT,
            format!("{} cells have recorded problems", invalid_cells.len()),
        ),
        factor(
            "consistency",
            consistency,
            CONSISTENCY_WEIGHT,
            format!("{} of {} values match their column type", conforming, non_null),
        ),
        factor(
            "accuracy",
            accuracy,
            ACCURACY_WEIGHT,
            format!(
                "{} duplicate rows and {} rows with outliers",
                duplicates,
                outlier_rows.len()
            ),
        ),
    ];

    let total_weight: f64 = factors.iter().map(|f| f.weight).sum();
    let overall = round2(factors.iter().map(|f| f.score * f.weight).sum::<f64>() / total_weight);

    QualityReport {
        overall_score: overall,
        grade: QualityReport::grade_for(overall),
        factors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{codes, Value};

    fn table(rows: Vec<Vec<Value>>) -> Dataset {
        let mut ds = Dataset::new(["id", "name"]);
        for row in rows {
            ds.push_row(row).unwrap();
        }
        ds
    }

    #[test]
    fn test_perfect_data_scores_a() {
        let ds = table(vec![
            vec![Value::Number(1.0), Value::from("Alice")],
            vec![Value::Number(2.0), Value::from("Bob")],
            vec![Value::Number(3.0), Value::from("Cy")],
        ]);
        let report = quality_score(&ds, &[]);
        assert_eq!(report.overall_score, 100.0);
        assert_eq!(report.grade, 'A');
        assert_eq!(report.factors.len(), 4);
        assert_eq!(report.factor("completeness").unwrap().weight, 30.0);
    }

    #[test]
    fn test_missing_values_lower_completeness() {
        let ds = table(vec![
            vec![Value::Number(1.0), Value::Null],
            vec![Value::Number(2.0), Value::from("Bob")],
        ]);
        let report = quality_score(&ds, &[]);
        assert_eq!(report.factor("completeness").unwrap().score, 75.0);
        assert!(report.overall_score < 100.0);
    }

    #[test]
    fn test_duplicates_lower_accuracy() {
        let ds = table(vec![
            vec![Value::Number(1.0), Value::from("Alice")],
            vec![Value::Number(3.0), Value::from("Cy")],
            vec![Value::Number(3.0), Value::from("Cy")],
        ]);
        let report = quality_score(&ds, &[]);
        assert!(report.factor("accuracy").unwrap().score < 100.0);
    }

    #[test]
    fn test_cell_issues_lower_validity() {
        let ds = table(vec![
            vec![Value::Number(1.0), Value::from("Alice")],
            vec![Value::Number(2.0), Value::from("Bob")],
        ]);
        let issues = vec![
            ValidationError::error("validate", codes::BELOW_MINIMUM, "too small")
                .at_row(0)
                .in_column("id"),
            ValidationError::info("denoise", codes::OUTLIER, "note").at_row(1).in_column("id"),
        ];
        let report = quality_score(&ds, &issues);
        assert_eq!(report.factor("validity").unwrap().score, 75.0);
    }
}
