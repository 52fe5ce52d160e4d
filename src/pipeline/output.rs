//! Writers for cleaned datasets and error reports.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt::Write as _;

use crate::constants::{FORMAT_CSV, FORMAT_JSON};
use crate::domain::{Dataset, Severity, ValidationError};
use crate::error::{FormataError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => FORMAT_CSV,
            OutputFormat::Json => FORMAT_JSON,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "text/csv",
            OutputFormat::Json => "application/json",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = FormataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            other => Err(FormataError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Header row, then one record per row. Nulls are written as empty fields.
pub fn write_csv(dataset: &Dataset) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(dataset.column_names())?;
    for row in &dataset.rows {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| FormataError::Io(e.into_error()))
}

/// `{"records": [...], "meta": {"columns": [...], "row_count": n}}`
pub fn write_json(dataset: &Dataset) -> Result<Vec<u8>> {
    let body = json!({
        "records": dataset.to_records(),
        "meta": {
            "columns": dataset.columns,
            "row_count": dataset.row_count(),
        }
    });
    Ok(serde_json::to_vec_pretty(&body)?)
}

pub fn render(dataset: &Dataset, format: OutputFormat) -> Result<Vec<u8>> {
    match format {
        OutputFormat::Csv => write_csv(dataset),
        OutputFormat::Json => write_json(dataset),
    }
}

/// Plain-text report listing every recorded issue, grouped by severity.
pub fn error_report(job_id: &str, filename: &str, issues: &[ValidationError]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Formata error report");
    let _ = writeln!(out, "job: {}", job_id);
    let _ = writeln!(out, "file: {}", filename);
    let _ = writeln!(out, "issues: {}", issues.len());

    for severity in [Severity::Error, Severity::Warning, Severity::Info] {
        let matching: Vec<&ValidationError> =
            issues.iter().filter(|i| i.severity == severity).collect();
        if matching.is_empty() {
            continue;
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "== {} ({}) ==", severity, matching.len());
        for issue in matching {
            let _ = writeln!(out, "[{}] {}", issue.stage, issue);
        }
    }
    out
}
