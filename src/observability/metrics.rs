//! Metrics for the Formata job pipeline.
//!
//! Helpers are grouped by phase and record through the `metrics` facade. When no recorder is
//! installed they are no-ops, so library users and tests pay nothing.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::fmt;
use tracing::info;

use crate::error::{FormataError, Result};

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Job lifecycle
    JobsCreated,
    JobsStarted,
    JobsCompleted,
    JobsFailed,
    JobsCancelled,

    // Stages
    StageDuration,
    StageRows,

    // Parser
    ParserParseError,
    ParserBytes,

    // Validation
    ValidationIssues,
    QualityScore,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::JobsCreated => "formata_jobs_created_total",
            MetricName::JobsStarted => "formata_jobs_started_total",
            MetricName::JobsCompleted => "formata_jobs_completed_total",
            MetricName::JobsFailed => "formata_jobs_failed_total",
            MetricName::JobsCancelled => "formata_jobs_cancelled_total",
            MetricName::StageDuration => "formata_stage_duration_seconds",
            MetricName::StageRows => "formata_stage_rows",
            MetricName::ParserParseError => "formata_parser_parse_error_total",
            MetricName::ParserBytes => "formata_parser_bytes",
            MetricName::ValidationIssues => "formata_validation_issues_total",
            MetricName::QualityScore => "formata_quality_score",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            JobsCreated,
            JobsStarted,
            JobsCompleted,
            JobsFailed,
            JobsCancelled,
            StageDuration,
            StageRows,
            ParserParseError,
            ParserBytes,
            ValidationIssues,
            QualityScore,
        ]
        .into_iter()
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Safe to call more than once.
pub fn init_metrics() -> Result<()> {
    HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            FormataError::Config(format!("Failed to install Prometheus recorder: {}", e))
        })?;
        info!("Metrics recorder installed");
        Ok::<_, FormataError>(handle)
    })?;
    Ok(())
}

/// Prometheus text exposition, if the recorder is installed.
pub fn render() -> Option<String> {
    HANDLE.get().map(|handle| handle.render())
}

pub mod jobs {
    use super::MetricName;

    pub fn created(format: &'static str) {
        ::metrics::counter!(MetricName::JobsCreated.as_str(), "format" => format).increment(1);
    }

    pub fn started() {
        ::metrics::counter!(MetricName::JobsStarted.as_str()).increment(1);
    }

    pub fn completed() {
        ::metrics::counter!(MetricName::JobsCompleted.as_str()).increment(1);
    }

    pub fn failed(code: &'static str) {
        ::metrics::counter!(MetricName::JobsFailed.as_str(), "code" => code).increment(1);
    }

    pub fn cancelled() {
        ::metrics::counter!(MetricName::JobsCancelled.as_str()).increment(1);
    }
}

pub mod stage {
    use super::MetricName;

    /// Record how long a stage took
    pub fn duration(stage: &'static str, secs: f64) {
        ::metrics::histogram!(MetricName::StageDuration.as_str(), "stage" => stage).record(secs);
    }

    /// Record the row count a stage produced
    pub fn rows(stage: &'static str, rows: usize) {
        ::metrics::histogram!(MetricName::StageRows.as_str(), "stage" => stage).record(rows as f64);
    }
}

pub mod parser {
    use super::MetricName;

    pub fn parse_error(format: &'static str) {
        ::metrics::counter!(MetricName::ParserParseError.as_str(), "format" => format).increment(1);
    }

    pub fn bytes(n: usize) {
        ::metrics::histogram!(MetricName::ParserBytes.as_str()).record(n as f64);
    }
}

pub mod validate {
    use super::MetricName;

    pub fn issues(n: usize) {
        ::metrics::counter!(MetricName::ValidationIssues.as_str()).increment(n as u64);
    }

    pub fn quality_score(score: f64) {
        ::metrics::histogram!(MetricName::QualityScore.as_str()).record(score);
    }
}
