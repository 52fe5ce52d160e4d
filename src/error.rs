use thiserror::Error;

use crate::domain::JobStatus;

#[derive(Error, Debug)]
pub enum FormataError {
    #[error("Failed to parse {format} input at line {line}: {message}")]
    Parse {
        format: String,
        line: usize,
        message: String,
    },

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid filter rule for '{column}': {message}")]
    Filter { column: String, message: String },

    #[error("Job {0} not found")]
    JobNotFound(String),

    #[error("{0} not found")]
    ArtifactNotFound(String),

    #[error("Job {job_id} is {status}; no result is available")]
    NotReady { job_id: String, status: JobStatus },

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {job_id} progress {requested:.2} is invalid (current {current:.2})")]
    InvalidProgress {
        job_id: String,
        current: f64,
        requested: f64,
    },

    #[error("Job {0} was cancelled")]
    Cancelled(String),

    #[error("Pipeline exceeded timeout of {0}s")]
    Timeout(u64),

    #[error("Pipeline stage '{stage}' failed: {message}")]
    Pipeline { stage: String, message: String },

    #[error("Payload too large: {size} > {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl FormataError {
    /// Stable machine-readable code surfaced on failed jobs and HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            FormataError::Parse { .. } => "parse_error",
            FormataError::UnsupportedFormat(_) => "unsupported_format",
            FormataError::Filter { .. } => "filter_error",
            FormataError::JobNotFound(_) | FormataError::ArtifactNotFound(_) => "not_found",
            FormataError::NotReady { .. } => "not_ready",
            FormataError::InvalidTransition { .. } => "invalid_transition",
            FormataError::InvalidProgress { .. } => "invalid_progress",
            FormataError::Cancelled(_) => "cancelled",
            FormataError::Timeout(_) => "timeout",
            FormataError::Pipeline { .. } => "pipeline_error",
            FormataError::PayloadTooLarge { .. } => "payload_too_large",
            FormataError::Storage(_) | FormataError::Sqlite(_) => "storage_error",
            FormataError::Config(_) => "config_error",
            FormataError::Io(_) => "io_error",
            FormataError::Json(_) => "json_error",
            FormataError::Csv(_) => "csv_error",
            FormataError::Toml(_) => "toml_error",
        }
    }

    /// HTTP status for the collaborator surface.
    pub fn status_code(&self) -> u16 {
        match self {
            FormataError::Parse { .. }
            | FormataError::UnsupportedFormat(_)
            | FormataError::Filter { .. }
            | FormataError::Json(_)
            | FormataError::Csv(_) => 400,
            FormataError::JobNotFound(_) | FormataError::ArtifactNotFound(_) => 404,
            FormataError::NotReady { .. }
            | FormataError::InvalidTransition { .. }
            | FormataError::InvalidProgress { .. }
            | FormataError::Cancelled(_) => 409,
            FormataError::PayloadTooLarge { .. } => 413,
            FormataError::Timeout(_) => 504,
            _ => 500,
        }
    }

    pub fn parse(format: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        FormataError::Parse {
            format: format.into(),
            line,
            message: message.into(),
        }
    }

    pub fn pipeline(stage: impl Into<String>, message: impl Into<String>) -> Self {
        FormataError::Pipeline {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FormataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_statuses() {
        let err = FormataError::parse("csv", 3, "unterminated quote");
        assert_eq!(err.code(), "parse_error");
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("line 3"));

        assert_eq!(FormataError::JobNotFound("x".into()).status_code(), 404);
        assert_eq!(FormataError::Timeout(30).code(), "timeout");
        assert_eq!(FormataError::Storage("disk".into()).status_code(), 500);
    }
}
