use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::dataset::{Dataset, DatasetSummary};
use super::issue::ValidationError;
use super::report::{OutlierFlag, QualityReport};
use crate::constants::{
    PROGRESS_DENOISED, PROGRESS_FILTERED, PROGRESS_FINALIZED, PROGRESS_NORMALIZED,
    PROGRESS_PARSED, PROGRESS_VALIDATED,
};
use crate::error::{FormataError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn all() -> [JobStatus; 5] {
        [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ]
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = FormataError;

    fn from_str(s: &str) -> Result<Self> {
        JobStatus::all()
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| FormataError::Storage(format!("unknown job status '{}'", s)))
    }
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Parse,
    Normalize,
    Filter,
    Denoise,
    Validate,
    Finalize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Parse => "parse",
            Stage::Normalize => "normalize",
            Stage::Filter => "filter",
            Stage::Denoise => "denoise",
            Stage::Validate => "validate",
            Stage::Finalize => "finalize",
        }
    }

    /// Progress reported once this stage has committed its output.
    pub fn progress_mark(&self) -> f64 {
        match self {
            Stage::Parse => PROGRESS_PARSED,
            Stage::Normalize => PROGRESS_NORMALIZED,
            Stage::Filter => PROGRESS_FILTERED,
            Stage::Denoise => PROGRESS_DENOISED,
            Stage::Validate => PROGRESS_VALIDATED,
            Stage::Finalize => PROGRESS_FINALIZED,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The most specific known error of a failed or cancelled job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobFailure {
    pub code: String,
    pub message: String,
}

impl From<&FormataError> for JobFailure {
    fn from(err: &FormataError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobResult {
    pub before: DatasetSummary,
    pub after: Dataset,
    pub rows_before: usize,
    pub rows_after: usize,
    /// Human-readable names of the transformations applied, in order.
    pub transformations: Vec<String>,
    pub outliers: Vec<OutlierFlag>,
    pub quality: Option<QualityReport>,
    pub output_path: Option<String>,
    pub error_report_path: Option<String>,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub progress: f64,
    pub filename: String,
    pub format: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result: Option<JobResult>,
    pub errors: Vec<ValidationError>,
    pub failure: Option<JobFailure>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Job {
    pub fn new(filename: impl Into<String>, format: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            progress: 0.0,
            filename: filename.into(),
            format: format.into(),
            created_at: now,
            updated_at: now,
            result: None,
            errors: Vec::new(),
            failure: None,
            metadata: BTreeMap::new(),
        }
    }

    fn transition(&mut self, allowed_from: &[JobStatus], to: JobStatus) -> Result<()> {
        if !allowed_from.contains(&self.status) {
            return Err(FormataError::InvalidTransition {
                job_id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// pending → processing
    pub fn start(&mut self) -> Result<()> {
        self.transition(&[JobStatus::Pending], JobStatus::Processing)
    }

    /// Raise progress while processing. Never decreases and never reaches 1.0 here.
    pub fn advance(&mut self, progress: f64) -> Result<()> {
        if self.status != JobStatus::Processing {
            return Err(FormataError::InvalidTransition {
                job_id: self.id.clone(),
                from: self.status,
                to: JobStatus::Processing,
            });
        }
        if !(progress >= self.progress && progress < 1.0) {
            return Err(FormataError::InvalidProgress {
                job_id: self.id.clone(),
                current: self.progress,
                requested: progress,
            });
        }
        self.progress = progress;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn complete(&mut self, result: JobResult) -> Result<()> {
        self.transition(&[JobStatus::Processing], JobStatus::Completed)?;
        self.progress = 1.0;
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, failure: JobFailure) -> Result<()> {
        self.transition(&[JobStatus::Pending, JobStatus::Processing], JobStatus::Failed)?;
        self.failure = Some(failure);
        self.result = None;
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.transition(
            &[JobStatus::Pending, JobStatus::Processing],
            JobStatus::Cancelled,
        )?;
        self.failure = Some(JobFailure {
            code: "cancelled".to_string(),
            message: "Job was cancelled".to_string(),
        });
        self.result = None;
        Ok(())
    }

    pub fn append_errors(&mut self, errors: Vec<ValidationError>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(FormataError::InvalidTransition {
                job_id: self.id.clone(),
                from: self.status,
                to: self.status,
            });
        }
        if !errors.is_empty() {
            self.errors.extend(errors);
            self.updated_at = Utc::now();
        }
        Ok(())
    }
}
