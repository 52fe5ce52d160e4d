//! Core data shapes shared by every layer: the tabular dataset flowing through the
//! pipeline, the job record the store owns, and the findings attached to it.

pub mod dataset;
pub mod issue;
pub mod job;
pub mod report;
pub mod value;

pub use dataset::{dedupe_names, ColumnMeta, Dataset, DatasetSummary, Record};
pub use issue::{codes, Severity, ValidationError};
pub use job::{Job, JobFailure, JobResult, JobStatus, Stage};
pub use report::{OutlierFlag, OutlierMethod, QualityFactor, QualityReport};
pub use value::{parse_datetime, ColumnType, Value};
