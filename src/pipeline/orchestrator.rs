//! Sequencing of the processing stages for one job.
//!
//! Stages run strictly in order: parse (only when the job has no dataset yet), normalize,
//! filter, denoise, validate, finalize. After each stage commits its output the observer is
//! told, which is where progress and per-stage issues reach the job store. Cancellation is
//! checked before every stage, never inside one.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, instrument};

use crate::app::ports::PipelineObserver;
use crate::domain::{
    Dataset, DatasetSummary, JobResult, OutlierFlag, OutlierMethod, QualityReport, Stage,
    ValidationError,
};
use crate::error::Result;
use crate::infra::FileStorage;
use crate::observability::metrics;
use crate::pipeline::cancellation::CancellationToken;
use crate::pipeline::output::{self, OutputFormat};
use crate::pipeline::processing::denoise::{DenoiseOptions, Denoiser};
use crate::pipeline::processing::filter::{apply_filters, FilterSet};
use crate::pipeline::processing::normalize::{NormalizeOptions, Normalizer};
use crate::pipeline::processing::parser::{parse_file, ParseOptions};
use crate::pipeline::processing::validate::{ValidationRules, Validator};

/// Rows of the original dataset kept in the result's `before` summary.
const BEFORE_SAMPLE_ROWS: usize = 10;

/// What the caller asks the pipeline to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Run name standardization, type inference and missing-value handling.
    pub normalize: bool,
    pub remove_duplicates: bool,
    /// Flag numeric outliers as info issues.
    pub detect_outliers: bool,
    /// Drop rows holding a flagged outlier.
    pub remove_outliers: bool,
    pub filters: FilterSet,
    pub validation_rules: ValidationRules,
    pub normalization: NormalizeOptions,
    /// Columns compared for duplicates; all columns when unset.
    pub duplicate_columns: Option<Vec<String>>,
    pub outlier_method: OutlierMethod,
    pub output_format: OutputFormat,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            normalize: true,
            remove_duplicates: true,
            detect_outliers: true,
            remove_outliers: false,
            filters: FilterSet::default(),
            validation_rules: ValidationRules::new(),
            normalization: NormalizeOptions::default(),
            duplicate_columns: None,
            outlier_method: OutlierMethod::Iqr,
            output_format: OutputFormat::Csv,
        }
    }
}

impl ProcessingConfig {
    pub fn denoise_options(&self) -> DenoiseOptions {
        DenoiseOptions {
            remove_duplicates: self.remove_duplicates,
            duplicate_columns: self.duplicate_columns.clone(),
            detect_outliers: self.detect_outliers,
            remove_outliers: self.remove_outliers,
            outlier_method: self.outlier_method,
            ..DenoiseOptions::default()
        }
    }
}

/// Where the pipeline's dataset comes from.
#[derive(Debug, Clone)]
pub enum PipelineInput {
    /// Parsed at ingestion; the parse stage is skipped.
    Parsed(Arc<Dataset>),
    /// Raw upload; the parse stage runs first.
    Raw { filename: String, bytes: Vec<u8> },
}

/// Everything the stages produced, before artifacts are written.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub dataset: Dataset,
    pub before: DatasetSummary,
    pub rows_before: usize,
    pub transformations: Vec<String>,
    pub outliers: Vec<OutlierFlag>,
    pub quality: QualityReport,
    /// Issues recorded by this run, in stage order.
    pub issues: Vec<ValidationError>,
}

/// Run a synchronous stage body inside its span and record its duration.
fn timed<T>(job_id: &str, stage: Stage, body: impl FnOnce() -> T) -> T {
    let span = info_span!("stage", job_id = %job_id, stage = stage.as_str());
    let _enter = span.enter();
    let started = Instant::now();
    let out = body();
    metrics::stage::duration(stage.as_str(), started.elapsed().as_secs_f64());
    out
}

pub struct Orchestrator {
    files: Option<FileStorage>,
    parse_options: ParseOptions,
}

impl Orchestrator {
    /// `files` is where cleaned output and error reports are written; without it the
    /// result carries no artifact paths.
    pub fn new(files: Option<FileStorage>, parse_options: ParseOptions) -> Self {
        Self {
            files,
            parse_options,
        }
    }

    /// Run every stage and return the committed job result.
    ///
    /// `prior_issues` are findings recorded before this run (at ingestion); they feed the
    /// quality score and the error report.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn execute(
        &self,
        job_id: &str,
        filename: &str,
        input: PipelineInput,
        config: &ProcessingConfig,
        cancel: &CancellationToken,
        observer: &dyn PipelineObserver,
        prior_issues: &[ValidationError],
    ) -> Result<JobResult> {
        let output = self
            .run_stages(job_id, input, config, cancel, observer, prior_issues)
            .await?;
        cancel.check(job_id)?;
        self.finalize(job_id, filename, output, config, observer, prior_issues)
            .await
    }

    /// Parse (if needed), normalize, filter, denoise and validate.
    pub async fn run_stages(
        &self,
        job_id: &str,
        input: PipelineInput,
        config: &ProcessingConfig,
        cancel: &CancellationToken,
        observer: &dyn PipelineObserver,
        prior_issues: &[ValidationError],
    ) -> Result<PipelineOutput> {
        let mut issues: Vec<ValidationError> = Vec::new();
        let mut transformations = Vec::new();

        cancel.check(job_id)?;
        let dataset = match input {
            PipelineInput::Parsed(dataset) => Dataset::clone(&dataset),
            PipelineInput::Raw { filename, bytes } => {
                let parsed = parse_file(&filename, &bytes, self.parse_options)?;
                observer.stage_finished(job_id, Stage::Parse, &parsed.issues).await?;
                issues.extend(parsed.issues);
                parsed.dataset
            }
        };
        let rows_before = dataset.row_count();
        let before = dataset.summary(BEFORE_SAMPLE_ROWS);
        info!(
            "Processing job {}: rows={} columns={}",
            job_id,
            rows_before,
            dataset.column_count()
        );

        cancel.check(job_id)?;
        let dataset = if config.normalize {
            let normalizer = Normalizer::new(config.normalization.clone());
            let outcome = timed(job_id, Stage::Normalize, || normalizer.normalize(dataset));
            observer.stage_finished(job_id, Stage::Normalize, &outcome.issues).await?;
            issues.extend(outcome.issues);
            transformations.extend(outcome.transformations);
            outcome.dataset
        } else {
            observer.stage_finished(job_id, Stage::Normalize, &[]).await?;
            dataset
        };
        metrics::stage::rows(Stage::Normalize.as_str(), dataset.row_count());

        cancel.check(job_id)?;
        let outcome = timed(job_id, Stage::Filter, || apply_filters(dataset, &config.filters));
        observer.stage_finished(job_id, Stage::Filter, &outcome.issues).await?;
        if !config.filters.is_empty() {
            transformations.push(format!(
                "filtered out {} rows with {} rules",
                outcome.removed,
                config.filters.len()
            ));
        }
        issues.extend(outcome.issues);
        let dataset = outcome.dataset;
        metrics::stage::rows(Stage::Filter.as_str(), dataset.row_count());

        cancel.check(job_id)?;
        let denoiser = Denoiser::new(config.denoise_options());
        let outcome = timed(job_id, Stage::Denoise, || denoiser.denoise(dataset));
        observer.stage_finished(job_id, Stage::Denoise, &outcome.issues).await?;
        issues.extend(outcome.issues);
        transformations.extend(outcome.transformations);
        let outliers = outcome.outliers;
        let dataset = outcome.dataset;
        metrics::stage::rows(Stage::Denoise.as_str(), dataset.row_count());

        cancel.check(job_id)?;
        let mut scored: Vec<ValidationError> = prior_issues.to_vec();
        scored.extend(issues.iter().cloned());
        let validator = Validator::new(&config.validation_rules);
        let outcome = timed(job_id, Stage::Validate, || validator.validate(dataset, &scored));
        observer.stage_finished(job_id, Stage::Validate, &outcome.issues).await?;
        metrics::validate::issues(outcome.issues.len());
        metrics::validate::quality_score(outcome.quality.overall_score);
        issues.extend(outcome.issues);
        transformations.extend(outcome.transformations);
        metrics::stage::rows(Stage::Validate.as_str(), outcome.dataset.row_count());

        Ok(PipelineOutput {
            dataset: outcome.dataset,
            before,
            rows_before,
            transformations,
            outliers,
            quality: outcome.quality,
            issues,
        })
    }

    /// Write the cleaned dataset and the error report, then build the result.
    pub async fn finalize(
        &self,
        job_id: &str,
        filename: &str,
        output: PipelineOutput,
        config: &ProcessingConfig,
        observer: &dyn PipelineObserver,
        prior_issues: &[ValidationError],
    ) -> Result<JobResult> {
        let started = Instant::now();
        let mut output_path = None;
        let mut error_report_path = None;

        if let Some(files) = &self.files {
            let bytes = output::render(&output.dataset, config.output_format)?;
            let path = files.save_output(job_id, config.output_format, &bytes).await?;
            output_path = Some(path.display().to_string());

            let mut all_issues = prior_issues.to_vec();
            all_issues.extend(output.issues.iter().cloned());
            if !all_issues.is_empty() {
                let report = output::error_report(job_id, filename, &all_issues);
                let path = files.save_error_report(job_id, &report).await?;
                error_report_path = Some(path.display().to_string());
            }
        }
        metrics::stage::duration(Stage::Finalize.as_str(), started.elapsed().as_secs_f64());
        observer.stage_finished(job_id, Stage::Finalize, &[]).await?;

        debug!(
            "Finalized job {}: output={:?} report={:?}",
            job_id, output_path, error_report_path
        );

        Ok(JobResult {
            rows_after: output.dataset.row_count(),
            before: output.before,
            after: output.dataset,
            rows_before: output.rows_before,
            transformations: output.transformations,
            outliers: output.outliers,
            quality: Some(output.quality),
            output_path,
            error_report_path,
            processed_at: Utc::now(),
        })
    }
}
