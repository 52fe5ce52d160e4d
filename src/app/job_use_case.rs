use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::app::ports::JobStore;
use crate::config::Settings;
use crate::constants::format_from_filename;
use crate::domain::{Dataset, Job, JobFailure, JobResult, JobStatus, ValidationError};
use crate::error::{FormataError, Result};
use crate::infra::{checksum, FileStorage};
use crate::observability::metrics;
use crate::pipeline::output::{self, OutputFormat};
use crate::pipeline::processing::filter::{apply_filters, FilterSet};
use crate::pipeline::processing::normalize::analyze_missing;
use crate::pipeline::processing::parser::{parse_file, ParseOptions};
use crate::pipeline::{Orchestrator, PipelineInput, ProcessingConfig, Worker};

/// What the caller gets back from a successful ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    pub job_id: String,
    pub status: JobStatus,
    pub filename: String,
    pub format: String,
    pub rows: usize,
    pub columns: Vec<String>,
    /// Malformed rows skipped while parsing.
    pub skipped_rows: usize,
}

/// Filter set evaluated against an ingested dataset without starting the pipeline.
#[derive(Debug, Clone)]
pub struct Preview {
    pub total_rows: usize,
    pub matched_rows: usize,
    /// At most `preview_rows` of the matching rows.
    pub dataset: Dataset,
    pub issues: Vec<ValidationError>,
}

/// Use case tying ingestion, the job store, the worker and artifact storage together.
pub struct JobService {
    store: Arc<dyn JobStore>,
    files: FileStorage,
    worker: Worker,
    /// Datasets parsed at ingestion, so processing can skip the parse stage. Entries live
    /// until the job reaches a terminal state.
    datasets: Arc<RwLock<HashMap<String, Arc<Dataset>>>>,
    parse_options: ParseOptions,
    max_file_size: usize,
    preview_rows: usize,
}

fn extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

impl JobService {
    pub fn new(settings: &Settings, store: Arc<dyn JobStore>) -> Self {
        let files = FileStorage::from_settings(settings);
        let parse_options = ParseOptions {
            max_malformed_fraction: settings.max_malformed_fraction,
        };
        let orchestrator = Arc::new(Orchestrator::new(Some(files.clone()), parse_options));
        let timeout = settings.pipeline_timeout_secs.map(Duration::from_secs);
        let worker = Worker::new(store.clone(), orchestrator, timeout);
        Self {
            store,
            files,
            worker,
            datasets: Arc::new(RwLock::new(HashMap::new())),
            parse_options,
            max_file_size: settings.max_file_size,
            preview_rows: settings.preview_rows,
        }
    }

    pub fn files(&self) -> &FileStorage {
        &self.files
    }

    fn check_size(&self, len: usize) -> Result<()> {
        if len > self.max_file_size {
            return Err(FormataError::PayloadTooLarge {
                size: len,
                limit: self.max_file_size,
            });
        }
        Ok(())
    }

    /// Store the upload, parse it and create a pending job.
    ///
    /// A file that fails to parse still produces a job, created directly as `failed`; the
    /// parse error is returned to the caller.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn ingest(&self, filename: &str, bytes: &[u8]) -> Result<IngestReceipt> {
        self.check_size(bytes.len())?;
        let format = format_from_filename(filename)
            .ok_or_else(|| FormataError::UnsupportedFormat(filename.to_string()))?;
        let ext = extension(filename);

        let mut job = Job::new(filename, format);
        job.metadata.insert("checksum".into(), json!(checksum(bytes)));
        job.metadata.insert("size_bytes".into(), json!(bytes.len()));
        job.metadata.insert("upload_extension".into(), json!(ext));
        self.files.save_upload(&job.id, &ext, bytes).await?;
        metrics::jobs::created(format);

        let owned = bytes.to_vec();
        let name = filename.to_string();
        let options = self.parse_options;
        let parsed = tokio::task::spawn_blocking(move || parse_file(&name, &owned, options))
            .await
            .map_err(|e| FormataError::pipeline("parse", e.to_string()))?;

        let outcome = match parsed {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Ingestion of {} failed: {}", filename, e);
                job.fail(JobFailure::from(&e))?;
                metrics::jobs::failed(e.code());
                self.store.create(job).await?;
                return Err(e);
            }
        };

        let dataset = outcome.dataset;
        let missing = analyze_missing(&dataset);
        job.metadata.insert("rows".into(), json!(dataset.row_count()));
        job.metadata.insert("columns".into(), json!(dataset.column_names()));
        job.metadata
            .insert("missing_analysis".into(), serde_json::to_value(&missing)?);
        let skipped_rows = outcome.issues.len();
        job.append_errors(outcome.issues)?;

        let receipt = IngestReceipt {
            job_id: job.id.clone(),
            status: job.status,
            filename: job.filename.clone(),
            format: job.format.clone(),
            rows: dataset.row_count(),
            columns: dataset.column_names().iter().map(|c| c.to_string()).collect(),
            skipped_rows,
        };
        let id = self.store.create(job).await?;
        self.datasets.write().await.insert(id.clone(), Arc::new(dataset));
        info!(
            "Ingested {} as job {}: rows={} skipped={}",
            filename, id, receipt.rows, skipped_rows
        );
        Ok(receipt)
    }

    /// The dataset to feed the pipeline: the ingestion-time parse when cached, otherwise
    /// the stored upload (and the pipeline parses it again).
    async fn pipeline_input(&self, job: &Job) -> Result<PipelineInput> {
        if let Some(dataset) = self.datasets.read().await.get(&job.id).cloned() {
            return Ok(PipelineInput::Parsed(dataset));
        }
        let ext = extension(&job.filename);
        let bytes = self.files.read_upload(&job.id, &ext).await?;
        Ok(PipelineInput::Raw {
            filename: job.filename.clone(),
            bytes,
        })
    }

    /// Parsed dataset of a job, parsing the stored upload on a cache miss.
    pub async fn dataset(&self, id: &str) -> Result<Arc<Dataset>> {
        let job = self.store.get(id).await?;
        match self.pipeline_input(&job).await? {
            PipelineInput::Parsed(dataset) => Ok(dataset),
            PipelineInput::Raw { filename, bytes } => {
                let dataset = Arc::new(parse_file(&filename, &bytes, self.parse_options)?.dataset);
                if !job.status.is_terminal() {
                    self.datasets
                        .write()
                        .await
                        .insert(id.to_string(), dataset.clone());
                }
                Ok(dataset)
            }
        }
    }

    /// pending → processing, then run the pipeline in the background.
    pub async fn start_processing(&self, id: &str, config: ProcessingConfig) -> Result<Job> {
        let job = self.store.get(id).await?;
        let input = self.pipeline_input(&job).await?;
        let (job, handle) = self.worker.start(id, input, config).await?;
        let datasets = self.datasets.clone();
        let key = id.to_string();
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                warn!("Worker task for job {} ended abnormally: {}", key, e);
            }
            datasets.write().await.remove(&key);
        });
        Ok(job)
    }

    /// Run the pipeline to completion before returning.
    pub async fn process_now(&self, id: &str, config: ProcessingConfig) -> Result<Job> {
        let job = self.store.get(id).await?;
        let input = self.pipeline_input(&job).await?;
        let outcome = self.worker.run(id, input, config).await;
        self.evict_if_finished(id).await;
        outcome
    }

    pub async fn cancel(&self, id: &str) -> Result<Job> {
        let job = self.worker.cancel(id).await?;
        if job.status.is_terminal() {
            self.datasets.write().await.remove(id);
        }
        Ok(job)
    }

    /// Drop the cached dataset once the job can no longer be processed.
    async fn evict_if_finished(&self, id: &str) {
        let finished = match self.store.get(id).await {
            Ok(job) => job.status.is_terminal(),
            Err(FormataError::JobNotFound(_)) => true,
            Err(_) => false,
        };
        if finished {
            self.datasets.write().await.remove(id);
        }
    }

    #[cfg(test)]
    async fn is_cached(&self, id: &str) -> bool {
        self.datasets.read().await.contains_key(id)
    }

    pub async fn status(&self, id: &str) -> Result<Job> {
        self.store.get(id).await
    }

    /// The job and its result; `NotReady` unless the job completed.
    pub async fn result(&self, id: &str) -> Result<(Job, JobResult)> {
        let mut job = self.store.get(id).await?;
        match job.result.take() {
            Some(result) if job.status == JobStatus::Completed => Ok((job, result)),
            _ => Err(FormataError::NotReady {
                job_id: id.to_string(),
                status: job.status,
            }),
        }
    }

    pub async fn list(&self) -> Result<Vec<Job>> {
        self.store.list().await
    }

    /// Job counts per status, plus `total`.
    pub async fn summary(&self) -> Result<BTreeMap<&'static str, usize>> {
        let jobs = self.store.list().await?;
        let mut counts: BTreeMap<&'static str, usize> =
            JobStatus::all().iter().map(|s| (s.as_str(), 0)).collect();
        for job in &jobs {
            *counts.entry(job.status.as_str()).or_default() += 1;
        }
        counts.insert("total", jobs.len());
        Ok(counts)
    }

    /// Remove the job, its cached dataset and its files. A processing job is cancelled first.
    pub async fn delete(&self, id: &str) -> Result<Job> {
        if self.worker.is_running(id).await {
            self.worker.cancel(id).await?;
        }
        let job = self.store.delete(id).await?;
        self.datasets.write().await.remove(id);
        self.files.remove_job_files(id, &extension(&job.filename)).await;
        info!("Deleted job {}", id);
        Ok(job)
    }

    /// Evaluate `filters` against the job's ingested dataset.
    pub async fn preview(&self, id: &str, filters: &FilterSet) -> Result<Preview> {
        let dataset = self.dataset(id).await?;
        let total_rows = dataset.row_count();
        let outcome = apply_filters(Dataset::clone(&dataset), filters);
        Ok(Preview {
            total_rows,
            matched_rows: outcome.dataset.row_count(),
            dataset: outcome.dataset.head(self.preview_rows),
            issues: outcome.issues,
        })
    }

    /// Cleaned output of a completed job.
    pub async fn download_output(&self, id: &str) -> Result<(OutputFormat, Vec<u8>)> {
        let (_, result) = self.result(id).await?;
        let path = result
            .output_path
            .ok_or_else(|| FormataError::ArtifactNotFound(format!("output for job {}", id)))?;
        let format = if path.ends_with(".json") {
            OutputFormat::Json
        } else {
            OutputFormat::Csv
        };
        Ok((format, self.files.read(&path).await?))
    }

    /// Error report of a job. Jobs that never reached finalization get one rendered from
    /// their recorded issues.
    pub async fn error_report(&self, id: &str) -> Result<Vec<u8>> {
        let job = self.store.get(id).await?;
        if let Some(path) = job.result.as_ref().and_then(|r| r.error_report_path.as_ref()) {
            return self.files.read(path).await;
        }
        if job.errors.is_empty() {
            return Err(FormataError::ArtifactNotFound(format!("error report for job {}", id)));
        }
        Ok(output::error_report(&job.id, &job.filename, &job.errors).into_bytes())
    }

    /// Parse `bytes` and re-encode them as `to`.
    pub fn convert(&self, filename: &str, bytes: &[u8], to: OutputFormat) -> Result<Vec<u8>> {
        self.check_size(bytes.len())?;
        let parsed = parse_file(filename, bytes, self.parse_options)?;
        output::render(&parsed.dataset, to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::storage::InMemoryJobStore;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> JobService {
        let settings = Settings::rooted_at(dir.path());
        JobService::new(&settings, Arc::new(InMemoryJobStore::new()))
    }

    #[tokio::test]
    async fn test_ingest_creates_pending_job() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let receipt = svc
            .ingest("people.csv", b"name,age\nAnn,30\nBob,41\n")
            .await
            .unwrap();
        assert_eq!(receipt.status, JobStatus::Pending);
        assert_eq!(receipt.rows, 2);
        assert_eq!(receipt.columns, vec!["name", "age"]);

        let job = svc.status(&receipt.job_id).await.unwrap();
        assert_eq!(job.metadata["rows"], 2);
        assert_eq!(job.metadata["checksum"].as_str().unwrap().len(), 64);
        assert!(dir.path().join("uploads").join(format!("{}.csv", job.id)).exists());
    }

    #[tokio::test]
    async fn test_ingest_parse_error_creates_failed_job() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let err = svc.ingest("broken.json", b"{not json").await.unwrap_err();
        assert_eq!(err.code(), "parse_error");

        let jobs = svc.list().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert!(jobs[0].result.is_none());
        assert_eq!(svc.summary().await.unwrap()["failed"], 1);
    }

    #[tokio::test]
    async fn test_ingest_rejects_large_and_unknown_files() {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::rooted_at(dir.path());
        settings.max_file_size = 4;
        let svc = JobService::new(&settings, Arc::new(InMemoryJobStore::new()));
        assert_eq!(svc.ingest("a.csv", b"a,b\n1,2\n").await.unwrap_err().status_code(), 413);
        assert_eq!(svc.ingest("a.pdf", b"x").await.unwrap_err().code(), "unsupported_format");
        assert!(svc.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_result_requires_completion() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let receipt = svc.ingest("a.csv", b"x\n1\n").await.unwrap();
        let err = svc.result(&receipt.job_id).await.unwrap_err();
        assert_eq!(err.code(), "not_ready");
        assert_eq!(err.status_code(), 409);
    }

    #[tokio::test]
    async fn test_process_now_writes_artifacts() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let receipt = svc
            .ingest("people.csv", b"Name,Age\nAnn,30\nBob,abc\nAnn,30\n")
            .await
            .unwrap();
        let job = svc
            .process_now(&receipt.job_id, ProcessingConfig::default())
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        let (_, result) = svc.result(&job.id).await.unwrap();
        assert_eq!(result.rows_before, 3);
        assert_eq!(result.rows_after, 2);
        assert!(result.error_report_path.is_some());

        let (format, bytes) = svc.download_output(&job.id).await.unwrap();
        assert_eq!(format, OutputFormat::Csv);
        assert!(String::from_utf8(bytes).unwrap().starts_with("name,age\n"));
        let report = String::from_utf8(svc.error_report(&job.id).await.unwrap()).unwrap();
        assert!(report.contains("coercion_failed"));

        svc.delete(&job.id).await.unwrap();
        assert_eq!(svc.status(&job.id).await.unwrap_err().code(), "not_found");
        assert!(!dir.path().join("outputs").join(format!("{}_clean.csv", job.id)).exists());
    }

    #[tokio::test]
    async fn test_cached_dataset_dropped_when_job_finishes() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);

        let done = svc.ingest("a.csv", b"x\n1\n2\n").await.unwrap();
        assert!(svc.is_cached(&done.job_id).await);
        svc.process_now(&done.job_id, ProcessingConfig::default())
            .await
            .unwrap();
        assert!(!svc.is_cached(&done.job_id).await);
        // Previewing a finished job reads the stored upload without re-caching it
        let preview = svc.preview(&done.job_id, &FilterSet::default()).await.unwrap();
        assert_eq!(preview.total_rows, 2);
        assert!(!svc.is_cached(&done.job_id).await);

        let cancelled = svc.ingest("b.csv", b"x\n1\n").await.unwrap();
        svc.cancel(&cancelled.job_id).await.unwrap();
        assert!(!svc.is_cached(&cancelled.job_id).await);

        let background = svc.ingest("c.csv", b"x\n1\n").await.unwrap();
        svc.start_processing(&background.job_id, ProcessingConfig::default())
            .await
            .unwrap();
        let mut evicted = false;
        for _ in 0..200 {
            if svc.status(&background.job_id).await.unwrap().status.is_terminal()
                && !svc.is_cached(&background.job_id).await
            {
                evicted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(evicted);
        assert_eq!(
            svc.status(&background.job_id).await.unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_preview_limits_rows() {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::rooted_at(dir.path());
        settings.preview_rows = 1;
        let svc = JobService::new(&settings, Arc::new(InMemoryJobStore::new()));
        let receipt = svc
            .ingest("a.csv", b"city\nOslo\nRome\nOsaka\n")
            .await
            .unwrap();
        let filters: FilterSet =
            serde_json::from_value(json!({"city": {"op": "starts_with", "value": "os"}})).unwrap();
        let preview = svc.preview(&receipt.job_id, &filters).await.unwrap();
        assert_eq!(preview.total_rows, 3);
        assert_eq!(preview.matched_rows, 2);
        assert_eq!(preview.dataset.row_count(), 1);
        // Previewing does not start the job
        assert_eq!(svc.status(&receipt.job_id).await.unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_convert_csv_to_json() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let bytes = svc
            .convert("a.csv", b"a,b\n1,x\n", OutputFormat::Json)
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["records"][0]["b"], "x");
        assert_eq!(value["meta"]["row_count"], 1);
    }
}
