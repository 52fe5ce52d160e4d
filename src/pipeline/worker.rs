//! Background execution of jobs.
//!
//! The worker owns every write to a job while it is processing: it moves the job to
//! `processing`, runs the orchestrator in its own task, and applies exactly one terminal
//! transition when the run ends.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::ports::{JobStore, PipelineObserver};
use crate::domain::{Job, JobFailure, JobResult, JobStatus, Stage, ValidationError};
use crate::error::{FormataError, Result};
use crate::observability::metrics;
use crate::pipeline::cancellation::CancellationToken;
use crate::pipeline::orchestrator::{Orchestrator, PipelineInput, ProcessingConfig};

/// Forwards stage boundaries to the job store as progress and accumulated issues.
pub struct StoreObserver {
    store: Arc<dyn JobStore>,
}

impl StoreObserver {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PipelineObserver for StoreObserver {
    async fn stage_finished(
        &self,
        job_id: &str,
        stage: Stage,
        issues: &[ValidationError],
    ) -> Result<()> {
        self.store.append_errors(job_id, issues.to_vec()).await?;
        self.store.update_progress(job_id, stage.progress_mark()).await
    }
}

#[derive(Clone)]
pub struct Worker {
    store: Arc<dyn JobStore>,
    orchestrator: Arc<Orchestrator>,
    timeout: Option<Duration>,
    tokens: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl Worker {
    pub fn new(store: Arc<dyn JobStore>, orchestrator: Arc<Orchestrator>, timeout: Option<Duration>) -> Self {
        Self {
            store,
            orchestrator,
            timeout,
            tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Move the job to `processing` and run it in the background.
    ///
    /// Returns the job as it is right after the transition; poll the store for progress.
    pub async fn start(
        &self,
        job_id: &str,
        input: PipelineInput,
        config: ProcessingConfig,
    ) -> Result<(Job, JoinHandle<()>)> {
        let (job, token) = self.begin(job_id).await?;
        let worker = self.clone();
        let id = job_id.to_string();
        let handle = tokio::spawn(async move {
            if let Err(e) = worker.drive(&id, input, config, token).await {
                error!("Job {} could not be finalized: {}", id, e);
            }
        });
        Ok((job, handle))
    }

    /// Move the job to `processing` and run it to a terminal state before returning.
    pub async fn run(&self, job_id: &str, input: PipelineInput, config: ProcessingConfig) -> Result<Job> {
        let (_, token) = self.begin(job_id).await?;
        self.drive(job_id, input, config, token).await
    }

    /// Request cancellation.
    ///
    /// A pending job is cancelled at once. A processing job is cancelled by its worker at
    /// the next stage boundary; until then the returned job is still `processing`.
    pub async fn cancel(&self, job_id: &str) -> Result<Job> {
        let running = self.tokens.read().await.get(job_id).cloned();
        if let Some(token) = running {
            token.cancel();
            info!("Cancellation requested for job {}", job_id);
            return self.store.get(job_id).await;
        }
        let job = self.store.mark_cancelled(job_id).await?;
        metrics::jobs::cancelled();
        info!("Cancelled pending job {}", job_id);
        Ok(job)
    }

    pub async fn is_running(&self, job_id: &str) -> bool {
        self.tokens.read().await.contains_key(job_id)
    }

    async fn begin(&self, job_id: &str) -> Result<(Job, CancellationToken)> {
        let token = CancellationToken::new();
        // Register before the transition so a cancel racing the start is not lost
        {
            let mut tokens = self.tokens.write().await;
            if tokens.contains_key(job_id) {
                return Err(FormataError::InvalidTransition {
                    job_id: job_id.to_string(),
                    from: JobStatus::Processing,
                    to: JobStatus::Processing,
                });
            }
            tokens.insert(job_id.to_string(), token.clone());
        }
        match self.store.mark_processing(job_id).await {
            Ok(job) => {
                metrics::jobs::started();
                Ok((job, token))
            }
            Err(e) => {
                self.tokens.write().await.remove(job_id);
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        job_id: &str,
        input: PipelineInput,
        config: ProcessingConfig,
        token: CancellationToken,
    ) -> Result<Job> {
        let outcome = self.execute(job_id, input, config, token.clone()).await;
        self.tokens.write().await.remove(job_id);

        let job = match outcome {
            Ok(result) => {
                let job = self.store.set_result(job_id, result).await?;
                metrics::jobs::completed();
                info!("Job {} completed", job_id);
                job
            }
            Err(FormataError::Cancelled(_)) => {
                let job = self.store.mark_cancelled(job_id).await?;
                metrics::jobs::cancelled();
                info!("Job {} cancelled", job_id);
                job
            }
            Err(e) => {
                warn!("Job {} failed: {}", job_id, e);
                metrics::jobs::failed(e.code());
                self.fail_unless_terminal(job_id, JobFailure::from(&e)).await?
            }
        };
        Ok(job)
    }

    async fn fail_unless_terminal(&self, job_id: &str, failure: JobFailure) -> Result<Job> {
        let current = self.store.get(job_id).await?;
        if current.status.is_terminal() {
            return Ok(current);
        }
        self.store.mark_failed(job_id, failure).await
    }

    /// Run the orchestrator in its own task so a panicking stage fails the job instead of
    /// the worker, and enforce the whole-pipeline timeout.
    async fn execute(
        &self,
        job_id: &str,
        input: PipelineInput,
        config: ProcessingConfig,
        token: CancellationToken,
    ) -> Result<JobResult> {
        let job = self.store.get(job_id).await?;
        if job.status != JobStatus::Processing {
            return Err(FormataError::InvalidTransition {
                job_id: job_id.to_string(),
                from: job.status,
                to: JobStatus::Processing,
            });
        }

        let orchestrator = self.orchestrator.clone();
        let observer = StoreObserver::new(self.store.clone());
        let id = job_id.to_string();
        let task_token = token.clone();
        let mut handle = tokio::spawn(async move {
            orchestrator
                .execute(&id, &job.filename, input, &config, &task_token, &observer, &job.errors)
                .await
        });

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    token.cancel();
                    handle.abort();
                    return Err(FormataError::Timeout(limit.as_secs()));
                }
            },
            None => handle.await,
        };

        joined.unwrap_or_else(|e| {
            Err(FormataError::pipeline(
                "worker",
                format!("pipeline task ended abnormally: {}", e),
            ))
        })
    }
}
