use async_trait::async_trait;

use crate::domain::{Job, JobFailure, JobResult, Stage, ValidationError};
use crate::error::Result;

/// Owner of every [`Job`] record.
///
/// Mutations go through [`JobStore::modify`], which implementations must apply atomically
/// with respect to concurrent readers: a reader sees the job before or after the change,
/// never in between. Lifecycle rules are enforced by the `Job` methods the helpers call.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job and return its id.
    async fn create(&self, job: Job) -> Result<String>;

    /// `JobNotFound` when absent.
    async fn get(&self, id: &str) -> Result<Job>;

    /// All jobs, oldest first.
    async fn list(&self) -> Result<Vec<Job>>;

    /// Remove and return the job.
    async fn delete(&self, id: &str) -> Result<Job>;

    /// Apply `change` to the stored job and persist it only if `change` succeeds.
    async fn modify(
        &self,
        id: &str,
        change: &mut (dyn for<'j> FnMut(&'j mut Job) -> Result<()> + Send),
    ) -> Result<Job>;

    async fn mark_processing(&self, id: &str) -> Result<Job> {
        self.modify(id, &mut |job| job.start()).await
    }

    async fn update_progress(&self, id: &str, fraction: f64) -> Result<()> {
        self.modify(id, &mut |job| job.advance(fraction)).await?;
        Ok(())
    }

    async fn append_errors(&self, id: &str, errors: Vec<ValidationError>) -> Result<()> {
        if errors.is_empty() {
            return Ok(());
        }
        let mut pending = Some(errors);
        self.modify(id, &mut |job| job.append_errors(pending.take().unwrap_or_default()))
            .await?;
        Ok(())
    }

    /// Attach the result and complete the job.
    async fn set_result(&self, id: &str, result: JobResult) -> Result<Job> {
        let mut pending = Some(result);
        self.modify(id, &mut |job| match pending.take() {
            Some(result) => job.complete(result),
            None => Ok(()),
        })
        .await
    }

    async fn mark_failed(&self, id: &str, failure: JobFailure) -> Result<Job> {
        self.modify(id, &mut |job| job.fail(failure.clone())).await
    }

    async fn mark_cancelled(&self, id: &str) -> Result<Job> {
        self.modify(id, &mut |job| job.cancel()).await
    }

    async fn set_metadata(&self, id: &str, key: &str, value: serde_json::Value) -> Result<()> {
        self.modify(id, &mut |job| {
            job.metadata.insert(key.to_string(), value.clone());
            Ok(())
        })
        .await?;
        Ok(())
    }
}

/// Receives stage boundaries from the orchestrator.
#[async_trait]
pub trait PipelineObserver: Send + Sync {
    /// Called after `stage` has fully produced its output, with the issues it recorded.
    async fn stage_finished(
        &self,
        job_id: &str,
        stage: Stage,
        issues: &[ValidationError],
    ) -> Result<()>;
}

/// Observer that discards every event.
pub struct NoopObserver;

#[async_trait]
impl PipelineObserver for NoopObserver {
    async fn stage_finished(&self, _: &str, _: Stage, _: &[ValidationError]) -> Result<()> {
        Ok(())
    }
}
