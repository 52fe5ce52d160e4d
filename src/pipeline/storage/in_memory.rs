use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::app::ports::JobStore;
use crate::domain::Job;
use crate::error::{FormataError, Result};

/// Process-local job store. Jobs are lost on restart.
#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: Job) -> Result<String> {
        let id = job.id.clone();
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&id) {
            return Err(FormataError::Storage(format!("job {} already exists", id)));
        }
        jobs.insert(id.clone(), job);
        debug!("Created job {}", id);
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Job> {
        let jobs = self.jobs.read().await;
        jobs.get(id)
            .cloned()
            .ok_or_else(|| FormataError::JobNotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut all: Vec<Job> = jobs.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }

    async fn delete(&self, id: &str) -> Result<Job> {
        let mut jobs = self.jobs.write().await;
        jobs.remove(id)
            .ok_or_else(|| FormataError::JobNotFound(id.to_string()))
    }

    async fn modify(
        &self,
        id: &str,
        change: &mut (dyn for<'j> FnMut(&'j mut Job) -> Result<()> + Send),
    ) -> Result<Job> {
        let mut jobs = self.jobs.write().await;
        let current = jobs
            .get(id)
            .ok_or_else(|| FormataError::JobNotFound(id.to_string()))?;
        // Work on a copy so a rejected change leaves the stored job untouched
        let mut updated = current.clone();
        change(&mut updated)?;
        jobs.insert(id.to_string(), updated.clone());
        Ok(updated)
    }
}
