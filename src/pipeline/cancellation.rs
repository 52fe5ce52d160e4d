use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{FormataError, Result};

/// Cooperative cancellation flag shared between the worker and whoever asks for the cancel.
///
/// Stages never observe it; the orchestrator checks it at stage boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the token has been cancelled.
    pub fn check(&self, job_id: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(FormataError::Cancelled(job_id.to_string()))
        } else {
            Ok(())
        }
    }
}
