//! Job store implementations.

pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemoryJobStore;
pub use sqlite::SqliteJobStore;

use std::sync::Arc;

use crate::app::ports::JobStore;
use crate::config::{JobStoreKind, Settings};
use crate::error::Result;

/// Build the job store selected in `settings`.
pub fn create_store(settings: &Settings) -> Result<Arc<dyn JobStore>> {
    match settings.job_store {
        JobStoreKind::Memory => Ok(Arc::new(InMemoryJobStore::new())),
        JobStoreKind::Sqlite => Ok(Arc::new(SqliteJobStore::open(&settings.database_path)?)),
    }
}
