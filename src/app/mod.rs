pub mod job_use_case;
pub mod ports;

pub use job_use_case::{IngestReceipt, JobService, Preview};
pub use ports::{JobStore, NoopObserver, PipelineObserver};
