// Job pipeline: processing stages, orchestration, background execution and job storage

pub mod cancellation;
pub mod orchestrator;
pub mod output;
pub mod processing;
pub mod storage;
pub mod worker;

pub use cancellation::CancellationToken;
pub use orchestrator::{Orchestrator, PipelineInput, PipelineOutput, ProcessingConfig};
pub use output::OutputFormat;
pub use worker::{StoreObserver, Worker};
