pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod logging;
pub mod observability;
pub mod server;

// Layered boundaries: use cases and ports, infrastructure adapters, the job pipeline
pub mod app;
pub mod infra;
pub mod pipeline;

pub use error::{FormataError, Result};
