use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSettings;

/// Initializes the logging system with both console and file output.
///
/// The returned guard flushes the file writer on drop; hold it for the life of the process.
pub fn init_logging(settings: &LoggingSettings) -> WorkerGuard {
    // Ensure logs directory exists
    let _ = fs::create_dir_all(&settings.log_dir);

    // Create a non-blocking file appender for daily log rotation
    let file_appender = tracing_appender::rolling::daily(&settings.log_dir, &settings.file_prefix);
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    // JSON for the file, human-readable for the console
    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);
    let console_layer = fmt::layer().with_writer(std::io::stdout);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.default_directive));

    // try_init so a second call (tests, embedded use) is a no-op rather than a panic
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    guard
}
