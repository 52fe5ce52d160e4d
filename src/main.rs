use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use formata::app::JobService;
use formata::config::{JobStoreKind, Settings};
use formata::logging;
use formata::observability;
use formata::pipeline::storage::{create_store, InMemoryJobStore};
use formata::pipeline::{OutputFormat, ProcessingConfig};
use formata::server;

#[derive(Parser)]
#[command(name = "formata")]
#[command(about = "Clean, filter and validate tabular data files")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Port to listen on (overrides configuration)
        #[arg(long)]
        port: Option<u16>,
        /// Job store: memory or sqlite
        #[arg(long)]
        store: Option<JobStoreKind>,
    },
    /// Run the full pipeline on one file and print a summary
    Process {
        file: PathBuf,
        /// Processing configuration as inline JSON or a path to a JSON file
        #[arg(long)]
        config: Option<String>,
        /// Directory for outputs and error reports
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Convert between CSV and JSON
    Convert {
        file: PathBuf,
        /// Target format: json or csv
        #[arg(long)]
        to: OutputFormat,
        /// Output path; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn load_processing_config(raw: Option<&str>) -> anyhow::Result<ProcessingConfig> {
    let Some(raw) = raw else {
        return Ok(ProcessingConfig::default());
    };
    let text = if raw.trim_start().starts_with('{') {
        raw.to_string()
    } else {
        std::fs::read_to_string(raw).with_context(|| format!("reading config file {}", raw))?
    };
    serde_json::from_str(&text).context("parsing processing config")
}

fn file_name(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .with_context(|| format!("{} has no file name", path.display()))
}

async fn serve(mut settings: Settings, port: Option<u16>, store: Option<JobStoreKind>) -> anyhow::Result<()> {
    if let Some(port) = port {
        settings.api_port = port;
    }
    if let Some(store) = store {
        settings.job_store = store;
    }
    settings.validate()?;

    observability::init_metrics()?;
    let job_store = create_store(&settings)?;
    let service = Arc::new(JobService::new(&settings, job_store));
    service.files().ensure_dirs().await?;

    if let Some(metrics_addr) = &settings.metrics_addr {
        let addr: SocketAddr = metrics_addr
            .parse()
            .with_context(|| format!("invalid metrics_addr {}", metrics_addr))?;
        tokio::spawn(async move {
            if let Err(e) = server::start_metrics_server(addr).await {
                error!("Metrics server failed: {}", e);
            }
        });
    }

    let addr: SocketAddr = settings
        .bind_addr()
        .parse()
        .with_context(|| format!("invalid bind address {}", settings.bind_addr()))?;
    info!("Starting {} with {:?} job store", settings.app_name, settings.job_store);
    server::start_server(service, addr).await
}

async fn process(
    mut settings: Settings,
    file: PathBuf,
    config: Option<String>,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(out) = out {
        let rooted = Settings::rooted_at(&out);
        settings.upload_dir = rooted.upload_dir;
        settings.output_dir = rooted.output_dir;
        settings.error_dir = rooted.error_dir;
    }
    let config = load_processing_config(config.as_deref())?;
    let bytes = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;

    let service = JobService::new(&settings, Arc::new(InMemoryJobStore::new()));
    let receipt = service.ingest(&file_name(&file)?, &bytes).await?;
    println!("📥 Ingested {} ({} rows, {} columns)", receipt.filename, receipt.rows, receipt.columns.len());

    let job = service.process_now(&receipt.job_id, config).await?;
    println!("\n📊 Job {}: {}", job.id, job.status);
    if let Some(failure) = &job.failure {
        println!("   Failure: {} ({})", failure.message, failure.code);
    }
    if let Some(result) = &job.result {
        println!("   Rows: {} → {}", result.rows_before, result.rows_after);
        for step in &result.transformations {
            println!("   - {}", step);
        }
        if let Some(quality) = &result.quality {
            println!("   Quality: {:.1} ({})", quality.overall_score, quality.grade);
        }
        if let Some(path) = &result.output_path {
            println!("   Output file: {}", path);
        }
        if let Some(path) = &result.error_report_path {
            println!("   Error report: {}", path);
        }
    }
    if !job.errors.is_empty() {
        warn!("{} issues recorded", job.errors.len());
        println!("\n⚠️  {} issues recorded:", job.errors.len());
        for issue in job.errors.iter().take(20) {
            println!("   - {}", issue);
        }
    }
    Ok(())
}

async fn convert(settings: Settings, file: PathBuf, to: OutputFormat, out: Option<PathBuf>) -> anyhow::Result<()> {
    let bytes = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
    let service = JobService::new(&settings, Arc::new(InMemoryJobStore::new()));
    let converted = service.convert(&file_name(&file)?, &bytes, to)?;
    match out {
        Some(path) => {
            std::fs::write(&path, &converted)?;
            println!("✅ Wrote {}", path.display());
        }
        None => println!("{}", String::from_utf8_lossy(&converted)),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load()?;
    // Keep the guard alive so buffered file logs are flushed on exit
    let _guard = logging::init_logging(&settings.logging);

    match cli.command {
        Commands::Serve { port, store } => serve(settings, port, store).await,
        Commands::Process { file, config, out } => process(settings, file, config, out).await,
        Commands::Convert { file, to, out } => convert(settings, file, to, out).await,
    }
}
