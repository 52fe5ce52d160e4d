use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FormataError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "formata.toml";

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStoreKind {
    Memory,
    Sqlite,
}

impl std::str::FromStr for JobStoreKind {
    type Err = FormataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(JobStoreKind::Memory),
            "sqlite" => Ok(JobStoreKind::Sqlite),
            other => Err(FormataError::Config(format!("unknown job store '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub log_dir: PathBuf,
    pub file_prefix: String,
    /// Directive used when `RUST_LOG` is unset.
    pub default_directive: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            file_prefix: "formata.log".to_string(),
            default_directive: "formata=info".to_string(),
        }
    }
}

/// Service settings. Every field has a default, so an absent config file is fine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app_name: String,
    pub api_host: String,
    pub api_port: u16,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub error_dir: PathBuf,
    /// Upload size limit in bytes.
    pub max_file_size: usize,
    pub job_store: JobStoreKind,
    pub database_path: PathBuf,
    /// Whole-pipeline timeout; no timeout when unset.
    pub pipeline_timeout_secs: Option<u64>,
    /// Fraction of malformed CSV rows tolerated before the parse fails.
    pub max_malformed_fraction: f64,
    pub preview_rows: usize,
    pub metrics_addr: Option<String>,
    pub logging: LoggingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "Formata".to_string(),
            api_host: "127.0.0.1".to_string(),
            api_port: 8000,
            upload_dir: PathBuf::from("storage/uploads"),
            output_dir: PathBuf::from("storage/outputs"),
            error_dir: PathBuf::from("storage/errors"),
            max_file_size: 100 * 1024 * 1024,
            job_store: JobStoreKind::Memory,
            database_path: PathBuf::from("storage/formata.db"),
            pipeline_timeout_secs: None,
            max_malformed_fraction: 0.25,
            preview_rows: 50,
            metrics_addr: None,
            logging: LoggingSettings::default(),
        }
    }
}

impl Settings {
    /// Load `.env`, then the TOML file (`FORMATA_CONFIG` or `formata.toml`), then apply
    /// `FORMATA_*` overrides.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();
        let path = env::var("FORMATA_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut settings = if Path::new(&path).exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        settings.apply_env_overrides()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            FormataError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = env::var("FORMATA_APP_NAME") {
            self.app_name = v;
        }
        if let Ok(v) = env::var("FORMATA_API_HOST") {
            self.api_host = v;
        }
        if let Ok(v) = env::var("FORMATA_API_PORT") {
            self.api_port = parse_env("FORMATA_API_PORT", &v)?;
        }
        if let Ok(v) = env::var("FORMATA_UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("FORMATA_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("FORMATA_ERROR_DIR") {
            self.error_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("FORMATA_MAX_FILE_SIZE") {
            self.max_file_size = parse_env("FORMATA_MAX_FILE_SIZE", &v)?;
        }
        if let Ok(v) = env::var("FORMATA_JOB_STORE") {
            self.job_store = v.parse()?;
        }
        if let Ok(v) = env::var("FORMATA_DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Ok(v) = env::var("FORMATA_PIPELINE_TIMEOUT_SECS") {
            self.pipeline_timeout_secs = Some(parse_env("FORMATA_PIPELINE_TIMEOUT_SECS", &v)?);
        }
        if let Ok(v) = env::var("FORMATA_MAX_MALFORMED_FRACTION") {
            self.max_malformed_fraction = parse_env("FORMATA_MAX_MALFORMED_FRACTION", &v)?;
        }
        if let Ok(v) = env::var("FORMATA_PREVIEW_ROWS") {
            self.preview_rows = parse_env("FORMATA_PREVIEW_ROWS", &v)?;
        }
        if let Ok(v) = env::var("FORMATA_METRICS_ADDR") {
            self.metrics_addr = Some(v);
        }
        if let Ok(v) = env::var("FORMATA_LOG_DIR") {
            self.logging.log_dir = PathBuf::from(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_port == 0 {
            return Err(FormataError::Config("api_port must be non-zero".into()));
        }
        if self.max_file_size == 0 {
            return Err(FormataError::Config("max_file_size must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&self.max_malformed_fraction) {
            return Err(FormataError::Config(format!(
                "max_malformed_fraction must be within 0..=1, got {}",
                self.max_malformed_fraction
            )));
        }
        if self.pipeline_timeout_secs == Some(0) {
            return Err(FormataError::Config(
                "pipeline_timeout_secs must be positive when set".into(),
            ));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    /// Defaults rooted under `root`, for tests and one-shot CLI runs.
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            upload_dir: root.join("uploads"),
            output_dir: root.join("outputs"),
            error_dir: root.join("errors"),
            database_path: root.join("formata.db"),
            ..Self::default()
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| FormataError::Config(format!("invalid value '{}' for {}", raw, key)))
}
