use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::Result;
use crate::pipeline::output::OutputFormat;

/// Hex SHA-256 of an uploaded payload.
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Flat keyed storage for job artifacts:
/// `uploads/{job_id}.{ext}`, `outputs/{job_id}_clean.{ext}`, `errors/{job_id}_errors.txt`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    upload_dir: PathBuf,
    output_dir: PathBuf,
    error_dir: PathBuf,
}

impl FileStorage {
    pub fn new(
        upload_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        error_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            output_dir: output_dir.into(),
            error_dir: error_dir.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.upload_dir, &settings.output_dir, &settings.error_dir)
    }

    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.upload_dir, &self.output_dir, &self.error_dir] {
            fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    pub fn upload_path(&self, job_id: &str, extension: &str) -> PathBuf {
        self.upload_dir.join(format!("{}.{}", job_id, extension))
    }

    pub fn output_path(&self, job_id: &str, format: OutputFormat) -> PathBuf {
        self.output_dir
            .join(format!("{}_clean.{}", job_id, format.extension()))
    }

    pub fn error_report_path(&self, job_id: &str) -> PathBuf {
        self.error_dir.join(format!("{}_errors.txt", job_id))
    }

    pub async fn save_upload(&self, job_id: &str, extension: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.upload_path(job_id, extension);
        write(&path, bytes).await?;
        Ok(path)
    }

    pub async fn read_upload(&self, job_id: &str, extension: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.upload_path(job_id, extension)).await?)
    }

    pub async fn save_output(&self, job_id: &str, format: OutputFormat, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.output_path(job_id, format);
        write(&path, bytes).await?;
        Ok(path)
    }

    pub async fn save_error_report(&self, job_id: &str, report: &str) -> Result<PathBuf> {
        let path = self.error_report_path(job_id);
        write(&path, report.as_bytes()).await?;
        Ok(path)
    }

    pub async fn read(&self, path: impl AsRef<Path>) -> Result<Vec<u8>> {
        Ok(fs::read(path).await?)
    }

    /// Remove every artifact of `job_id`. Returns how many files were deleted.
    pub async fn remove_job_files(&self, job_id: &str, upload_extension: &str) -> usize {
        let candidates = [
            self.upload_path(job_id, upload_extension),
            self.output_path(job_id, OutputFormat::Csv),
            self.output_path(job_id, OutputFormat::Json),
            self.error_report_path(job_id),
        ];
        let mut removed = 0;
        for path in candidates {
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        debug!("Removed {} files for job {}", removed, job_id);
        removed
    }
}

async fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_checksum_is_hex_sha256() {
        assert_eq!(
            checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_layout_and_cleanup() {
        let dir = TempDir::new().unwrap();
        let files = FileStorage::new(
            dir.path().join("uploads"),
            dir.path().join("outputs"),
            dir.path().join("errors"),
        );

        let upload = files.save_upload("j1", "csv", b"a,b\n1,2\n").await.unwrap();
        assert!(upload.ends_with("uploads/j1.csv"));
        let output = files.save_output("j1", OutputFormat::Json, b"{}").await.unwrap();
        assert!(output.ends_with("outputs/j1_clean.json"));
        let report = files.save_error_report("j1", "none").await.unwrap();
        assert!(report.ends_with("errors/j1_errors.txt"));

        assert_eq!(files.read_upload("j1", "csv").await.unwrap(), b"a,b\n1,2\n");
        assert_eq!(files.remove_job_files("j1", "csv").await, 3);
        assert!(files.read_upload("j1", "csv").await.is_err());
    }
}
