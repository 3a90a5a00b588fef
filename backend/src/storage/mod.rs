pub mod s3_service;

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 error: {0}")]
    S3(String),
    #[error("object {0} is empty")]
    EmptyObject(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Somewhere a serialized weight file can be fetched from.
pub trait WeightSource {
    /// Human-readable location, used in logs and the health report.
    fn describe(&self) -> String;

    /// Writes the weight file to `dest`, replacing anything already there.
    async fn fetch_to(&self, dest: &Path) -> Result<(), StorageError>;
}

/// Weight file already present on local disk.
pub struct LocalWeightFile {
    path: PathBuf,
}

impl LocalWeightFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl WeightSource for LocalWeightFile {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch_to(&self, dest: &Path) -> Result<(), StorageError> {
        if self.path == dest {
            tokio::fs::metadata(dest).await?;
            return Ok(());
        }
        ensure_parent_dir(dest).await?;
        tokio::fs::copy(&self.path, dest).await?;
        Ok(())
    }
}

pub(crate) async fn ensure_parent_dir(path: &Path) -> Result<(), std::io::Error> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}
