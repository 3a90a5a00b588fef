use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::inference::model::{ModelHandle, WeightsError};
use crate::storage::{StorageError, WeightSource};

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("fetch failed: {0}")]
    Storage(#[from] StorageError),
    #[error("cannot read downloaded weights: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Weights(#[from] WeightsError),
}

/// Fetches the weight file into a scratch path and loads it into the model.
pub struct ModelLoader {
    scratch_path: PathBuf,
}

impl ModelLoader {
    pub fn new(scratch_path: impl Into<PathBuf>) -> Self {
        Self {
            scratch_path: scratch_path.into(),
        }
    }

    /// Loads weights from `source` into `handle`.
    ///
    /// Never fails: errors are logged and recorded on the handle, which keeps
    /// whatever parameters it had before the attempt.
    pub async fn load_into<S: WeightSource>(&self, source: &S, handle: &mut ModelHandle) {
        let location = source.describe();
        log::info!("Downloading model from {}", location);

        match self.try_load(source, handle).await {
            Ok(sha256) => log::info!("Model loaded successfully (sha256 {})", sha256),
            Err(e) => {
                log::error!("Error loading model from {}: {}", location, e);
                handle.mark_load_failed(location, e.to_string());
            }
        }
    }

    async fn try_load<S: WeightSource>(
        &self,
        source: &S,
        handle: &mut ModelHandle,
    ) -> Result<String, ModelLoadError> {
        source.fetch_to(&self.scratch_path).await?;
        let sha256 = file_sha256(&self.scratch_path).await?;
        handle.load_weights(&self.scratch_path, source.describe(), sha256.clone())?;
        Ok(sha256)
    }
}

async fn file_sha256(path: &Path) -> Result<String, std::io::Error> {
    let bytes = tokio::fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}
