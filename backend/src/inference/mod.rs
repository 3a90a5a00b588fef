pub mod decision;
pub mod model;
pub mod preprocess;

use shared::PredictionResult;

use model::{InferenceError, ModelHandle};
use preprocess::PreprocessError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

/// Runs one uploaded image through preprocessing, scoring and the decision
/// rule. Blocks for the whole forward pass.
pub fn predict(model: &ModelHandle, image_bytes: &[u8]) -> Result<PredictionResult, PipelineError> {
    let input = preprocess::preprocess(image_bytes)?;
    let raw_score = model.score(&input)?;
    log::debug!("Raw score: {}", raw_score);
    Ok(decision::decide(raw_score))
}
