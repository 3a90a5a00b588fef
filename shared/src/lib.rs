use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Verdict returned by `POST /predict/`.
///
/// `confidence` is always the estimated probability that the image is fake,
/// whatever the verdict. A "real" verdict therefore carries a confidence
/// below 0.5.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PredictionResult {
    pub is_fake: bool,
    pub confidence: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorResponse {
    pub message: String,
}

impl ErrorResponse {
    pub fn processing(detail: impl std::fmt::Display) -> Self {
        Self {
            message: format!("Error processing image: {}", detail),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModelState {
    Unloaded,
    Loaded,
    LoadFailed,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ServiceStatus {
    Ok,
    Degraded,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ModelStatus {
    pub state: ModelState,
    pub source: Option<String>,
    pub sha256: Option<String>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HealthResponse {
    pub status: ServiceStatus,
    pub model: ModelStatus,
}
