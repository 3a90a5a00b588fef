use std::path::Path;

use chrono::{DateTime, Utc};
use shared::{ModelState, ModelStatus};
use tch::nn::{self, ModuleT};
use tch::{CModule, Device, Kind, Tensor};

use super::preprocess::{Tensor3D, CHANNELS, INPUT_SIZE};

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("input tensor has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },
    #[error("tensor error: {0}")]
    Tensor(#[from] tch::TchError),
    #[error("model produced {0} outputs, expected exactly one")]
    UnexpectedOutput(usize),
    #[error("model produced a non-finite score: {0}")]
    NonFiniteScore(f32),
}

#[derive(Debug, thiserror::Error)]
pub enum WeightsError {
    #[error("cannot read model file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot load TorchScript module: {0}")]
    Archive(#[from] tch::TchError),
    #[error("loaded module is not a single-logit classifier: {0}")]
    Incompatible(#[from] InferenceError),
}

/// A single-logit image classifier.
///
/// `score` never mutates the model, so one scorer can serve many requests
/// at once. `load_weights` either replaces the whole model or nothing.
pub trait Scorer: Send + Sync {
    fn load_weights(&mut self, path: &Path) -> Result<(), WeightsError>;
    fn score(&self, input: &Tensor3D) -> Result<f32, InferenceError>;
}

/// Classifier exported as TorchScript (the trained timm EfficientNet-B0).
///
/// Until an export is loaded it holds an untrained EfficientNet-B0 traced
/// into the same form, so the service can answer, meaninglessly, when the
/// load fails.
pub struct TorchScorer {
    module: CModule,
    device: Device,
}

fn example_batch(device: Device) -> Tensor {
    let side = INPUT_SIZE as i64;
    Tensor::zeros([1, CHANNELS as i64, side, side], (Kind::Float, device))
}

impl TorchScorer {
    pub fn untrained(device: Device) -> Result<Self, tch::TchError> {
        let vs = nn::VarStore::new(device);
        let net = tch::vision::efficientnet::b0(&vs.root(), 1);
        let mut module = tch::no_grad(|| {
            CModule::create_by_tracing(
                "UntrainedEfficientNetB0",
                "forward",
                &[example_batch(device)],
                &mut |inputs: &[Tensor]| vec![net.forward_t(&inputs[0], false)],
            )
        })?;
        module.f_set_eval()?;
        Ok(Self { module, device })
    }
}

fn single_logit(module: &CModule, batch: &Tensor) -> Result<f32, InferenceError> {
    let output = tch::no_grad(|| module.forward_ts(&[batch]))?;
    let flat = output.to_kind(Kind::Float).to_device(Device::Cpu).f_view([-1])?;
    let values = Vec::<f32>::try_from(&flat)?;
    match values.as_slice() {
        [logit] => Ok(*logit),
        other => Err(InferenceError::UnexpectedOutput(other.len())),
    }
}

impl Scorer for TorchScorer {
    fn load_weights(&mut self, path: &Path) -> Result<(), WeightsError> {
        std::fs::metadata(path)?;
        let mut module = CModule::load_on_device(path, self.device)?;
        module.f_set_eval()?;
        // The running module is only replaced once the new one has shown it
        // maps a batch of one image to one logit.
        single_logit(&module, &example_batch(self.device))?;
        self.module = module;
        Ok(())
    }

    fn score(&self, input: &Tensor3D) -> Result<f32, InferenceError> {
        let side = INPUT_SIZE as usize;
        let expected = (CHANNELS, side, side);
        if input.dim() != expected {
            return Err(InferenceError::ShapeMismatch {
                expected,
                found: input.dim(),
            });
        }

        let data: Vec<f32> = input.iter().copied().collect();
        let batch = Tensor::f_from_slice(&data)?
            .f_view([1, CHANNELS as i64, side as i64, side as i64])?
            .to_device(self.device);
        single_logit(&self.module, &batch)
    }
}

#[derive(Debug, Clone)]
enum LoadState {
    Unloaded,
    Loaded {
        source: String,
        sha256: String,
        loaded_at: DateTime<Utc>,
    },
    LoadFailed {
        source: String,
        reason: String,
    },
}

/// The one model instance shared by every request.
///
/// Built and loaded at startup through `&mut`, then handed to the HTTP layer
/// behind an `Arc` where it is only ever read.
pub struct ModelHandle {
    scorer: Box<dyn Scorer>,
    state: LoadState,
}

impl ModelHandle {
    pub fn new(scorer: Box<dyn Scorer>) -> Self {
        Self {
            scorer,
            state: LoadState::Unloaded,
        }
    }

    /// Replaces the parameters from `path`. On error the previous parameters
    /// are kept and the state is left for the caller to record.
    pub fn load_weights(
        &mut self,
        path: &Path,
        source: String,
        sha256: String,
    ) -> Result<(), WeightsError> {
        self.scorer.load_weights(path)?;
        self.state = LoadState::Loaded {
            source,
            sha256,
            loaded_at: Utc::now(),
        };
        Ok(())
    }

    pub fn mark_load_failed(&mut self, source: String, reason: String) {
        self.state = LoadState::LoadFailed { source, reason };
    }

    pub fn state(&self) -> ModelState {
        match self.state {
            LoadState::Unloaded => ModelState::Unloaded,
            LoadState::Loaded { .. } => ModelState::Loaded,
            LoadState::LoadFailed { .. } => ModelState::LoadFailed,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == ModelState::Loaded
    }

    pub fn status(&self) -> ModelStatus {
        let mut status = ModelStatus {
            state: self.state(),
            source: None,
            sha256: None,
            loaded_at: None,
            error: None,
        };
        match &self.state {
            LoadState::Unloaded => {}
            LoadState::Loaded {
                source,
                sha256,
                loaded_at,
            } => {
                status.source = Some(source.clone());
                status.sha256 = Some(sha256.clone());
                status.loaded_at = Some(*loaded_at);
            }
            LoadState::LoadFailed { source, reason } => {
                status.source = Some(source.clone());
                status.error = Some(reason.clone());
            }
        }
        status
    }

    /// Scores one image. Only finite logits leave the handle, whatever the
    /// scorer.
    pub fn score(&self, input: &Tensor3D) -> Result<f32, InferenceError> {
        let logit = self.scorer.score(input)?;
        if !logit.is_finite() {
            return Err(InferenceError::NonFiniteScore(logit));
        }
        Ok(logit)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::inference::preprocess::{preprocess, tests::png_bytes};

    fn sample_input() -> Tensor3D {
        preprocess(&png_bytes(50, 80, [90, 120, 200])).unwrap()
    }

    #[test]
    fn untrained_network_scores_a_single_finite_logit() {
        let scorer = TorchScorer::untrained(Device::Cpu).unwrap();
        let logit = scorer.score(&sample_input()).unwrap();
        assert!(logit.is_finite());
    }

    #[test]
    fn scoring_is_repeatable() {
        let scorer = TorchScorer::untrained(Device::Cpu).unwrap();
        let input = sample_input();
        assert_eq!(scorer.score(&input).unwrap(), scorer.score(&input).unwrap());
    }

    #[test]
    fn wrong_input_shape_is_rejected() {
        let scorer = TorchScorer::untrained(Device::Cpu).unwrap();
        let err = scorer.score(&Tensor3D::zeros((3, 32, 32))).unwrap_err();
        assert!(matches!(err, InferenceError::ShapeMismatch { .. }));
    }

    #[test]
    fn torchscript_export_replaces_the_untrained_network() {
        let path = mean_logit_model();
        let mut scorer = TorchScorer::untrained(Device::Cpu).unwrap();
        scorer.load_weights(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let input = sample_input();
        let expected = input.mean().unwrap() * 4.0;
        let logit = scorer.score(&input).unwrap();
        assert!((logit - expected).abs() < 1e-4, "{logit} vs {expected}");
    }

    #[test]
    fn module_with_two_outputs_is_not_swapped_in() {
        let path = scripted_model(|x| x.mean(Kind::Float).view([1, 1]).repeat([1, 2]));
        let mut scorer = TorchScorer::untrained(Device::Cpu).unwrap();
        let input = sample_input();
        let before = scorer.score(&input).unwrap();

        let err = scorer.load_weights(&path).unwrap_err();
        std::fs::remove_file(&path).ok();

        assert!(
            matches!(err, WeightsError::Incompatible(InferenceError::UnexpectedOutput(2))),
            "{err}"
        );
        assert_eq!(before, scorer.score(&input).unwrap());
    }

    #[test]
    fn corrupt_model_file_is_rejected() {
        let path = scratch_file("pt");
        std::fs::write(&path, b"not a torchscript archive").unwrap();
        let mut scorer = TorchScorer::untrained(Device::Cpu).unwrap();
        let result = scorer.load_weights(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(WeightsError::Archive(_))));
    }

    #[test]
    fn missing_model_file_is_an_io_error() {
        let mut scorer = TorchScorer::untrained(Device::Cpu).unwrap();
        let err = scorer.load_weights(&scratch_file("pt")).unwrap_err();
        assert!(
            matches!(&err, WeightsError::Io(e) if e.kind() == std::io::ErrorKind::NotFound),
            "{err}"
        );
    }

    #[test]
    fn handle_rejects_non_finite_logits_from_any_scorer() {
        let input = sample_input();
        for logit in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let handle = ModelHandle::new(Box::new(FixedScorer(logit)));
            let err = handle.score(&input).unwrap_err();
            assert!(matches!(err, InferenceError::NonFiniteScore(_)), "{logit}: {err}");
        }
        let handle = ModelHandle::new(Box::new(FixedScorer(-88.0)));
        assert_eq!(handle.score(&input).unwrap(), -88.0);
    }

    #[test]
    fn handle_records_lifecycle() {
        let mut handle = ModelHandle::new(Box::new(FixedScorer(0.0)));
        assert_eq!(handle.state(), ModelState::Unloaded);
        assert!(!handle.is_loaded());

        handle.mark_load_failed("s3://bucket/key".into(), "boom".into());
        let status = handle.status();
        assert_eq!(status.state, ModelState::LoadFailed);
        assert_eq!(status.error.as_deref(), Some("boom"));

        let path = scratch_file("bin");
        handle
            .load_weights(&path, "s3://bucket/key".into(), "abc".into())
            .unwrap();
        let status = handle.status();
        assert!(handle.is_loaded());
        assert_eq!(status.sha256.as_deref(), Some("abc"));
        assert!(status.loaded_at.is_some());
        assert!(status.error.is_none());
    }
}
