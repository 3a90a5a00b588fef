use shared::PredictionResult;

/// Fake-probability at or above which an image is reported as fake.
pub const FAKE_THRESHOLD: f64 = 0.5;

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Maps the classifier logit to a verdict.
///
/// The logit scores "real", so `sigmoid(raw_score)` is the probability of an
/// authentic image and its complement the probability of a fake. The returned
/// `confidence` is that fake-probability for both verdicts. A logit of exactly
/// zero is reported as fake.
pub fn decide(raw_score: f32) -> PredictionResult {
    let p_real = sigmoid(f64::from(raw_score));
    let p_fake = 1.0 - p_real;
    PredictionResult {
        is_fake: p_fake >= FAKE_THRESHOLD,
        confidence: p_fake,
    }
}
