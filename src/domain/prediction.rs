//! Prediction ranking and the disease display table.
//!
//! Turns the classifier's raw probability vector into the ranked,
//! confidence-annotated result returned to clinicians.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::artifact::PreprocessArtifact;

/// Number of ranked entries returned.
pub const TOP_K: usize = 3;

/// Below this top-1 probability the prediction is flagged uncertain.
pub const MIN_CONFIDENCE: f64 = 0.60;

/// Below this top-1/top-2 gap the prediction is flagged uncertain.
pub const MIN_MARGIN: f64 = 0.10;

/// Absorbs binary representation error so that a gap of exactly 0.10
/// (e.g. 0.7 - 0.6 in f64) is not flagged.
const BOUNDARY_TOLERANCE: f64 = 1e-9;

/// Maximum deviation of the probability sum from 1.
const SUM_TOLERANCE: f64 = 1e-3;

/// Display names for the classifier's disease codes.
const DISEASE_NAMES: [(&str, &str); 4] = [
    ("MEL", "Melanoma"),
    ("NV", "Melanocytic nevus"),
    ("BCC", "Basal cell carcinoma"),
    ("BKL", "Benign keratosis-like lesion"),
];

/// Codes considered malignant for history display.
const MALIGNANT_CODES: [&str; 2] = ["MEL", "BCC"];

/// Error type for ranking. Every variant is a server-side fault: the model
/// or artifact produced something the service cannot interpret.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RankError {
    #[error("Model returned no probabilities")]
    Empty,

    #[error("Model returned {got} probabilities but the artifact maps {expected} classes")]
    CardinalityMismatch { expected: usize, got: usize },

    #[error("Probability at index {index} is invalid: {value}")]
    InvalidProbability { index: usize, value: f64 },

    #[error("Probabilities sum to {0}, expected 1")]
    NotNormalized(f64),
}

/// Human-readable name for a disease code; unknown codes display as-is.
#[must_use]
pub fn disease_name(code: &str) -> &str {
    DISEASE_NAMES
        .iter()
        .find(|(c, _)| *c == code)
        .map_or(code, |(_, name)| *name)
}

/// `"Name (CODE)"` display string.
#[must_use]
pub fn disease_full_name(code: &str) -> String {
    format!("{} ({code})", disease_name(code))
}

#[must_use]
pub fn is_malignant(code: &str) -> bool {
    MALIGNANT_CODES.contains(&code)
}

/// One ranked class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedClass {
    /// Disease code (e.g. "MEL")
    pub disease: String,
    /// "Melanoma (MEL)"
    pub disease_full: String,
    pub probability: f64,
}

/// Ranked, confidence-annotated prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Human name of the top class
    pub prediction: String,
    /// "Name (CODE)" of the top class
    pub prediction_full: String,
    /// Top-1 probability
    pub confidence: f64,
    /// At most [`TOP_K`] entries, descending by probability
    pub top_predictions: Vec<RankedClass>,
    /// Every class code with its probability
    pub all_probabilities: BTreeMap<String, f64>,
    pub uncertain: bool,
    pub inference_time_ms: f64,
}

impl PredictionResult {
    /// Code of the top class.
    #[must_use]
    pub fn top_code(&self) -> &str {
        self.top_predictions
            .first()
            .map_or("", |entry| entry.disease.as_str())
    }
}

/// Uncertainty heuristic: low top-1 confidence or a narrow top-1/top-2 margin.
/// Both comparisons are strict.
#[must_use]
pub fn is_uncertain(top1: f64, top2: f64) -> bool {
    top1 < MIN_CONFIDENCE - BOUNDARY_TOLERANCE || (top1 - top2) < MIN_MARGIN - BOUNDARY_TOLERANCE
}

/// Class indices ordered by descending probability, ties by ascending index.
fn rank_order(probabilities: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..probabilities.len()).collect();
    order.sort_by(|&a, &b| {
        probabilities[b]
            .total_cmp(&probabilities[a])
            .then_with(|| a.cmp(&b))
    });
    order
}

/// Rank a probability vector against the artifact's class mapping.
///
/// `inference_time_ms` is left at zero; the caller stamps it once the whole
/// pipeline has finished.
///
/// # Errors
/// Returns `RankError` if the vector is empty, does not match the class
/// count, contains values outside `[0, 1]`, or does not sum to 1.
pub fn rank_predictions(
    probabilities: &[f64],
    artifact: &PreprocessArtifact,
) -> Result<PredictionResult, RankError> {
    if probabilities.is_empty() {
        return Err(RankError::Empty);
    }
    if probabilities.len() != artifact.num_classes() {
        return Err(RankError::CardinalityMismatch {
            expected: artifact.num_classes(),
            got: probabilities.len(),
        });
    }
    if let Some((index, &value)) = probabilities
        .iter()
        .enumerate()
        .find(|(_, p)| !p.is_finite() || **p < 0.0 || **p > 1.0)
    {
        return Err(RankError::InvalidProbability { index, value });
    }
    let sum: f64 = probabilities.iter().sum();
    if (sum - 1.0).abs() > SUM_TOLERANCE {
        return Err(RankError::NotNormalized(sum));
    }

    let code_of = |i: usize| {
        artifact
            .class_code(i)
            .map_or_else(|| i.to_string(), str::to_string)
    };

    let order = rank_order(probabilities);

    let top_predictions: Vec<RankedClass> = order
        .iter()
        .take(TOP_K)
        .map(|&i| {
            let code = code_of(i);
            RankedClass {
                disease_full: disease_full_name(&code),
                disease: code,
                probability: probabilities[i],
            }
        })
        .collect();

    let all_probabilities: BTreeMap<String, f64> = probabilities
        .iter()
        .enumerate()
        .map(|(i, &p)| (code_of(i), p))
        .collect();

    let top1 = probabilities[order[0]];
    let top2 = order.get(1).map_or(0.0, |&i| probabilities[i]);

    let top_code = code_of(order[0]);
    Ok(PredictionResult {
        prediction: disease_name(&top_code).to_string(),
        prediction_full: disease_full_name(&top_code),
        confidence: top1,
        top_predictions,
        all_probabilities,
        uncertain: is_uncertain(top1, top2),
        inference_time_ms: 0.0,
    })
}
