//! Preprocessing artifact produced at model-training time.
//!
//! Bundles the image size, categorical vocabularies, age normalization and
//! the class index mapping the classifier was trained with. Loaded once at
//! startup and shared read-only afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Largest image side accepted in `img_size`.
const MAX_IMG_SIDE: u32 = 4096;

/// Error type for artifact loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Failed to read artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid artifact format: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Invalid artifact: {0}")]
    Invalid(String),
}

/// Age normalization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AgeNormalization {
    /// `(age - mean) / std`
    ZScore { mean: f64, std: f64 },
    /// `(age - min) / (max - min)`
    MinMax { min: f64, max: f64 },
}

impl AgeNormalization {
    /// Apply the normalization to an age in years.
    #[must_use]
    pub fn apply(&self, age: f64) -> f64 {
        match *self {
            Self::ZScore { mean, std } => (age - mean) / std,
            Self::MinMax { min, max } => (age - min) / (max - min),
        }
    }

    fn validate(&self) -> Result<(), ArtifactError> {
        match *self {
            Self::ZScore { mean, std } => {
                if !mean.is_finite() || !std.is_finite() || std <= 0.0 {
                    return Err(ArtifactError::Invalid(format!(
                        "zscore age normalization needs finite mean and std > 0, got mean={mean}, std={std}"
                    )));
                }
            }
            Self::MinMax { min, max } => {
                if !min.is_finite() || !max.is_finite() || max <= min {
                    return Err(ArtifactError::Invalid(format!(
                        "minmax age normalization needs finite min < max, got min={min}, max={max}"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn default_unknown_site() -> String {
    "unknown".to_string()
}

/// Static preprocessing configuration exported alongside the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessArtifact {
    /// Target image size as `[width, height]`.
    pub img_size: [u32; 2],

    /// Ordered one-hot vocabulary for sex.
    pub sex_categories: Vec<String>,

    /// Anatomic site to embedding index.
    pub site2idx: BTreeMap<String, i64>,

    /// Key in `site2idx` used for sites the model has never seen.
    #[serde(default = "default_unknown_site")]
    pub unknown_site: String,

    pub age_normalization: AgeNormalization,

    /// Class index (decimal string, as exported from JSON) to disease code.
    pub idx2class: BTreeMap<String, String>,
}

impl PreprocessArtifact {
    /// Load and validate an artifact from a JSON file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or fails validation.
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let content = std::fs::read_to_string(path)?;
        let artifact = Self::from_json(&content)?;
        tracing::info!(
            "Loaded preprocessing artifact from {:?} (img_size={:?}, classes={}, sites={})",
            path,
            artifact.img_size,
            artifact.num_classes(),
            artifact.site2idx.len()
        );
        Ok(artifact)
    }

    /// Parse and validate an artifact from a JSON string.
    ///
    /// # Errors
    /// Returns error if parsing or validation fails.
    pub fn from_json(content: &str) -> Result<Self, ArtifactError> {
        let artifact: Self = serde_json::from_str(content)?;
        artifact.validate()?;
        Ok(artifact)
    }

    /// Check internal consistency.
    ///
    /// # Errors
    /// Returns `ArtifactError::Invalid` describing the first problem found.
    pub fn validate(&self) -> Result<(), ArtifactError> {
        let [w, h] = self.img_size;
        if w == 0 || h == 0 || w > MAX_IMG_SIDE || h > MAX_IMG_SIDE {
            return Err(ArtifactError::Invalid(format!(
                "img_size {w}x{h} out of range [1, {MAX_IMG_SIDE}]"
            )));
        }

        if self.sex_categories.is_empty() {
            return Err(ArtifactError::Invalid("sex_categories is empty".into()));
        }

        if !self.site2idx.contains_key(&self.unknown_site) {
            return Err(ArtifactError::Invalid(format!(
                "site2idx has no fallback entry '{}'",
                self.unknown_site
            )));
        }
        if let Some((site, idx)) = self.site2idx.iter().find(|&(_, &idx)| idx < 0) {
            return Err(ArtifactError::Invalid(format!(
                "site '{site}' has negative index {idx}"
            )));
        }

        self.age_normalization.validate()?;

        // Class indices must be exactly 0..n so that they line up with the
        // model's output vector.
        let n = self.idx2class.len();
        if n == 0 {
            return Err(ArtifactError::Invalid("idx2class is empty".into()));
        }
        for i in 0..n {
            match self.idx2class.get(&i.to_string()) {
                Some(code) if !code.trim().is_empty() => {}
                Some(_) => {
                    return Err(ArtifactError::Invalid(format!(
                        "idx2class entry {i} has an empty code"
                    )))
                }
                None => {
                    return Err(ArtifactError::Invalid(format!(
                        "idx2class must cover indices 0..{n}, missing {i}"
                    )))
                }
            }
        }

        // Each probability index is reported under its code, so codes must be distinct.
        let mut seen = BTreeSet::new();
        for (index, code) in &self.idx2class {
            if !seen.insert(code.trim()) {
                return Err(ArtifactError::Invalid(format!(
                    "idx2class maps code '{}' to more than one index (again at {index})",
                    code.trim()
                )));
            }
        }

        Ok(())
    }

    /// Target `(width, height)` for the image preprocessor.
    #[must_use]
    pub fn target_size(&self) -> (u32, u32) {
        (self.img_size[0], self.img_size[1])
    }

    /// Number of classes the model outputs.
    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.idx2class.len()
    }

    /// Disease code for a class index, if mapped.
    #[must_use]
    pub fn class_code(&self, index: usize) -> Option<&str> {
        self.idx2class.get(&index.to_string()).map(String::as_str)
    }

    /// Class codes ordered by class index.
    #[must_use]
    pub fn class_codes(&self) -> Vec<String> {
        (0..self.num_classes())
            .filter_map(|i| self.class_code(i).map(str::to_string))
            .collect()
    }

    /// Known anatomic sites, excluding the fallback bucket, ordered by index.
    #[must_use]
    pub fn known_sites(&self) -> Vec<String> {
        let mut sites: Vec<(&String, &i64)> = self
            .site2idx
            .iter()
            .filter(|(site, _)| **site != self.unknown_site)
            .collect();
        sites.sort_by_key(|(site, idx)| (**idx, (*site).clone()));
        sites.into_iter().map(|(site, _)| site.clone()).collect()
    }
}
