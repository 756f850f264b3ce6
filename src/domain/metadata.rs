//! Patient metadata encoding for the multimodal classifier.
//!
//! Maps free-text age/sex/site input onto the numeric features the model was
//! trained with, using the vocabularies from the preprocessing artifact.

use serde::{Deserialize, Serialize};

use super::artifact::PreprocessArtifact;

/// Accepted age range in years (inclusive).
pub const AGE_RANGE: std::ops::RangeInclusive<i64> = 0..=120;

/// Sex category used when the input is not recognised.
const UNKNOWN_SEX: &str = "unknown";

/// Error type for metadata encoding.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodeError {
    #[error("Age {0} out of range [0, 120]")]
    AgeOutOfRange(i64),
}

/// Raw metadata as submitted with a prediction request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientMetadata {
    /// Age in years
    pub age: i64,
    /// Free-text sex ("male", "F", "Femenino", ...)
    pub sex: String,
    /// Free-text anatomic site ("head/neck", "Lower Extremity", ...)
    pub site: String,
}

impl PatientMetadata {
    #[must_use]
    pub fn new(age: i64, sex: impl Into<String>, site: impl Into<String>) -> Self {
        Self {
            age,
            sex: sex.into(),
            site: site.into(),
        }
    }
}

/// Model-ready metadata features.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedMetadata {
    /// Normalized age scalar
    pub age_norm: f32,
    /// One-hot sex vector, length = `sex_categories.len()`
    pub sex_ohe: Vec<f32>,
    /// Anatomic site embedding index
    pub site_idx: i64,
    /// Sex input was not recognised and the fallback was used
    pub sex_fallback: bool,
    /// Site input was not recognised and the fallback bucket was used
    pub site_fallback: bool,
}

/// Normalize free-text sex input to a canonical category name.
///
/// Known aliases collapse onto `male`/`female`; anything else is returned
/// lower-cased so it can still match a custom artifact vocabulary.
#[must_use]
pub fn canonical_sex(raw: &str) -> String {
    let s = raw.trim().to_lowercase();
    match s.as_str() {
        "m" | "male" | "masculino" | "hombre" => "male".to_string(),
        "f" | "female" | "femenino" | "mujer" => "female".to_string(),
        _ => s,
    }
}

/// Normalize free-text anatomic site input.
///
/// Lower-cases, collapses runs of whitespace and tightens spaces around `/`
/// so that `"Head / Neck"` and `"head/neck"` match.
#[must_use]
pub fn canonical_site(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .replace(" / ", "/")
        .replace("/ ", "/")
        .replace(" /", "/")
}

/// Encode raw metadata into model features.
///
/// Unknown sex maps to the `unknown` category when the artifact defines one,
/// otherwise to the all-zero vector. Unknown sites map to the artifact's
/// `unknown_site` bucket. Neither case fails the request.
///
/// # Errors
/// Returns `EncodeError::AgeOutOfRange` if the age is outside [`AGE_RANGE`].
pub fn encode_metadata(
    meta: &PatientMetadata,
    artifact: &PreprocessArtifact,
) -> Result<EncodedMetadata, EncodeError> {
    if !AGE_RANGE.contains(&meta.age) {
        return Err(EncodeError::AgeOutOfRange(meta.age));
    }

    #[allow(clippy::cast_precision_loss)]
    let age_norm = artifact.age_normalization.apply(meta.age as f64) as f32;

    let (sex_ohe, sex_fallback) = encode_sex(&meta.sex, &artifact.sex_categories);
    let (site_idx, site_fallback) = encode_site(&meta.site, artifact);

    Ok(EncodedMetadata {
        age_norm,
        sex_ohe,
        site_idx,
        sex_fallback,
        site_fallback,
    })
}

fn encode_sex(raw: &str, categories: &[String]) -> (Vec<f32>, bool) {
    let mut ohe = vec![0.0_f32; categories.len()];
    let position = |name: &str| {
        categories
            .iter()
            .position(|c| c.trim().eq_ignore_ascii_case(name))
    };

    let sex = canonical_sex(raw);
    if sex != UNKNOWN_SEX {
        if let Some(i) = position(&sex) {
            ohe[i] = 1.0;
            return (ohe, false);
        }
    }

    if let Some(i) = position(UNKNOWN_SEX) {
        ohe[i] = 1.0;
    }
    (ohe, true)
}

fn encode_site(raw: &str, artifact: &PreprocessArtifact) -> (i64, bool) {
    let site = canonical_site(raw);
    let found = artifact
        .site2idx
        .iter()
        .find(|(key, _)| canonical_site(key) == site)
        .map(|(_, &idx)| idx);

    match found {
        Some(idx) if site != canonical_site(&artifact.unknown_site) => (idx, false),
        _ => {
            // Validated at artifact load; 0 is unreachable in practice.
            let idx = artifact
                .site2idx
                .get(&artifact.unknown_site)
                .copied()
                .unwrap_or(0);
            (idx, true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::artifact::tests::{sample_artifact, SAMPLE_ARTIFACT};

    #[test]
    fn test_encode_known_values() {
        let artifact = sample_artifact();
        let meta = PatientMetadata::new(70, "male", "head/neck");
        let enc = encode_metadata(&meta, &artifact).expect("Should encode");

        assert!((enc.age_norm - 1.0).abs() < 1e-6); // (70 - 50) / 20
        assert_eq!(enc.sex_ohe, vec![0.0, 1.0, 0.0]);
        assert_eq!(enc.site_idx, 1);
        assert!(!enc.sex_fallback);
        assert!(!enc.site_fallback);
    }

    #[test]
    fn test_sex_aliases_and_case() {
        let artifact = sample_artifact();
        for raw in ["F", " Female ", "femenino", "MUJER"] {
            let enc = encode_metadata(&PatientMetadata::new(40, raw, "palms/soles"), &artifact)
                .expect("Should encode");
            assert_eq!(enc.sex_ohe, vec![1.0, 0.0, 0.0], "input {raw:?}");
        }
    }

    #[test]
    fn test_unknown_sex_uses_unknown_category() {
        let artifact = sample_artifact();
        let enc = encode_metadata(&PatientMetadata::new(40, "other", "palms/soles"), &artifact)
            .expect("Should encode");
        assert_eq!(enc.sex_ohe, vec![0.0, 0.0, 1.0]);
        assert!(enc.sex_fallback);
    }

    #[test]
    fn test_unknown_sex_without_category_is_all_zero() {
        let json = SAMPLE_ARTIFACT.replace(
            r#"["female", "male", "unknown"]"#,
            r#"["female", "male"]"#,
        );
        let artifact = PreprocessArtifact::from_json(&json).expect("Should parse");
        let enc = encode_metadata(&PatientMetadata::new(40, "", "palms/soles"), &artifact)
            .expect("Should encode");
        assert_eq!(enc.sex_ohe, vec![0.0, 0.0]);
        assert!(enc.sex_fallback);
    }

    #[test]
    fn test_site_normalization() {
        let artifact = sample_artifact();
        let enc = encode_metadata(&PatientMetadata::new(40, "male", "  Head / Neck "), &artifact)
            .expect("Should encode");
        assert_eq!(enc.site_idx, 1);
        assert!(!enc.site_fallback);
    }

    #[test]
    fn test_unknown_site_falls_back() {
        let artifact = sample_artifact();
        let enc = encode_metadata(&PatientMetadata::new(40, "male", "scalp"), &artifact)
            .expect("Should encode");
        assert_eq!(enc.site_idx, 8);
        assert!(enc.site_fallback);

        let enc = encode_metadata(&PatientMetadata::new(40, "male", "unknown"), &artifact)
            .expect("Should encode");
        assert_eq!(enc.site_idx, 8);
        assert!(enc.site_fallback);
    }

    #[test]
    fn test_age_out_of_range_rejected() {
        let artifact = sample_artifact();
        let err = encode_metadata(&PatientMetadata::new(-1, "male", "head/neck"), &artifact)
            .expect_err("Should reject");
        assert_eq!(err, EncodeError::AgeOutOfRange(-1));
        assert!(encode_metadata(&PatientMetadata::new(121, "male", "head/neck"), &artifact).is_err());
        assert!(encode_metadata(&PatientMetadata::new(120, "male", "head/neck"), &artifact).is_ok());
    }
}
