//! Inference service: Orchestrates one prediction request.
//!
//! This service coordinates:
//! - Metadata encoding
//! - Image preprocessing
//! - Model invocation
//! - Ranking and uncertainty flagging

use std::sync::Arc;
use std::time::Instant;

use super::preprocess::{preprocess_image, ImageLimits};
use crate::domain::{
    encode_metadata, rank_predictions, PatientMetadata, PredictionResult, PreprocessArtifact,
};
use crate::ports::LesionClassifier;
use crate::LesionError;

/// Service for running the multimodal prediction pipeline.
///
/// Holds only immutable, shared state; a single instance serves concurrent
/// requests.
pub struct InferenceService<C>
where
    C: LesionClassifier + ?Sized,
{
    classifier: Arc<C>,
    artifact: Arc<PreprocessArtifact>,
    limits: ImageLimits,
}

impl<C> InferenceService<C>
where
    C: LesionClassifier + ?Sized,
{
    /// Create a new inference service.
    pub fn new(classifier: Arc<C>, artifact: Arc<PreprocessArtifact>, limits: ImageLimits) -> Self {
        Self {
            classifier,
            artifact,
            limits,
        }
    }

    /// Run the full pipeline for one upload.
    ///
    /// Blocking: decoding and the forward pass are CPU-bound, so async
    /// callers go through the api worker.
    ///
    /// # Errors
    /// Client errors for bad metadata or an undecodable image; server errors
    /// for classifier or ranking failures.
    pub fn predict(
        &self,
        image_bytes: &[u8],
        metadata: &PatientMetadata,
    ) -> Result<PredictionResult, LesionError> {
        let started = Instant::now();

        let encoded = encode_metadata(metadata, &self.artifact)?;
        if encoded.sex_fallback {
            tracing::warn!(
                "Unrecognised sex {:?}; using fallback encoding",
                metadata.sex
            );
        }
        if encoded.site_fallback {
            tracing::warn!(
                "Unrecognised anatomic site {:?}; using '{}' bucket",
                metadata.site,
                self.artifact.unknown_site
            );
        }

        let tensor = preprocess_image(image_bytes, self.artifact.target_size(), &self.limits)?;
        tracing::debug!("Preprocessed image to {:?}", tensor.shape());

        let probabilities = self.classifier.predict(&tensor, &encoded)?;
        let mut result = rank_predictions(&probabilities, &self.artifact)?;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        result.inference_time_ms = (elapsed_ms * 10.0).round() / 10.0;

        tracing::info!(
            "Prediction complete: top={}, confidence={:.3}, uncertain={}, {:.1}ms",
            result.top_code(),
            result.confidence,
            result.uncertain,
            result.inference_time_ms
        );

        Ok(result)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;
    use std::sync::Mutex;

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

    use super::*;
    use crate::domain::artifact::tests::sample_artifact;
    use crate::domain::{EncodedMetadata, ImageTensor};
    use crate::ports::ClassifierError;

    /// Classifier returning a fixed vector and recording what it was given.
    pub(crate) struct StubClassifier {
        pub output: Result<Vec<f64>, String>,
        pub seen: Mutex<Vec<(Vec<usize>, EncodedMetadata)>>,
    }

    impl StubClassifier {
        pub(crate) fn returning(output: Vec<f64>) -> Self {
            Self {
                output: Ok(output),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing(message: &str) -> Self {
            Self {
                output: Err(message.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl LesionClassifier for StubClassifier {
        fn predict(
            &self,
            image: &ImageTensor,
            metadata: &EncodedMetadata,
        ) -> Result<Vec<f64>, ClassifierError> {
            self.seen
                .lock()
                .expect("Lock")
                .push((image.shape().to_vec(), metadata.clone()));
            self.output.clone().map_err(ClassifierError::Inference)
        }

        fn describe(&self) -> String {
            "stub".to_string()
        }
    }

    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([180, 120, 90]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .expect("Should encode");
        out.into_inner()
    }

    fn service(stub: StubClassifier) -> (InferenceService<StubClassifier>, Arc<StubClassifier>) {
        let stub = Arc::new(stub);
        let service = InferenceService::new(
            Arc::clone(&stub),
            Arc::new(sample_artifact()),
            ImageLimits::default(),
        );
        (service, stub)
    }

    #[test]
    fn test_melanoma_scenario() {
        let (service, stub) = service(StubClassifier::returning(vec![0.7, 0.2, 0.05, 0.05]));
        let metadata = PatientMetadata::new(70, "male", "head/neck");

        let result = service
            .predict(&png_bytes(64, 48), &metadata)
            .expect("Should predict");

        assert_eq!(result.prediction, "Melanoma");
        assert_eq!(result.prediction_full, "Melanoma (MEL)");
        assert!((result.confidence - 0.7).abs() < 1e-12);
        assert!(!result.uncertain);
        assert!(result.inference_time_ms >= 0.0);

        let seen = stub.seen.lock().expect("Lock");
        let (shape, encoded) = &seen[0];
        assert_eq!(shape, &vec![1, 224, 224, 3]);
        assert_eq!(encoded.sex_ohe, vec![0.0, 1.0, 0.0]);
        assert!(!encoded.site_fallback);
    }

    #[test]
    fn test_unknown_site_reaches_model_as_fallback() {
        let (service, stub) = service(StubClassifier::returning(vec![0.25, 0.25, 0.25, 0.25]));
        let metadata = PatientMetadata::new(40, "?", "elbow");

        let result = service
            .predict(&png_bytes(8, 8), &metadata)
            .expect("Should predict");
        assert!(result.uncertain);

        let seen = stub.seen.lock().expect("Lock");
        assert!(seen[0].1.site_fallback);
        assert!(seen[0].1.sex_fallback);
    }

    #[test]
    fn test_bad_age_is_client_error_before_decoding() {
        let (service, stub) = service(StubClassifier::returning(vec![1.0, 0.0, 0.0, 0.0]));
        let err = service
            .predict(b"garbage", &PatientMetadata::new(130, "male", "torso"))
            .expect_err("Should fail");
        assert!(err.is_client_error());
        assert!(stub.seen.lock().expect("Lock").is_empty());
    }

    #[test]
    fn test_corrupt_image_is_client_error() {
        let (service, _) = service(StubClassifier::returning(vec![1.0, 0.0, 0.0, 0.0]));
        let err = service
            .predict(b"\x89PNG\r\n\x1a\nbroken", &PatientMetadata::new(30, "f", "torso"))
            .expect_err("Should fail");
        assert!(matches!(err, LesionError::Preprocess(_)));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_model_failure_is_server_error() {
        let (service, _) = service(StubClassifier::failing("boom"));
        let err = service
            .predict(&png_bytes(4, 4), &PatientMetadata::new(30, "f", "torso"))
            .expect_err("Should fail");
        assert!(matches!(err, LesionError::Classifier(_)));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_wrong_cardinality_is_server_error() {
        let (service, _) = service(StubClassifier::returning(vec![0.5, 0.5]));
        let err = service
            .predict(&png_bytes(4, 4), &PatientMetadata::new(30, "f", "torso"))
            .expect_err("Should fail");
        assert!(matches!(err, LesionError::Rank(_)));
        assert!(!err.is_client_error());
    }
}
