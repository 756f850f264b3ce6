//! Classifier port: Trait for the pre-trained lesion model.
//!
//! This trait abstracts the inference runtime (tract/ONNX) from the
//! application logic so tests can substitute a fixed stub.

use crate::domain::{EncodedMetadata, ImageTensor};

/// Errors raised by a classifier implementation. All of them are
/// server-side faults.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Model not found: {0}")]
    NotFound(String),

    #[error("Model failed to load: {0}")]
    Load(String),

    #[error("Model integrity check failed: {0}")]
    Integrity(String),

    #[error("Input does not match model signature: {0}")]
    InputMismatch(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

/// Trait for multimodal lesion classifiers.
///
/// Implementations must be safe for concurrent read-only invocation.
pub trait LesionClassifier: Send + Sync {
    /// Run one forward pass.
    ///
    /// # Arguments
    /// * `image` - Preprocessed image tensor (NHWC, RGB, `[0, 1]`)
    /// * `metadata` - Encoded age/sex/site features
    ///
    /// # Returns
    /// One probability per class, in class-index order.
    ///
    /// # Errors
    /// Returns `ClassifierError` if the input does not fit the model or the
    /// runtime fails.
    fn predict(
        &self,
        image: &ImageTensor,
        metadata: &EncodedMetadata,
    ) -> Result<Vec<f64>, ClassifierError>;

    /// Short description of the loaded model (file name, runtime).
    fn describe(&self) -> String;
}
