//! Application layer: Use cases and services.
//!
//! This module orchestrates domain logic with ports to implement
//! the core use cases of the application.

mod inference;
pub mod preprocess;
pub mod records;

pub use inference::InferenceService;
pub use preprocess::{preprocess_image, ImageLimits, PreprocessError};
pub use records::{AuthenticatedUser, RecordsService, SaveAnalysisRequest};

#[cfg(test)]
pub(crate) use inference::tests::{png_bytes, StubClassifier};
