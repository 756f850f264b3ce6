//! # LesionScope
//!
//! Skin-lesion classification service with patient history persistence.
//!
//! This crate provides:
//! - Multimodal inference (image + age/sex/site) over a pre-trained ONNX model
//! - Ranked, confidence-annotated predictions with an uncertainty flag
//! - Patient records and append-only diagnostic history in SQLite
//! - An HTTP API served with axum
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture:
//! - `domain`: Core business types (artifact, metadata encoding, ranking, records)
//! - `ports`: Trait definitions for external operations
//! - `adapters`: Concrete implementations (tract-onnx, SQLite, log sanitizer)
//! - `application`: Use cases orchestrating domain and ports
//! - `api`: HTTP surface

pub mod adapters;
pub mod api;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

pub use domain::{PredictionResult, PreprocessArtifact};

/// Result type for LesionScope operations
pub type Result<T> = std::result::Result<T, LesionError>;

/// Main error type for LesionScope
#[derive(Debug, thiserror::Error)]
pub enum LesionError {
    #[error("Invalid metadata: {0}")]
    Encode(#[from] domain::EncodeError),

    #[error("Invalid image: {0}")]
    Preprocess(#[from] application::PreprocessError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ports::ClassifierError),

    #[error("Ranking failed: {0}")]
    Rank(#[from] domain::RankError),

    #[error("Storage operation failed: {0}")]
    Storage(#[from] adapters::StorageError),

    #[error("Password hashing failed: {0}")]
    Password(#[from] domain::password::PasswordError),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Invalid credentials")]
    Unauthorized,

    #[error("Model not loaded: {0}")]
    ModelNotLoaded(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// How a failure is reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    BadRequest,
    Unauthorized,
    NotFound,
    Conflict,
    Unavailable,
    Internal,
}

impl LesionError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Encode(_) | Self::Preprocess(_) | Self::Validation(_) => ErrorClass::BadRequest,
            Self::Unauthorized => ErrorClass::Unauthorized,
            Self::Storage(adapters::StorageError::NotFound(_)) => ErrorClass::NotFound,
            Self::Storage(adapters::StorageError::Conflict(_)) => ErrorClass::Conflict,
            Self::Unavailable(_) => ErrorClass::Unavailable,
            _ => ErrorClass::Internal,
        }
    }

    /// Whether the caller caused the failure (bad input, unknown referent,
    /// wrong credentials). Everything else is a server fault.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !matches!(self.class(), ErrorClass::Unavailable | ErrorClass::Internal)
    }
}
