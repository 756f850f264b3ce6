//! Adapters layer: Concrete implementations of ports.
//!
//! These modules contain the actual integration with external libraries:
//! - `tract`: tract-onnx for model inference
//! - `sqlite`: SQLite (r2d2 pool) for patient records
//! - `sanitize`: PII filtering for logs

pub mod sanitize;
pub mod sqlite;
pub mod tract;

// Re-exports for lib.rs
pub use sqlite::{SqliteStore, StorageError};
pub use tract::OnnxClassifier;
