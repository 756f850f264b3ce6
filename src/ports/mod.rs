//! Ports layer: Trait definitions for external operations.
//!
//! Following Hexagonal Architecture, these traits define the boundaries
//! between the application and external systems (model runtime, database).

mod classifier;
mod records;

pub use classifier::{ClassifierError, LesionClassifier};
pub use records::{RecordStore, SavedAnalysis};
