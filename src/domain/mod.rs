//! Domain layer: Core business types and logic.
//!
//! Artifact vocabularies, metadata encoding, prediction ranking and the
//! record types shared with the store. Nothing here performs I/O except
//! artifact loading from disk.

pub mod artifact;
pub mod metadata;
mod patient;
pub mod password;
pub mod prediction;
mod tensor;

pub use artifact::{AgeNormalization, ArtifactError, PreprocessArtifact};
pub use metadata::{encode_metadata, EncodeError, EncodedMetadata, PatientMetadata};
pub use patient::{
    format_ci, HistoryRecord, NewPatient, PatientRecord, PatientSummary, RankedDiagnosis, User,
};
pub use prediction::{rank_predictions, PredictionResult, RankError, RankedClass};
pub use tensor::ImageTensor;
