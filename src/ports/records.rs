//! Record store port: Trait for patient and history persistence.
//!
//! This trait abstracts the relational backend (SQLite) from the application
//! logic. Every method is one unit of work: it either commits completely or
//! leaves the store untouched.

use crate::domain::{HistoryRecord, NewPatient, PatientRecord, PatientSummary, RankedDiagnosis, User};

/// Outcome of an atomic save-analysis operation.
#[derive(Debug, Clone)]
pub struct SavedAnalysis {
    /// Id of the inserted or updated patient
    pub patient_id: i64,
    /// Id of the appended history entry
    pub history_id: i64,
    /// The patient's full history after the insert, newest first
    pub history: Vec<HistoryRecord>,
}

/// Trait for relational record storage.
pub trait RecordStore: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Look up a patient by identity number.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn find_patient(&self, ci: &str) -> Result<Option<PatientRecord>, Self::Error>;

    /// Patients analysed by `user_id` whose identity number contains
    /// `ci_fragment`, ordered by identity number.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn search_patients(
        &self,
        ci_fragment: &str,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<PatientSummary>, Self::Error>;

    /// History for a patient, newest first.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn history_for_patient(&self, patient_id: i64) -> Result<Vec<HistoryRecord>, Self::Error>;

    /// Upsert the patient (keyed by `ci`), append a history entry and read
    /// back the updated history, all in one transaction.
    ///
    /// # Errors
    /// Returns error if any step fails; nothing is committed in that case.
    fn record_analysis(
        &self,
        patient: &NewPatient,
        user_id: i64,
        top3: &[RankedDiagnosis; 3],
    ) -> Result<SavedAnalysis, Self::Error>;

    /// Look up a user by name (case-insensitive).
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn find_user(&self, username: &str) -> Result<Option<User>, Self::Error>;

    /// Create a user with an already-hashed password.
    ///
    /// # Errors
    /// Returns error if the name is taken or storage fails.
    fn insert_user(&self, username: &str, password_hash: &str) -> Result<i64, Self::Error>;
}
