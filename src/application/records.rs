//! Records service: patient history, search, saving analyses and login.
//!
//! Shapes the store's records into the views the frontend renders. All
//! methods block on the database (and, for login, on Argon2), so async
//! callers run them on the blocking pool.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::password::{verify_dummy, verify_password};
use crate::domain::prediction::{disease_name, is_malignant};
use crate::domain::{HistoryRecord, NewPatient, PatientRecord, PatientSummary, RankedDiagnosis};
use crate::ports::RecordStore;
use crate::LesionError;

/// Maximum hits returned by patient search.
pub const SEARCH_LIMIT: usize = 10;

const MAX_CODE_LEN: usize = 16;

/// One ranked disease as submitted by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisInput {
    /// Disease code (e.g. "MEL")
    pub disease: String,
    /// Probability as a fraction in [0, 1]
    pub probability: f64,
}

/// Body of `POST /api/save-analysis`.
///
/// Probabilities are fractions in `[0, 1]`, as `/predict` reports them, not
/// percentages. `0.7` saves as 70%; `70.0` is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveAnalysisRequest {
    pub patient_name: String,
    pub age: i64,
    pub ci: String,
    #[serde(default)]
    pub complement: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub sex: String,
    pub site: String,
    pub user_id: i64,
    /// Exactly three entries, best first
    pub top3: Vec<DiagnosisInput>,
}

impl SaveAnalysisRequest {
    /// Validate and split into the normalized patient and ranked entries.
    ///
    /// # Errors
    /// Returns `LesionError::Validation` listing every problem found.
    pub fn into_parts(self) -> Result<(NewPatient, [RankedDiagnosis; 3]), LesionError> {
        let patient = NewPatient {
            ci: self.ci,
            complement: self.complement,
            name: self.patient_name,
            age: self.age,
            sex: self.sex,
            site: self.site,
            phone: self.phone,
        }
        .normalized();

        let mut errors = patient.validate().err().unwrap_or_default();

        if self.top3.len() != 3 {
            errors.push(format!("top3 must have exactly 3 entries, got {}", self.top3.len()));
        }
        for (i, entry) in self.top3.iter().enumerate() {
            let code = entry.disease.trim();
            if code.is_empty()
                || code.len() > MAX_CODE_LEN
                || !code.chars().all(|c| c.is_ascii_alphanumeric())
            {
                errors.push(format!("top3[{i}] has an invalid disease code"));
            }
            if !entry.probability.is_finite() || !(0.0..=1.0).contains(&entry.probability) {
                errors.push(format!("top3[{i}] probability must be within [0, 1]"));
            }
        }
        if self.user_id <= 0 {
            errors.push("user_id must be positive".to_string());
        }

        if !errors.is_empty() {
            return Err(LesionError::Validation(errors.join("; ")));
        }

        let ranked: Vec<RankedDiagnosis> = self
            .top3
            .into_iter()
            .map(|e| RankedDiagnosis::new(e.disease.trim().to_uppercase(), e.probability))
            .collect();
        let top3: [RankedDiagnosis; 3] = ranked
            .try_into()
            .map_err(|_| LesionError::Validation("top3 must have exactly 3 entries".into()))?;

        Ok((patient, top3))
    }
}

/// History entry as displayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisView {
    pub disease: String,
    pub name: String,
    pub probability: f64,
    /// "malignant" or "benign"
    pub status: String,
}

impl From<&RankedDiagnosis> for DiagnosisView {
    fn from(d: &RankedDiagnosis) -> Self {
        Self {
            disease: d.code.clone(),
            name: disease_name(&d.code).to_string(),
            probability: d.probability,
            status: if is_malignant(&d.code) { "malignant" } else { "benign" }.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntryView {
    pub id: i64,
    /// `YYYY-MM-DD` (UTC)
    pub date: String,
    /// `HH:MM` (UTC)
    pub time: String,
    pub age: i64,
    pub site: String,
    pub user: String,
    pub top3: Vec<DiagnosisView>,
}

impl From<&HistoryRecord> for HistoryEntryView {
    fn from(r: &HistoryRecord) -> Self {
        Self {
            id: r.id,
            date: r.recorded_at.format("%Y-%m-%d").to_string(),
            time: r.recorded_at.format("%H:%M").to_string(),
            age: r.age,
            site: r.site.clone(),
            user: r.username.clone(),
            top3: r.top3.iter().map(DiagnosisView::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientView {
    pub id: i64,
    pub name: String,
    pub age: i64,
    pub ci: String,
    pub complement: Option<String>,
    pub phone: Option<String>,
    pub sex: String,
}

impl From<PatientRecord> for PatientView {
    fn from(p: PatientRecord) -> Self {
        Self {
            id: p.id,
            name: p.name,
            age: p.age,
            ci: p.ci,
            complement: p.complement,
            phone: p.phone,
            sex: p.sex,
        }
    }
}

/// Response of `GET /api/patient-history/:ci`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientHistoryView {
    pub success: bool,
    pub patient: Option<PatientView>,
    pub history: Vec<HistoryEntryView>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedIds {
    pub patient_id: i64,
    pub history_id: i64,
}

/// Response of `POST /api/save-analysis`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveAnalysisResponse {
    pub success: bool,
    pub message: String,
    pub data: SavedIds,
    pub history: Vec<HistoryEntryView>,
}

/// A user who passed password verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: i64,
    pub username: String,
}

fn history_message(count: usize) -> String {
    if count == 0 {
        "This patient has no previous history".to_string()
    } else {
        format!("Found {count} previous analyses")
    }
}

/// Service over the record store.
pub struct RecordsService<S>
where
    S: RecordStore,
{
    store: Arc<S>,
}

impl<S> Clone for RecordsService<S>
where
    S: RecordStore,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> RecordsService<S>
where
    S: RecordStore,
    LesionError: From<S::Error>,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Upsert the patient and append a history entry atomically.
    ///
    /// # Errors
    /// Validation errors for bad input; storage errors otherwise. Nothing is
    /// written unless every step succeeds.
    pub fn save_analysis(
        &self,
        request: SaveAnalysisRequest,
    ) -> Result<SaveAnalysisResponse, LesionError> {
        let user_id = request.user_id;
        let (patient, top3) = request.into_parts()?;

        let saved = self.store.record_analysis(&patient, user_id, &top3)?;
        tracing::info!(
            "Saved analysis: patient_id={}, history_id={}, entries={}",
            saved.patient_id,
            saved.history_id,
            saved.history.len()
        );

        Ok(SaveAnalysisResponse {
            success: true,
            message: "Analysis saved".to_string(),
            data: SavedIds {
                patient_id: saved.patient_id,
                history_id: saved.history_id,
            },
            history: saved.history.iter().map(HistoryEntryView::from).collect(),
        })
    }

    /// Patient and history by identity number. An unknown patient is not an
    /// error: the view carries `patient: None`.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    pub fn patient_history(&self, ci: &str) -> Result<PatientHistoryView, LesionError> {
        let Some(patient) = self.store.find_patient(ci.trim())? else {
            return Ok(PatientHistoryView {
                success: true,
                patient: None,
                history: Vec::new(),
                message: history_message(0),
            });
        };

        let history: Vec<HistoryEntryView> = self
            .store
            .history_for_patient(patient.id)?
            .iter()
            .map(HistoryEntryView::from)
            .collect();
        tracing::debug!("Patient history retrieved: {} records", history.len());

        Ok(PatientHistoryView {
            success: true,
            message: history_message(history.len()),
            patient: Some(patient.into()),
            history,
        })
    }

    /// Up to [`SEARCH_LIMIT`] patients analysed by `user_id` whose identity
    /// number contains `ci_fragment`.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    pub fn search_patients(
        &self,
        ci_fragment: &str,
        user_id: i64,
    ) -> Result<Vec<PatientSummary>, LesionError> {
        let hits = self
            .store
            .search_patients(ci_fragment.trim(), user_id, SEARCH_LIMIT)?;
        tracing::debug!("Patient search: user_id={}, results={}", user_id, hits.len());
        Ok(hits)
    }

    /// Verify credentials against the stored Argon2id hash.
    ///
    /// Unknown users still pay for one hash verification.
    ///
    /// # Errors
    /// Returns `LesionError::Unauthorized` for unknown users or wrong
    /// passwords.
    pub fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AuthenticatedUser, LesionError> {
        let Some(user) = self.store.find_user(username)? else {
            verify_dummy(password);
            tracing::info!("Login rejected: unknown user");
            return Err(LesionError::Unauthorized);
        };

        if !verify_password(password, &user.password_hash)? {
            tracing::info!("Login rejected for user_id={}", user.id);
            return Err(LesionError::Unauthorized);
        }

        tracing::info!("Login accepted for user_id={}", user.id);
        Ok(AuthenticatedUser {
            id: user.id,
            username: user.username,
        })
    }
}
