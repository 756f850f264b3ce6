//! Patient and diagnostic-history records.
//!
//! These types mirror what the relational store keeps. The inference path
//! never writes them; the records service hands validated values to the
//! store.

use serde::{Deserialize, Serialize};

use super::metadata::{canonical_sex, canonical_site, AGE_RANGE};

const MAX_NAME_LEN: usize = 200;
const MAX_CI_LEN: usize = 20;
const MAX_COMPLEMENT_LEN: usize = 5;
const MAX_PHONE_LEN: usize = 30;

/// Patient data as submitted for an upsert (keyed by `ci`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPatient {
    /// National identity number
    pub ci: String,
    /// Optional identity-number complement (e.g. "1A")
    pub complement: Option<String>,
    pub name: String,
    /// Age in years
    pub age: i64,
    /// Canonical sex ("male", "female", "unknown")
    pub sex: String,
    /// Canonical anatomic site of the analysed lesion
    pub site: String,
    pub phone: Option<String>,
}

impl NewPatient {
    /// Trim free text and canonicalize sex and site.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.ci = self.ci.trim().to_string();
        self.complement = normalize_optional(self.complement);
        self.name = self.name.trim().to_string();
        self.phone = normalize_optional(self.phone);
        self.sex = match canonical_sex(&self.sex).as_str() {
            s @ ("male" | "female") => s.to_string(),
            _ => "unknown".to_string(),
        };
        self.site = canonical_site(&self.site);
        self
    }

    /// Validate that all fields are within expected ranges.
    ///
    /// # Errors
    /// Returns validation errors as a vector of strings.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.ci.is_empty() || self.ci.len() > MAX_CI_LEN {
            errors.push(format!("CI must have 1 to {MAX_CI_LEN} characters"));
        } else if !self.ci.chars().all(|c| c.is_ascii_alphanumeric()) {
            errors.push("CI must be alphanumeric".to_string());
        }
        if let Some(complement) = &self.complement {
            if complement.len() > MAX_COMPLEMENT_LEN
                || !complement.chars().all(|c| c.is_ascii_alphanumeric())
            {
                errors.push(format!(
                    "CI complement must be alphanumeric, at most {MAX_COMPLEMENT_LEN} characters"
                ));
            }
        }
        if self.name.is_empty() || self.name.chars().count() > MAX_NAME_LEN {
            errors.push(format!("Name must have 1 to {MAX_NAME_LEN} characters"));
        }
        if !AGE_RANGE.contains(&self.age) {
            errors.push(format!("Age {} out of range [0, 120]", self.age));
        }
        if self.site.is_empty() {
            errors.push("Anatomic site is required".to_string());
        }
        if let Some(phone) = &self.phone {
            if phone.len() > MAX_PHONE_LEN
                || !phone
                    .chars()
                    .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')'))
            {
                errors.push("Phone contains invalid characters".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Stored patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub id: i64,
    pub ci: String,
    pub complement: Option<String>,
    pub name: String,
    pub age: i64,
    pub sex: String,
    pub site: String,
    pub phone: Option<String>,
}

/// Join an identity number and its optional complement.
#[must_use]
pub fn format_ci(ci: &str, complement: Option<&str>) -> String {
    match complement {
        Some(c) if !c.is_empty() => format!("{ci}-{c}"),
        _ => ci.to_string(),
    }
}

/// One ranked disease as stored in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedDiagnosis {
    /// Disease code (e.g. "BCC")
    pub code: String,
    /// Probability in [0, 1]
    pub probability: f64,
}

impl RankedDiagnosis {
    #[must_use]
    pub fn new(code: impl Into<String>, probability: f64) -> Self {
        Self {
            code: code.into(),
            probability,
        }
    }
}

/// Stored history entry, joined with the analysing user's name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
    pub age: i64,
    pub site: String,
    pub username: String,
    pub top3: Vec<RankedDiagnosis>,
}

/// Search hit for patient lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientSummary {
    /// Identity number including complement
    pub ci: String,
    pub name: String,
}

/// Clinician account. The hash is an Argon2id PHC string.
#[derive(Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
}

// The hash stays out of logs.
impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_patient() -> NewPatient {
        NewPatient {
            ci: " 4567123 ".into(),
            complement: Some("".into()),
            name: " Ana Perez ".into(),
            age: 54,
            sex: "Femenino".into(),
            site: "Upper Extremity".into(),
            phone: Some("+591 70000000".into()),
        }
    }

    #[test]
    fn test_normalization() {
        let p = sample_patient().normalized();
        assert_eq!(p.ci, "4567123");
        assert_eq!(p.complement, None);
        assert_eq!(p.name, "Ana Perez");
        assert_eq!(p.sex, "female");
        assert_eq!(p.site, "upper extremity");
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_unrecognised_sex_stored_as_unknown() {
        let mut p = sample_patient();
        p.sex = "x".into();
        assert_eq!(p.normalized().sex, "unknown");
    }

    #[test]
    fn test_validation_collects_errors() {
        let p = NewPatient {
            ci: "12'; DROP".into(),
            complement: None,
            name: String::new(),
            age: 200,
            sex: "male".into(),
            site: String::new(),
            phone: Some("call me".into()),
        };
        let errors = p.validate().expect_err("Should fail");
        assert_eq!(errors.len(), 5);
    }

    #[test]
    fn test_format_ci() {
        assert_eq!(format_ci("123", Some("1A")), "123-1A");
        assert_eq!(format_ci("123", None), "123");
        assert_eq!(format_ci("123", Some("")), "123");
    }

    #[test]
    fn test_user_debug_hides_hash() {
        let user = User {
            id: 1,
            username: "doctor".into(),
            password_hash: "$argon2id$secret".into(),
        };
        assert!(!format!("{user:?}").contains("argon2"));
    }
}
