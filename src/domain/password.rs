//! Password hashing for clinician accounts.
//!
//! Stored credentials are Argon2id PHC strings; plaintext passwords are never
//! persisted or compared directly.
//!
//! # Security
//!
//! - Argon2id (memory-hard, resistant to GPU/ASIC attacks)
//! - Random salt per hash from the OS CSPRNG
//! - Unknown users are verified against a dummy hash so response time does
//!   not reveal which usernames exist

use std::sync::OnceLock;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use thiserror::Error;

/// Minimum accepted password length for new accounts.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Errors during password hashing/verification.
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("Stored password hash is malformed")]
    MalformedHash,

    #[error("Password must have at least {MIN_PASSWORD_LEN} characters")]
    TooShort,
}

static DUMMY_HASH: OnceLock<String> = OnceLock::new();

fn argon2() -> Result<Argon2<'static>, PasswordError> {
    let params = Params::new(47104, 1, 1, Some(32))
        .map_err(|e| PasswordError::Hashing(format!("Invalid Argon2 params: {e}")))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a password into an Argon2id PHC string.
///
/// # Errors
/// Returns `PasswordError::TooShort` for short passwords, or
/// `PasswordError::Hashing` if Argon2 fails.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(PasswordError::TooShort);
    }
    let salt = SaltString::generate(&mut OsRng);
    let hash = argon2()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::Hashing(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verify a password against a stored PHC string.
///
/// The parameters encoded in the PHC string are used, so hashes created with
/// older parameters keep verifying.
///
/// # Errors
/// Returns `PasswordError::MalformedHash` if the stored hash cannot be parsed.
pub fn verify_password(password: &str, phc: &str) -> Result<bool, PasswordError> {
    let parsed = PasswordHash::new(phc).map_err(|_| PasswordError::MalformedHash)?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::Hashing(e.to_string())),
    }
}

/// Burn the same work as a real verification when the user does not exist.
pub fn verify_dummy(password: &str) {
    let phc = DUMMY_HASH.get_or_init(|| {
        hash_password("dummy-password-never-matches").unwrap_or_default()
    });
    if !phc.is_empty() {
        let _ = verify_password(password, phc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_verify_roundtrip() {
        let phc = hash_password("correct-horse-battery").expect("Hashing should succeed");
        assert!(phc.starts_with("$argon2id$"));
        assert!(verify_password("correct-horse-battery", &phc).expect("Should verify"));
    }

    #[test]
    fn test_wrong_password_fails() {
        let phc = hash_password("correct-horse-battery").expect("Hashing should succeed");
        assert!(!verify_password("wrong-password", &phc).expect("Should verify"));
    }

    #[test]
    fn test_plaintext_is_not_a_valid_hash() {
        // A plaintext value in the hash column must never authenticate.
        let result = verify_password("admin123", "admin123");
        assert!(matches!(result, Err(PasswordError::MalformedHash)));
    }

    #[test]
    fn test_different_salts_produce_different_hashes() {
        let a = hash_password("same_password").expect("Hashing should succeed");
        let b = hash_password("same_password").expect("Hashing should succeed");
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_password_rejected() {
        assert!(matches!(hash_password("short"), Err(PasswordError::TooShort)));
    }
}
