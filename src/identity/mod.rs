//! Identities and their credentials.
//!
//! An identity owns a set of traits (email, website, ...) and zero or more
//! credentials: at most one password, and any number of linked OIDC provider
//! identities. The pair (provider, subject) is globally unique across all
//! identities; the storage layer enforces it with a unique index.

pub mod storage;

use anyhow::{Result, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Credential methods supported by the settings and login flows.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CredentialMethod {
    Password,
    Oidc,
}

impl CredentialMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Oidc => "oidc",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "password" => Some(Self::Password),
            "oidc" => Some(Self::Oidc),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub traits: serde_json::Value,
}

#[derive(Clone, Debug)]
pub struct Credential {
    pub id: Uuid,
    pub identity_id: Uuid,
    pub method: CredentialMethod,
    pub provider: Option<String>,
    pub subject: Option<String>,
    pub scopes: Vec<String>,
}

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Hash a password for storage.
///
/// # Errors
/// Returns an error if the hasher fails (effectively only on RNG failure).
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("failed to hash password: {err}"))
}

/// Verify a password against a stored hash. Malformed hashes verify as false.
#[must_use]
pub fn verify_password(stored_hash: &str, password: &str) -> bool {
    PasswordHash::new(stored_hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_method_round_trips() {
        assert_eq!(CredentialMethod::Password.as_str(), "password");
        assert_eq!(CredentialMethod::Oidc.as_str(), "oidc");
        assert_eq!(
            CredentialMethod::from_str("password"),
            Some(CredentialMethod::Password)
        );
        assert_eq!(CredentialMethod::from_str("oidc"), Some(CredentialMethod::Oidc));
        assert_eq!(CredentialMethod::from_str("webauthn"), None);
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(valid_email("name.surname@example.co"));
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-at.example.com"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn password_hash_verifies_and_rejects() {
        let hash = hash_password("horse battery staple").ok();
        let hash = hash.as_deref().expect("hashing should succeed");
        assert!(verify_password(hash, "horse battery staple"));
        assert!(!verify_password(hash, "wrong"));
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_password("not-a-phc-string", "anything"));
    }
}
