//! Authenticated sessions.
//!
//! A session belongs to exactly one identity and records when it was last
//! (re-)authenticated and which methods were used, most recent last. The
//! `authenticated_at` timestamp is what the privileged-session guard reads;
//! re-authentication refreshes it without minting a new session.

pub mod guard;
pub mod storage;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::identity::CredentialMethod;

/// One completed authentication, as recorded on the session.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuthenticationMethod {
    pub method: CredentialMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl AuthenticationMethod {
    #[must_use]
    pub fn password(now: DateTime<Utc>) -> Self {
        Self {
            method: CredentialMethod::Password,
            provider: None,
            completed_at: now,
        }
    }

    #[must_use]
    pub fn oidc(provider: &str, now: DateTime<Utc>) -> Self {
        Self {
            method: CredentialMethod::Oidc,
            provider: Some(provider.to_string()),
            completed_at: now,
        }
    }
}

/// Authenticator assurance derived from the methods used.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AssuranceLevel {
    Aal1,
}

impl AssuranceLevel {
    /// Password and OIDC are both single-factor; a second factor would raise
    /// this.
    #[must_use]
    pub fn from_methods(_methods: &[AuthenticationMethod]) -> Self {
        Self::Aal1
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aal1 => "aal1",
        }
    }
}

/// A resolved, valid session joined with its identity.
#[derive(Clone, Debug)]
pub struct SessionRecord {
    pub id: Uuid,
    pub identity_id: Uuid,
    pub email: String,
    pub authenticated_at: DateTime<Utc>,
    pub authentication_methods: Vec<AuthenticationMethod>,
    pub aal: AssuranceLevel,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn methods_serialize_with_provider_only_for_oidc() -> anyhow::Result<()> {
        let now = Utc::now();
        let password = serde_json::to_value(AuthenticationMethod::password(now))?;
        assert_eq!(
            password.get("method").and_then(serde_json::Value::as_str),
            Some("password")
        );
        assert!(password.get("provider").is_none());

        let oidc = serde_json::to_value(AuthenticationMethod::oidc("google", now))?;
        assert_eq!(
            oidc.get("provider").and_then(serde_json::Value::as_str),
            Some("google")
        );
        Ok(())
    }

    #[test]
    fn assurance_level_is_aal1_for_single_factor() {
        let now = Utc::now();
        let methods = vec![
            AuthenticationMethod::oidc("hydra", now),
            AuthenticationMethod::password(now),
        ];
        assert_eq!(AssuranceLevel::from_methods(&methods), AssuranceLevel::Aal1);
        assert_eq!(AssuranceLevel::Aal1.as_str(), "aal1");
    }
}
