//! Self-service flows.
//!
//! A flow is a short-lived, CSRF-protected, server-tracked object
//! representing one in-progress multi-step interaction. Submitted actions
//! are tagged unions matched exhaustively, never dynamic field inspection,
//! and "needs re-authentication" is a flow state, not an error.

pub mod login;
pub mod settings;
pub mod storage;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::messages::UiMessage;

/// Everything that can go wrong while driving a flow.
///
/// These are expected conditions surfaced as flow-scoped messages; only
/// `Internal` (storage or programming faults) is fatal to the request.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("csrf token mismatch")]
    CsrfMismatch,
    #[error("flow not found")]
    FlowNotFound,
    #[error("flow expired")]
    FlowExpired,
    #[error("invalid or already consumed state")]
    InvalidState,
    #[error("provider identity is linked to another account")]
    CredentialConflict,
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("upstream provider error: {0}")]
    UpstreamProvider(String),
    #[error("concurrent submission rejected")]
    ConcurrentSubmission,
    #[error("refusing to remove the last authentication method")]
    LastAuthMethod,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// The flow message matching an error, for errors that surface inline.
///
/// CSRF mismatches and not-found flows are request-scoped and leave no trace
/// on the flow; internal faults must not leak detail to the UI.
#[must_use]
pub fn message_for_error(err: &FlowError) -> Option<UiMessage> {
    match err {
        FlowError::FlowExpired => Some(UiMessage::flow_expired()),
        FlowError::CredentialConflict => Some(UiMessage::credential_conflict()),
        FlowError::UnknownProvider(provider) => Some(UiMessage::unknown_provider(provider)),
        FlowError::UpstreamProvider(description) => {
            Some(UiMessage::upstream_provider(description))
        }
        FlowError::ConcurrentSubmission => Some(UiMessage::concurrent_submission()),
        FlowError::LastAuthMethod => Some(UiMessage::last_auth_method()),
        FlowError::Validation(text) => Some(UiMessage::validation(text)),
        FlowError::CsrfMismatch
        | FlowError::FlowNotFound
        | FlowError::InvalidState
        | FlowError::Internal(_) => None,
    }
}

/// Requested assurance for a login flow: a plain login, or a forced
/// re-authentication that must not be short-circuited by an existing session.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RequestedAal {
    Default,
    Forced,
}

impl RequestedAal {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Forced => "forced",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "default" => Some(Self::Default),
            "forced" => Some(Self::Forced),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SettingsFlowState {
    Active,
    Succeeded,
    NeedsReauth,
    Failed,
}

impl SettingsFlowState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Succeeded => "succeeded",
            Self::NeedsReauth => "needs_reauth",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "succeeded" => Some(Self::Succeeded),
            "needs_reauth" => Some(Self::NeedsReauth),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LoginFlowState {
    Active,
    Succeeded,
    Failed,
}

impl LoginFlowState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A settings action submitted against a flow.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SettingsAction {
    SetPassword { password: String },
    Link { provider: String },
    Unlink { provider: String },
}

impl SettingsAction {
    /// Build an action from the submission's discriminator fields; exactly
    /// one must be present.
    ///
    /// # Errors
    /// `Validation` when zero or more than one discriminator is set, or the
    /// password is empty.
    pub fn from_fields(
        password: Option<String>,
        link: Option<String>,
        unlink: Option<String>,
    ) -> Result<Self, FlowError> {
        match (password, link, unlink) {
            (Some(password), None, None) => {
                if password.trim().is_empty() {
                    return Err(FlowError::Validation("password must not be empty".into()));
                }
                Ok(Self::SetPassword { password })
            }
            (None, Some(provider), None) => Ok(Self::Link { provider }),
            (None, None, Some(provider)) => Ok(Self::Unlink { provider }),
            _ => Err(FlowError::Validation(
                "exactly one of password, link, unlink must be set".into(),
            )),
        }
    }
}

/// A login method submitted against a flow.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LoginMethod {
    Password { identifier: String, password: String },
    Oidc { provider: String },
}

impl LoginMethod {
    /// Build a method from the submission's fields.
    ///
    /// # Errors
    /// `Validation` when the fields select zero or both methods.
    pub fn from_fields(
        provider: Option<String>,
        identifier: Option<String>,
        password: Option<String>,
    ) -> Result<Self, FlowError> {
        match (provider, identifier, password) {
            (Some(provider), None, None) => Ok(Self::Oidc { provider }),
            (None, Some(identifier), Some(password)) => {
                if identifier.trim().is_empty() || password.is_empty() {
                    return Err(FlowError::Validation(
                        "identifier and password must not be empty".into(),
                    ));
                }
                Ok(Self::Password {
                    identifier,
                    password,
                })
            }
            _ => Err(FlowError::Validation(
                "submit either a provider or identifier and password".into(),
            )),
        }
    }
}

/// One interaction element on a rendered flow.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UiNode {
    /// Method group: `password` or `oidc`.
    pub group: String,
    /// Submit field name: `password`, `link`, `unlink`, or `provider`.
    pub name: String,
    /// Submit field value; the provider id for oidc nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub label: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_action_requires_exactly_one_field() {
        let action = SettingsAction::from_fields(None, Some("google".into()), None);
        assert_eq!(
            action.ok(),
            Some(SettingsAction::Link {
                provider: "google".into()
            })
        );

        assert!(SettingsAction::from_fields(None, None, None).is_err());
        assert!(
            SettingsAction::from_fields(Some("pw".into()), Some("google".into()), None).is_err()
        );
        assert!(SettingsAction::from_fields(Some("  ".into()), None, None).is_err());
    }

    #[test]
    fn settings_action_round_trips_as_tagged_json() -> anyhow::Result<()> {
        let action = SettingsAction::Unlink {
            provider: "hydra".into(),
        };
        let value = serde_json::to_value(&action)?;
        assert_eq!(
            value.get("action").and_then(serde_json::Value::as_str),
            Some("unlink")
        );
        let decoded: SettingsAction = serde_json::from_value(value)?;
        assert_eq!(decoded, action);
        Ok(())
    }

    #[test]
    fn login_method_selects_password_or_provider() {
        let method = LoginMethod::from_fields(Some("github".into()), None, None);
        assert_eq!(
            method.ok(),
            Some(LoginMethod::Oidc {
                provider: "github".into()
            })
        );

        let method =
            LoginMethod::from_fields(None, Some("alice@example.com".into()), Some("pw".into()));
        assert!(matches!(method, Ok(LoginMethod::Password { .. })));

        assert!(LoginMethod::from_fields(None, None, None).is_err());
        assert!(
            LoginMethod::from_fields(Some("github".into()), Some("a".into()), Some("b".into()))
                .is_err()
        );
    }

    #[test]
    fn message_for_error_covers_inline_errors_only() {
        assert_eq!(
            message_for_error(&FlowError::CredentialConflict).map(|m| m.id),
            Some(crate::messages::ID_CREDENTIAL_CONFLICT)
        );
        assert_eq!(
            message_for_error(&FlowError::UnknownProvider("x".into())).map(|m| m.id),
            Some(crate::messages::ID_UNKNOWN_PROVIDER)
        );
        assert!(message_for_error(&FlowError::CsrfMismatch).is_none());
        assert!(message_for_error(&FlowError::FlowNotFound).is_none());
    }

    #[test]
    fn flow_states_round_trip() {
        for state in [
            SettingsFlowState::Active,
            SettingsFlowState::Succeeded,
            SettingsFlowState::NeedsReauth,
            SettingsFlowState::Failed,
        ] {
            assert_eq!(SettingsFlowState::from_str(state.as_str()), Some(state));
        }
        assert_eq!(SettingsFlowState::from_str("bogus"), None);

        for state in [
            LoginFlowState::Active,
            LoginFlowState::Succeeded,
            LoginFlowState::Failed,
        ] {
            assert_eq!(LoginFlowState::from_str(state.as_str()), Some(state));
        }
        assert_eq!(RequestedAal::from_str("forced"), Some(RequestedAal::Forced));
        assert_eq!(RequestedAal::from_str("aal3"), None);
    }
}
