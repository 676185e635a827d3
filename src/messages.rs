//! Flow-scoped UI messages.
//!
//! Messages carry stable numeric ids that frontends key on; the text is
//! informational only. Ids are a contract: changing one breaks consumers.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Changes were persisted by a settings flow.
pub const ID_SETTINGS_SAVED: u32 = 1_050_001;
/// A sign-in attempt collided with an identifier owned by another account;
/// signing in to that account allows linking this one as another method.
pub const ID_SIGN_IN_TO_LINK: u32 = 1_010_016;
/// Generic validation failure on a submitted flow.
pub const ID_VALIDATION: u32 = 4_000_001;
/// The provider identity is already linked to a different account.
pub const ID_CREDENTIAL_CONFLICT: u32 = 4_000_007;
/// The action requires a recently authenticated session.
pub const ID_REAUTH_REQUIRED: u32 = 4_010_001;
/// The flow exceeded its lifetime and must be restarted.
pub const ID_FLOW_EXPIRED: u32 = 4_060_001;
/// The upstream provider denied or failed the authorization.
pub const ID_UPSTREAM_PROVIDER: u32 = 4_070_001;
/// A concurrent duplicate submission lost the per-flow serialization race.
pub const ID_CONCURRENT_SUBMISSION: u32 = 4_080_001;
/// The named provider is neither configured nor linked.
pub const ID_UNKNOWN_PROVIDER: u32 = 4_090_001;
/// Unlinking was refused because it would remove the last way to sign in.
pub const ID_LAST_AUTH_METHOD: u32 = 4_100_001;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Info,
    Error,
}

/// A single message attached to a flow, rendered inline by the UI.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UiMessage {
    pub id: u32,
    pub kind: MessageKind,
    pub text: String,
}

impl UiMessage {
    #[must_use]
    pub fn settings_saved() -> Self {
        Self {
            id: ID_SETTINGS_SAVED,
            kind: MessageKind::Info,
            text: "Your changes have been saved.".to_string(),
        }
    }

    #[must_use]
    pub fn sign_in_to_link(identifier: &str) -> Self {
        Self {
            id: ID_SIGN_IN_TO_LINK,
            kind: MessageKind::Info,
            text: format!(
                "You tried signing in with {identifier}, which is already in use by another \
                 account. Sign in to that account to add this one as another way to sign in."
            ),
        }
    }

    #[must_use]
    pub fn validation(text: &str) -> Self {
        Self {
            id: ID_VALIDATION,
            kind: MessageKind::Error,
            text: text.to_string(),
        }
    }

    #[must_use]
    pub fn credential_conflict() -> Self {
        Self {
            id: ID_CREDENTIAL_CONFLICT,
            kind: MessageKind::Error,
            text: "This account is already linked to another user.".to_string(),
        }
    }

    #[must_use]
    pub fn reauth_required() -> Self {
        Self {
            id: ID_REAUTH_REQUIRED,
            kind: MessageKind::Info,
            text: "Please confirm it is you before changing how you sign in.".to_string(),
        }
    }

    #[must_use]
    pub fn flow_expired() -> Self {
        Self {
            id: ID_FLOW_EXPIRED,
            kind: MessageKind::Error,
            text: "The flow expired. Please retry.".to_string(),
        }
    }

    #[must_use]
    pub fn upstream_provider(description: &str) -> Self {
        Self {
            id: ID_UPSTREAM_PROVIDER,
            kind: MessageKind::Error,
            text: format!("The sign-in provider reported an error: {description}"),
        }
    }

    #[must_use]
    pub fn concurrent_submission() -> Self {
        Self {
            id: ID_CONCURRENT_SUBMISSION,
            kind: MessageKind::Error,
            text: "The flow is already being processed. Please retry.".to_string(),
        }
    }

    #[must_use]
    pub fn unknown_provider(provider: &str) -> Self {
        Self {
            id: ID_UNKNOWN_PROVIDER,
            kind: MessageKind::Error,
            text: format!("Unknown sign-in provider: {provider}."),
        }
    }

    #[must_use]
    pub fn last_auth_method() -> Self {
        Self {
            id: ID_LAST_AUTH_METHOD,
            kind: MessageKind::Error,
            text: "Unlinking this provider would leave no way to sign in.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_stable() {
        assert_eq!(UiMessage::settings_saved().id, 1_050_001);
        assert_eq!(UiMessage::sign_in_to_link("a@b.c").id, 1_010_016);
        assert_eq!(UiMessage::credential_conflict().id, 4_000_007);
        assert_eq!(UiMessage::flow_expired().id, 4_060_001);
    }

    #[test]
    fn sign_in_to_link_names_the_identifier() {
        let message = UiMessage::sign_in_to_link("alice@example.com");
        assert!(message.text.contains("alice@example.com"));
        assert!(message.text.ends_with("as another way to sign in."));
    }

    #[test]
    fn messages_round_trip_as_json() -> anyhow::Result<()> {
        let message = UiMessage::settings_saved();
        let value = serde_json::to_value(&message)?;
        assert_eq!(
            value.get("kind").and_then(serde_json::Value::as_str),
            Some("info")
        );
        let decoded: UiMessage = serde_json::from_value(value)?;
        assert_eq!(decoded, message);
        Ok(())
    }
}
