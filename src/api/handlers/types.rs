//! Request/response types for the self-service API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::flow::{LoginFlowState, RequestedAal, SettingsFlowState, UiNode};
use crate::messages::UiMessage;
use crate::session::{AssuranceLevel, AuthenticationMethod};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub identity_id: String,
    pub email: String,
    pub authenticated_at: DateTime<Utc>,
    pub aal: AssuranceLevel,
    pub authentication_methods: Vec<AuthenticationMethod>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SettingsFlowResponse {
    pub id: Uuid,
    pub identity_id: Uuid,
    pub state: SettingsFlowState,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub messages: Vec<UiMessage>,
    pub ui: Vec<UiNode>,
}

/// Returned once at flow creation; the raw CSRF token is not recoverable
/// afterwards.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CreatedSettingsFlowResponse {
    pub flow: SettingsFlowResponse,
    pub csrf_token: String,
}

/// Settings submission: `csrf_token` plus exactly one action discriminator.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SettingsSubmission {
    pub csrf_token: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Provider id to link.
    #[serde(default)]
    pub link: Option<String>,
    /// Provider id to unlink.
    #[serde(default)]
    pub unlink: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginFlowResponse {
    pub id: Uuid,
    pub state: LoginFlowState,
    pub requested_aal: RequestedAal,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub messages: Vec<UiMessage>,
    pub ui: Vec<UiNode>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CreatedLoginFlowResponse {
    pub flow: LoginFlowResponse,
    pub csrf_token: String,
}

/// Login submission: `csrf_token` plus either `provider` or
/// `identifier`/`password`.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginSubmission {
    pub csrf_token: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// The client must send the browser to `redirect_to` to continue the flow.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RedirectResponse {
    pub redirect_to: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ProvidersReloadedResponse {
    pub providers: usize,
}

#[derive(IntoParams, Deserialize, Debug)]
pub struct FlowQuery {
    /// Flow id.
    pub flow: Uuid,
}

#[derive(IntoParams, Deserialize, Debug)]
pub struct LoginBrowserQuery {
    /// `true` forces re-authentication even with a valid session.
    #[serde(default)]
    pub refresh: Option<bool>,
    /// Settings flow id to resume after a forced re-authentication.
    #[serde(default)]
    pub return_to: Option<String>,
    /// Challenge of an embedding upstream OAuth2 authorization request.
    #[serde(default)]
    pub login_challenge: Option<String>,
}

/// Query parameters delivered by the provider, not the end user.
#[derive(IntoParams, Deserialize, Debug)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    #[test]
    fn settings_submission_accepts_single_discriminator() -> Result<()> {
        let submission: SettingsSubmission =
            serde_json::from_str(r#"{"csrf_token":"t","link":"google"}"#)?;
        assert_eq!(submission.link.as_deref(), Some("google"));
        assert_eq!(submission.password, None);
        assert_eq!(submission.unlink, None);
        Ok(())
    }

    #[test]
    fn login_submission_round_trips() -> Result<()> {
        let submission = LoginSubmission {
            csrf_token: "t".to_string(),
            provider: Some("hydra".to_string()),
            identifier: None,
            password: None,
        };
        let value = serde_json::to_value(&submission)?;
        let provider = value
            .get("provider")
            .and_then(serde_json::Value::as_str)
            .context("missing provider")?;
        assert_eq!(provider, "hydra");
        let decoded: LoginSubmission = serde_json::from_value(value)?;
        assert_eq!(decoded.provider.as_deref(), Some("hydra"));
        Ok(())
    }

    #[test]
    fn callback_query_tolerates_missing_fields() -> Result<()> {
        let query: CallbackQuery = serde_json::from_str(r#"{"state":"abc"}"#)?;
        assert_eq!(query.state.as_deref(), Some("abc"));
        assert_eq!(query.code, None);
        assert_eq!(query.error, None);
        Ok(())
    }
}
