//! Login flow engine.
//!
//! Covers plain logins, forced re-authentications (which refresh the existing
//! session instead of minting a new one), and logins embedded in an upstream
//! OAuth2 authorization request via `login_challenge`. An embedded request is
//! always terminated (accepted on success, rejected with a recoverable
//! denial on failure) and never left dangling.

use anyhow::anyhow;
use chrono::Utc;
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use super::settings::{self, SettingsSubmitOutcome};
use super::storage::{
    LoginFlowRecord, append_login_message, claim_login_flow, insert_login_flow,
    lookup_login_flow, mark_login_state,
};
use super::{FlowError, LoginFlowState, LoginMethod, RequestedAal, UiNode, message_for_error};
use crate::identity::storage::{
    RegisterOutcome, create_identity_with_oidc_credential, find_identity_by_oidc,
    list_credentials, password_hash_by_email,
};
use crate::identity::{CredentialMethod, normalize_email, valid_email, verify_password};
use crate::messages::UiMessage;
use crate::oidc::claims::SubjectClaims;
use crate::oidc::state::StateRecord;
use crate::oidc::{
    AuthorizationMode, CallbackOutcome, ProviderConfig, begin_authorization, upstream,
};
use crate::session::storage::{insert_session, lookup_session, refresh_session_auth};
use crate::session::{AuthenticationMethod, SessionRecord};
use crate::state::ServiceState;
use crate::token::{generate_token, hash_token};

/// How a login submission resolved.
#[derive(Debug)]
pub enum LoginSubmitOutcome {
    /// A new session was created; the raw token goes into the cookie.
    SessionIssued {
        session_token: String,
        redirect_to: String,
    },
    /// An existing session had its auth timestamp refreshed.
    Reauthenticated { redirect_to: String },
    /// The browser must visit the provider's authorization endpoint.
    RedirectToProvider { redirect_to: String },
}

/// Start a login flow. For forced re-authentication the current session's
/// identity is pinned to the flow; a merely valid session never
/// short-circuits the credential check.
///
/// # Errors
/// Returns an error on storage failure.
pub async fn create_flow(
    pool: &PgPool,
    svc: &ServiceState,
    requested_aal: RequestedAal,
    return_to: Option<&str>,
    login_challenge: Option<&str>,
    session: Option<&SessionRecord>,
) -> anyhow::Result<(LoginFlowRecord, String)> {
    let reauth_identity = match requested_aal {
        RequestedAal::Forced => session.map(|session| session.identity_id),
        RequestedAal::Default => None,
    };
    let csrf_token = generate_token()?;
    let flow = insert_login_flow(
        pool,
        &hash_token(&csrf_token),
        requested_aal,
        reauth_identity,
        login_challenge,
        return_to,
        svc.config().login_flow_ttl_seconds(),
    )
    .await?;
    Ok((flow, csrf_token))
}

/// Fetch a login flow by id.
///
/// # Errors
/// `FlowNotFound` when no such flow exists.
pub async fn fetch_flow(pool: &PgPool, flow_id: Uuid) -> Result<LoginFlowRecord, FlowError> {
    lookup_login_flow(pool, flow_id)
        .await?
        .ok_or(FlowError::FlowNotFound)
}

/// Render the method nodes for a login flow.
///
/// # Errors
/// Returns an error on storage failure.
pub async fn render_ui(
    pool: &PgPool,
    svc: &ServiceState,
    flow: &LoginFlowRecord,
) -> anyhow::Result<Vec<UiNode>> {
    let providers = svc.providers().enabled();
    if let (RequestedAal::Forced, Some(identity_id)) = (flow.requested_aal, flow.reauth_identity) {
        let credentials = list_credentials(pool, identity_id).await?;
        let linked: Vec<String> = credentials
            .iter()
            .filter(|credential| credential.method == CredentialMethod::Oidc)
            .filter_map(|credential| credential.provider.clone())
            .collect();
        let password_available = credentials
            .iter()
            .any(|credential| credential.method == CredentialMethod::Password);
        return Ok(ui_nodes(&providers, Some(&linked), password_available));
    }
    Ok(ui_nodes(&providers, None, true))
}

/// Compute login method nodes. When `restrict_to_linked` is set (forced
/// re-authentication), only providers actually linked to the identity are
/// offered.
#[must_use]
pub fn ui_nodes(
    providers: &[ProviderConfig],
    restrict_to_linked: Option<&[String]>,
    password_available: bool,
) -> Vec<UiNode> {
    let mut nodes = Vec::new();
    if password_available {
        nodes.push(UiNode {
            group: "password".to_string(),
            name: "password".to_string(),
            value: None,
            label: "Sign in with password".to_string(),
        });
    }
    for provider in providers {
        if let Some(linked) = restrict_to_linked {
            if !linked.iter().any(|id| id == &provider.id) {
                continue;
            }
        }
        nodes.push(UiNode {
            group: "oidc".to_string(),
            name: "provider".to_string(),
            value: Some(provider.id.clone()),
            label: format!("Sign in with {}", provider.label),
        });
    }
    nodes
}

/// Submit a login method against an active flow.
///
/// # Errors
/// Expected rejects carry a [`FlowError`]; message-worthy ones are appended
/// to the flow first.
pub async fn submit(
    pool: &PgPool,
    svc: &ServiceState,
    flow_id: Uuid,
    csrf_token: &str,
    method: LoginMethod,
    session_token_hash: Option<&[u8]>,
) -> Result<LoginSubmitOutcome, FlowError> {
    let flow = fetch_flow(pool, flow_id).await?;

    if hash_token(csrf_token) != flow.csrf_token_hash {
        return Err(FlowError::CsrfMismatch);
    }
    if flow.expires_at <= Utc::now() {
        return Err(reject(pool, flow.id, FlowError::FlowExpired).await);
    }
    if flow.state != LoginFlowState::Active {
        return Err(reject(pool, flow.id, FlowError::FlowExpired).await);
    }
    if !claim_login_flow(pool, flow.id, flow.version).await? {
        return Err(reject(pool, flow.id, FlowError::ConcurrentSubmission).await);
    }

    match method {
        LoginMethod::Password {
            identifier,
            password,
        } => {
            submit_password(pool, svc, &flow, &identifier, &password, session_token_hash).await
        }
        LoginMethod::Oidc { provider } => {
            if svc.providers().find(&provider).is_none() {
                return Err(reject(pool, flow.id, FlowError::UnknownProvider(provider)).await);
            }
            let redirect_to = begin_authorization(
                pool,
                svc,
                &provider,
                AuthorizationMode::Login,
                flow.id,
                &flow.csrf_token_hash,
                None,
                // A forced re-auth must re-prompt at the provider too.
                flow.requested_aal == RequestedAal::Forced,
            )
            .await?;
            Ok(LoginSubmitOutcome::RedirectToProvider { redirect_to })
        }
    }
}

async fn submit_password(
    pool: &PgPool,
    svc: &ServiceState,
    flow: &LoginFlowRecord,
    identifier: &str,
    password: &str,
    session_token_hash: Option<&[u8]>,
) -> Result<LoginSubmitOutcome, FlowError> {
    let email = normalize_email(identifier);
    let invalid = || FlowError::Validation("invalid credentials".into());

    let Some((identity_id, password_hash)) = password_hash_by_email(pool, &email).await? else {
        return Err(reject(pool, flow.id, invalid()).await);
    };
    if !verify_password(&password_hash, password) {
        return Err(reject(pool, flow.id, invalid()).await);
    }

    let now = Utc::now();
    match flow.requested_aal {
        RequestedAal::Forced => {
            if flow.reauth_identity != Some(identity_id) {
                let err =
                    FlowError::Validation("re-authentication must use the same account".into());
                return Err(reject(pool, flow.id, err).await);
            }
            let Some(token_hash) = session_token_hash else {
                let err = FlowError::Validation("no active session to re-authenticate".into());
                return Err(reject(pool, flow.id, err).await);
            };
            if !refresh_session_auth(pool, token_hash, &AuthenticationMethod::password(now)).await?
            {
                let err = FlowError::Validation("no active session to re-authenticate".into());
                return Err(reject(pool, flow.id, err).await);
            }
            mark_login_state(pool, flow.id, LoginFlowState::Succeeded).await?;

            let session = lookup_session(pool, token_hash)
                .await?
                .ok_or_else(|| FlowError::Internal(anyhow!("session vanished after refresh")))?;
            let redirect_to = post_reauth_redirect(pool, svc, flow, &session).await;
            Ok(LoginSubmitOutcome::Reauthenticated { redirect_to })
        }
        RequestedAal::Default => {
            let session_token = insert_session(
                pool,
                identity_id,
                &AuthenticationMethod::password(now),
                svc.config().session_ttl_seconds(),
            )
            .await?;
            mark_login_state(pool, flow.id, LoginFlowState::Succeeded).await?;
            let redirect_to =
                post_login_redirect(svc, flow, &identity_id.to_string()).await?;
            Ok(LoginSubmitOutcome::SessionIssued {
                session_token,
                redirect_to,
            })
        }
    }
}

/// Finish a login-mode callback.
pub async fn complete_oidc_login(
    pool: &PgPool,
    svc: &ServiceState,
    record: &StateRecord,
    subject: &SubjectClaims,
    granted_scopes: &[String],
    session_token_hash: Option<&[u8]>,
) -> Result<CallbackOutcome, FlowError> {
    let flow = lookup_login_flow(pool, record.flow_id)
        .await?
        .ok_or(FlowError::InvalidState)?;
    let now = Utc::now();

    if let Some(identity) = find_identity_by_oidc(pool, &record.provider, &subject.subject).await?
    {
        let method = AuthenticationMethod::oidc(&record.provider, now);
        return match flow.requested_aal {
            RequestedAal::Forced => {
                if flow.reauth_identity != Some(identity.id) {
                    let err = FlowError::Validation(
                        "re-authentication must use the same account".into(),
                    );
                    return Ok(login_ui_outcome(svc, reject(pool, flow.id, err).await, &flow));
                }
                let Some(token_hash) = session_token_hash else {
                    let err =
                        FlowError::Validation("no active session to re-authenticate".into());
                    return Ok(login_ui_outcome(svc, reject(pool, flow.id, err).await, &flow));
                };
                if !refresh_session_auth(pool, token_hash, &method).await? {
                    let err =
                        FlowError::Validation("no active session to re-authenticate".into());
                    return Ok(login_ui_outcome(svc, reject(pool, flow.id, err).await, &flow));
                }
                mark_login_state(pool, flow.id, LoginFlowState::Succeeded).await?;
                let session = lookup_session(pool, token_hash).await?.ok_or_else(|| {
                    FlowError::Internal(anyhow!("session vanished after refresh"))
                })?;
                let redirect_to = post_reauth_redirect(pool, svc, &flow, &session).await;
                Ok(CallbackOutcome {
                    redirect_to,
                    session_token: None,
                })
            }
            RequestedAal::Default => {
                let session_token = insert_session(
                    pool,
                    identity.id,
                    &method,
                    svc.config().session_ttl_seconds(),
                )
                .await?;
                mark_login_state(pool, flow.id, LoginFlowState::Succeeded).await?;
                let redirect_to =
                    post_login_redirect(svc, &flow, &identity.id.to_string()).await?;
                Ok(CallbackOutcome {
                    redirect_to,
                    session_token: Some(session_token),
                })
            }
        };
    }

    // No credential for (provider, subject): the registration extension
    // point. A collision on the email identifier means the provider identity
    // must be linked from the owning account, never silently merged.
    let Some(email) = subject.email.as_deref() else {
        let err = FlowError::Validation("provider supplied no email address".into());
        return Ok(login_ui_outcome(svc, reject(pool, flow.id, err).await, &flow));
    };
    let email = normalize_email(email);
    if !valid_email(&email) {
        let err = FlowError::Validation("provider supplied an invalid email address".into());
        return Ok(login_ui_outcome(svc, reject(pool, flow.id, err).await, &flow));
    }
    let mut traits = serde_json::json!({ "email": email });
    if let Some(website) = &subject.website {
        traits["website"] = serde_json::Value::String(website.clone());
    }
    if let Some(name) = &subject.name {
        traits["name"] = serde_json::Value::String(name.clone());
    }

    match create_identity_with_oidc_credential(
        pool,
        &email,
        &traits,
        &record.provider,
        &subject.subject,
        granted_scopes,
    )
    .await?
    {
        RegisterOutcome::Created(identity) => {
            let session_token = insert_session(
                pool,
                identity.id,
                &AuthenticationMethod::oidc(&record.provider, now),
                svc.config().session_ttl_seconds(),
            )
            .await?;
            mark_login_state(pool, flow.id, LoginFlowState::Succeeded).await?;
            let redirect_to = post_login_redirect(svc, &flow, &identity.id.to_string()).await?;
            Ok(CallbackOutcome {
                redirect_to,
                session_token: Some(session_token),
            })
        }
        RegisterOutcome::Conflict => {
            append_login_message(pool, flow.id, &UiMessage::sign_in_to_link(&email)).await?;
            let redirect_to = terminate_challenge_or(
                svc,
                &flow,
                "the account must be linked before it can be used to sign in",
            )
            .await;
            // No local session is created for a provider identity the user
            // is not entitled to yet.
            Ok(CallbackOutcome {
                redirect_to,
                session_token: None,
            })
        }
    }
}

/// Surface a provider-denied login attempt on the flow.
pub async fn fail_oidc(
    pool: &PgPool,
    svc: &ServiceState,
    record: &StateRecord,
    description: &str,
) -> Result<CallbackOutcome, FlowError> {
    let flow = lookup_login_flow(pool, record.flow_id)
        .await?
        .ok_or(FlowError::InvalidState)?;
    append_login_message(pool, flow.id, &UiMessage::upstream_provider(description)).await?;
    let redirect_to = terminate_challenge_or(svc, &flow, description).await;
    Ok(CallbackOutcome {
        redirect_to,
        session_token: None,
    })
}

/// Where a successful plain login sends the browser: back into the upstream
/// authorization request when one is embedded, otherwise the frontend.
async fn post_login_redirect(
    svc: &ServiceState,
    flow: &LoginFlowRecord,
    subject: &str,
) -> Result<String, FlowError> {
    let Some(challenge) = flow.login_challenge.as_deref() else {
        return Ok(svc.config().default_return_url());
    };
    let admin_url = svc
        .config()
        .oauth2_admin_url()
        .ok_or_else(|| FlowError::Internal(anyhow!("login_challenge without oauth2 admin url")))?;
    upstream::accept_login_request(svc.http(), admin_url, challenge, subject)
        .await
        .map_err(FlowError::Internal)
}

/// Terminate an embedded authorization request with a recoverable denial, or
/// fall back to the login UI.
async fn terminate_challenge_or(
    svc: &ServiceState,
    flow: &LoginFlowRecord,
    description: &str,
) -> String {
    if let (Some(challenge), Some(admin_url)) =
        (flow.login_challenge.as_deref(), svc.config().oauth2_admin_url())
    {
        match upstream::reject_login_request(
            svc.http(),
            admin_url,
            challenge,
            "access_denied",
            description,
        )
        .await
        {
            Ok(redirect_to) => return redirect_to,
            Err(err) => error!("Failed to reject upstream login request: {err}"),
        }
    }
    svc.config().login_ui_url(flow.id)
}

/// After a forced re-auth, resume the settings flow named by the return
/// pointer; otherwise land on the frontend.
async fn post_reauth_redirect(
    pool: &PgPool,
    svc: &ServiceState,
    flow: &LoginFlowRecord,
    session: &SessionRecord,
) -> String {
    let Some(return_to) = flow.return_to.as_deref() else {
        return svc.config().default_return_url();
    };
    let Ok(settings_flow_id) = Uuid::parse_str(return_to) else {
        return svc.config().default_return_url();
    };

    match settings::resume(pool, svc, session, settings_flow_id).await {
        Ok(SettingsSubmitOutcome::Saved(flow)) => svc.config().settings_ui_url(flow.id),
        Ok(
            SettingsSubmitOutcome::RedirectToProvider { redirect_to }
            | SettingsSubmitOutcome::ReauthRequired { redirect_to },
        ) => redirect_to,
        Err(err) => {
            // The message is already on the settings flow; send the browser
            // there to render it.
            error!("Failed to resume settings flow: {err}");
            svc.config().settings_ui_url(settings_flow_id)
        }
    }
}

fn login_ui_outcome(svc: &ServiceState, _err: FlowError, flow: &LoginFlowRecord) -> CallbackOutcome {
    CallbackOutcome {
        redirect_to: svc.config().login_ui_url(flow.id),
        session_token: None,
    }
}

/// Attach the matching message to the flow, then hand the error back.
async fn reject(pool: &PgPool, flow_id: Uuid, err: FlowError) -> FlowError {
    if let Some(message) = message_for_error(&err) {
        if let Err(append_err) = append_login_message(pool, flow_id, &message).await {
            error!("Failed to append flow message: {append_err}");
        }
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oidc::providers::test_support::provider;

    fn node<'a>(nodes: &'a [UiNode], name: &str, value: Option<&str>) -> Option<&'a UiNode> {
        nodes
            .iter()
            .find(|node| node.name == name && node.value.as_deref() == value)
    }

    #[test]
    fn plain_login_offers_password_and_all_providers() {
        let providers = vec![provider("hydra"), provider("google"), provider("github")];
        let nodes = ui_nodes(&providers, None, true);

        assert!(node(&nodes, "password", None).is_some());
        assert!(node(&nodes, "provider", Some("hydra")).is_some());
        assert!(node(&nodes, "provider", Some("google")).is_some());
        assert!(node(&nodes, "provider", Some("github")).is_some());
    }

    #[test]
    fn forced_reauth_offers_only_linked_providers() {
        let providers = vec![provider("hydra"), provider("google"), provider("github")];
        let linked = vec!["hydra".to_string()];
        let nodes = ui_nodes(&providers, Some(&linked), true);

        assert!(node(&nodes, "provider", Some("hydra")).is_some());
        assert!(node(&nodes, "provider", Some("google")).is_none());
        assert!(node(&nodes, "provider", Some("github")).is_none());
        assert!(node(&nodes, "password", None).is_some());
    }

    #[test]
    fn forced_reauth_without_password_hides_password_node() {
        let providers = vec![provider("hydra")];
        let linked = vec!["hydra".to_string()];
        let nodes = ui_nodes(&providers, Some(&linked), false);

        assert!(node(&nodes, "password", None).is_none());
        assert!(node(&nodes, "provider", Some("hydra")).is_some());
    }

    #[test]
    fn unlinked_provider_absent_even_when_configured() {
        // After unlinking, a forced re-auth must not offer that provider.
        let providers = vec![provider("hydra"), provider("google")];
        let linked: Vec<String> = vec!["google".to_string()];
        let nodes = ui_nodes(&providers, Some(&linked), true);

        assert!(node(&nodes, "provider", Some("hydra")).is_none());
        assert!(node(&nodes, "provider", Some("google")).is_some());
    }
}
