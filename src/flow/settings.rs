//! Settings flow engine.
//!
//! Drives password set, provider link, and provider unlink against a flow
//! scoped to the authenticated identity. Link and unlink require a privileged
//! session; a stale session transitions the flow to `needs_reauth` with the
//! action recorded, and the action is re-dispatched after the forced
//! re-authentication refreshes the session.

use chrono::Utc;
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use super::storage::{
    SettingsFlowRecord, append_settings_message, claim_settings_flow, insert_settings_flow,
    lookup_settings_flow, mark_settings_needs_reauth, mark_settings_succeeded,
    reactivate_settings_flow,
};
use super::{FlowError, SettingsAction, SettingsFlowState, UiNode, message_for_error};
use crate::identity::storage::{
    LinkOutcome, count_auth_methods, link_oidc_credential, list_credentials,
    unlink_oidc_credential, upsert_password_credential,
};
use crate::identity::{Credential, CredentialMethod, hash_password};
use crate::messages::UiMessage;
use crate::oidc::claims::SubjectClaims;
use crate::oidc::state::StateRecord;
use crate::oidc::{AuthorizationMode, CallbackOutcome, ProviderConfig, begin_authorization};
use crate::session::{SessionRecord, guard::session_is_fresh};
use crate::state::ServiceState;
use crate::token::{generate_token, hash_token};

/// How a settings submission resolved; `ReauthRequired` is control flow for
/// the caller, not a failure.
#[derive(Debug)]
pub enum SettingsSubmitOutcome {
    Saved(SettingsFlowRecord),
    RedirectToProvider { redirect_to: String },
    ReauthRequired { redirect_to: String },
}

/// Start a settings flow for the session's identity. Returns the record and
/// the raw CSRF token; only the token hash is stored.
///
/// # Errors
/// Returns an error on storage failure.
pub async fn create_flow(
    pool: &PgPool,
    svc: &ServiceState,
    session: &SessionRecord,
) -> anyhow::Result<(SettingsFlowRecord, String)> {
    let csrf_token = generate_token()?;
    let flow = insert_settings_flow(
        pool,
        session.identity_id,
        &hash_token(&csrf_token),
        svc.config().settings_flow_ttl_seconds(),
    )
    .await?;
    Ok((flow, csrf_token))
}

/// Fetch a flow, scoped to the session's identity.
///
/// # Errors
/// `FlowNotFound` also covers flows belonging to other identities, so their
/// existence is not leaked.
pub async fn fetch_flow(
    pool: &PgPool,
    session: &SessionRecord,
    flow_id: Uuid,
) -> Result<SettingsFlowRecord, FlowError> {
    let flow = lookup_settings_flow(pool, flow_id)
        .await?
        .ok_or(FlowError::FlowNotFound)?;
    if flow.identity_id != session.identity_id {
        return Err(FlowError::FlowNotFound);
    }
    Ok(flow)
}

/// Render the interaction nodes for a flow.
///
/// # Errors
/// Returns an error on storage failure.
pub async fn render_ui(
    pool: &PgPool,
    svc: &ServiceState,
    flow: &SettingsFlowRecord,
) -> anyhow::Result<Vec<UiNode>> {
    let credentials = list_credentials(pool, flow.identity_id).await?;
    let providers = svc.providers().enabled();
    Ok(ui_nodes(
        &providers,
        &credentials,
        svc.config().allow_last_method_unlink(),
    ))
}

/// Compute the settings form nodes from persisted credentials and the
/// currently configured providers.
///
/// Unlink affordances come from persisted state alone: a provider that was
/// removed from configuration still renders its unlink node (labelled by id)
/// and never corrupts the rendering of other providers. The unlink node is
/// hidden while it would remove the last remaining authentication method,
/// unless policy allows that.
#[must_use]
pub fn ui_nodes(
    providers: &[ProviderConfig],
    credentials: &[Credential],
    allow_last_method_unlink: bool,
) -> Vec<UiNode> {
    let mut nodes = vec![UiNode {
        group: "password".to_string(),
        name: "password".to_string(),
        value: None,
        label: "Set password".to_string(),
    }];

    let linked: Vec<&Credential> = credentials
        .iter()
        .filter(|credential| credential.method == CredentialMethod::Oidc)
        .collect();
    let can_unlink = allow_last_method_unlink || credentials.len() > 1;

    if can_unlink {
        for credential in &linked {
            let Some(provider_id) = credential.provider.as_deref() else {
                continue;
            };
            let label = providers
                .iter()
                .find(|provider| provider.id == provider_id)
                .map_or(provider_id, |provider| provider.label.as_str());
            nodes.push(UiNode {
                group: "oidc".to_string(),
                name: "unlink".to_string(),
                value: Some(provider_id.to_string()),
                label: format!("Unlink {label}"),
            });
        }
    }

    for provider in providers {
        let already_linked = linked
            .iter()
            .any(|credential| credential.provider.as_deref() == Some(provider.id.as_str()));
        if already_linked {
            continue;
        }
        nodes.push(UiNode {
            group: "oidc".to_string(),
            name: "link".to_string(),
            value: Some(provider.id.clone()),
            label: format!("Link {}", provider.label),
        });
    }

    nodes
}

/// Submit an action against an active flow.
///
/// # Errors
/// Expected rejects carry a [`FlowError`]; message-worthy ones are also
/// appended to the flow before returning.
pub async fn submit(
    pool: &PgPool,
    svc: &ServiceState,
    session: &SessionRecord,
    flow_id: Uuid,
    csrf_token: &str,
    action: SettingsAction,
) -> Result<SettingsSubmitOutcome, FlowError> {
    let flow = fetch_flow(pool, session, flow_id).await?;

    if hash_token(csrf_token) != flow.csrf_token_hash {
        return Err(FlowError::CsrfMismatch);
    }
    if flow.expires_at <= Utc::now() {
        return Err(reject(pool, flow.id, FlowError::FlowExpired).await);
    }

    match flow.state {
        SettingsFlowState::Active => {}
        // Re-submitting a flow that is already waiting on re-auth just
        // redirects to login again.
        SettingsFlowState::NeedsReauth => {
            return Ok(SettingsSubmitOutcome::ReauthRequired {
                redirect_to: svc.config().reauth_redirect_url(flow.id),
            });
        }
        SettingsFlowState::Succeeded | SettingsFlowState::Failed => {
            return Err(reject(pool, flow.id, FlowError::FlowExpired).await);
        }
    }

    if !claim_settings_flow(pool, flow.id, SettingsFlowState::Active, flow.version).await? {
        return Err(reject(pool, flow.id, FlowError::ConcurrentSubmission).await);
    }

    apply_action(pool, svc, session, &flow, action).await
}

/// Re-dispatch the pending action of a `needs_reauth` flow after the session
/// was re-authenticated.
///
/// # Errors
/// `Validation` when the flow has nothing to resume.
pub async fn resume(
    pool: &PgPool,
    svc: &ServiceState,
    session: &SessionRecord,
    flow_id: Uuid,
) -> Result<SettingsSubmitOutcome, FlowError> {
    let flow = fetch_flow(pool, session, flow_id).await?;

    if flow.expires_at <= Utc::now() {
        return Err(reject(pool, flow.id, FlowError::FlowExpired).await);
    }
    if flow.state != SettingsFlowState::NeedsReauth {
        return Err(FlowError::Validation(
            "flow is not waiting for re-authentication".into(),
        ));
    }
    let Some(action) = flow.pending_action.clone() else {
        return Err(FlowError::Validation("flow has no pending action".into()));
    };

    if !claim_settings_flow(pool, flow.id, SettingsFlowState::NeedsReauth, flow.version).await? {
        return Err(reject(pool, flow.id, FlowError::ConcurrentSubmission).await);
    }
    reactivate_settings_flow(pool, flow.id).await?;

    apply_action(pool, svc, session, &flow, action).await
}

async fn apply_action(
    pool: &PgPool,
    svc: &ServiceState,
    session: &SessionRecord,
    flow: &SettingsFlowRecord,
    action: SettingsAction,
) -> Result<SettingsSubmitOutcome, FlowError> {
    match action {
        // Setting a password hardens the account; it is deliberately not
        // gated on session freshness.
        SettingsAction::SetPassword { password } => {
            let password_hash = hash_password(&password)?;
            upsert_password_credential(pool, flow.identity_id, &password_hash).await?;
            saved(pool, session, flow.id).await
        }
        SettingsAction::Link { provider } => {
            let credentials = list_credentials(pool, flow.identity_id).await?;
            if credentials.iter().any(|credential| {
                credential.method == CredentialMethod::Oidc
                    && credential.provider.as_deref() == Some(provider.as_str())
            }) {
                let err = FlowError::Validation(format!("{provider} is already linked"));
                return Err(reject(pool, flow.id, err).await);
            }
            if svc.providers().find(&provider).is_none() {
                return Err(reject(pool, flow.id, FlowError::UnknownProvider(provider)).await);
            }

            if !session_is_fresh(session, svc.config()) {
                return needs_reauth(pool, svc, flow, SettingsAction::Link { provider }).await;
            }

            let redirect_to = begin_authorization(
                pool,
                svc,
                &provider,
                AuthorizationMode::Link,
                flow.id,
                &flow.csrf_token_hash,
                Some(flow.identity_id),
                false,
            )
            .await?;
            Ok(SettingsSubmitOutcome::RedirectToProvider { redirect_to })
        }
        SettingsAction::Unlink { provider } => {
            let credentials = list_credentials(pool, flow.identity_id).await?;
            let is_linked = credentials.iter().any(|credential| {
                credential.method == CredentialMethod::Oidc
                    && credential.provider.as_deref() == Some(provider.as_str())
            });
            if !is_linked {
                // Unlink works off persisted state; only a provider that is
                // neither linked nor configured is truly unknown.
                let err = if svc.providers().find(&provider).is_some() {
                    FlowError::Validation(format!("{provider} is not linked"))
                } else {
                    FlowError::UnknownProvider(provider)
                };
                return Err(reject(pool, flow.id, err).await);
            }

            if !session_is_fresh(session, svc.config()) {
                return needs_reauth(pool, svc, flow, SettingsAction::Unlink { provider }).await;
            }

            let methods = count_auth_methods(pool, flow.identity_id).await?;
            if methods <= 1 && !svc.config().allow_last_method_unlink() {
                return Err(reject(pool, flow.id, FlowError::LastAuthMethod).await);
            }

            if !unlink_oidc_credential(pool, flow.identity_id, &provider).await? {
                let err = FlowError::Validation(format!("{provider} is not linked"));
                return Err(reject(pool, flow.id, err).await);
            }
            // Unlinking the credential that authenticated the current session
            // leaves the session untouched; only future logins are affected.
            saved(pool, session, flow.id).await
        }
    }
}

/// Finish a link-mode callback: attach (provider, subject) to the identity
/// bound into the state record.
///
/// A conflicting link leaves the calling identity unmodified; its session
/// keeps working and the flow carries the conflict message.
pub async fn complete_link(
    pool: &PgPool,
    svc: &ServiceState,
    record: &StateRecord,
    subject: &SubjectClaims,
    granted_scopes: &[String],
) -> Result<CallbackOutcome, FlowError> {
    let identity_id = record.identity_id.ok_or(FlowError::InvalidState)?;
    let flow = lookup_settings_flow(pool, record.flow_id)
        .await?
        .ok_or(FlowError::InvalidState)?;

    let outcome = link_oidc_credential(
        pool,
        identity_id,
        &record.provider,
        &subject.subject,
        granted_scopes,
    )
    .await?;

    match outcome {
        LinkOutcome::Linked | LinkOutcome::AlreadyLinked => {
            mark_settings_succeeded(pool, flow.id, &UiMessage::settings_saved()).await?;
        }
        LinkOutcome::Conflict => {
            append_settings_message(pool, flow.id, &UiMessage::credential_conflict()).await?;
        }
    }

    Ok(CallbackOutcome {
        redirect_to: svc.config().settings_ui_url(flow.id),
        session_token: None,
    })
}

/// Surface a provider-denied link attempt on the flow.
pub async fn fail_link(
    pool: &PgPool,
    svc: &ServiceState,
    record: &StateRecord,
    description: &str,
) -> Result<CallbackOutcome, FlowError> {
    let flow = lookup_settings_flow(pool, record.flow_id)
        .await?
        .ok_or(FlowError::InvalidState)?;
    append_settings_message(pool, flow.id, &UiMessage::upstream_provider(description)).await?;
    Ok(CallbackOutcome {
        redirect_to: svc.config().settings_ui_url(flow.id),
        session_token: None,
    })
}

async fn saved(
    pool: &PgPool,
    session: &SessionRecord,
    flow_id: Uuid,
) -> Result<SettingsSubmitOutcome, FlowError> {
    mark_settings_succeeded(pool, flow_id, &UiMessage::settings_saved()).await?;
    let flow = fetch_flow(pool, session, flow_id).await?;
    Ok(SettingsSubmitOutcome::Saved(flow))
}

async fn needs_reauth(
    pool: &PgPool,
    svc: &ServiceState,
    flow: &SettingsFlowRecord,
    action: SettingsAction,
) -> Result<SettingsSubmitOutcome, FlowError> {
    mark_settings_needs_reauth(pool, flow.id, &action, &UiMessage::reauth_required()).await?;
    Ok(SettingsSubmitOutcome::ReauthRequired {
        redirect_to: svc.config().reauth_redirect_url(flow.id),
    })
}

/// Attach the matching message to the flow, then hand the error back.
async fn reject(pool: &PgPool, flow_id: Uuid, err: FlowError) -> FlowError {
    if let Some(message) = message_for_error(&err) {
        if let Err(append_err) = append_settings_message(pool, flow_id, &message).await {
            error!("Failed to append flow message: {append_err}");
        }
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oidc::providers::test_support::provider;

    fn oidc_credential(provider_id: &str) -> Credential {
        Credential {
            id: Uuid::new_v4(),
            identity_id: Uuid::nil(),
            method: CredentialMethod::Oidc,
            provider: Some(provider_id.to_string()),
            subject: Some(format!("{provider_id}-subject")),
            scopes: vec![],
        }
    }

    fn password_credential() -> Credential {
        Credential {
            id: Uuid::new_v4(),
            identity_id: Uuid::nil(),
            method: CredentialMethod::Password,
            provider: None,
            subject: None,
            scopes: vec![],
        }
    }

    fn node<'a>(nodes: &'a [UiNode], name: &str, value: &str) -> Option<&'a UiNode> {
        nodes
            .iter()
            .find(|node| node.name == name && node.value.as_deref() == Some(value))
    }

    #[test]
    fn fresh_oidc_identity_sees_link_options_but_no_unlink() {
        // Registered via hydra, no password yet: hydra must not render at all.
        let providers = vec![provider("hydra"), provider("google"), provider("github")];
        let credentials = vec![oidc_credential("hydra")];
        let nodes = ui_nodes(&providers, &credentials, false);

        assert!(node(&nodes, "link", "google").is_some());
        assert!(node(&nodes, "link", "github").is_some());
        assert!(node(&nodes, "unlink", "hydra").is_none());
        assert!(node(&nodes, "link", "hydra").is_none());
    }

    #[test]
    fn unlink_appears_once_password_is_set() {
        let providers = vec![provider("hydra"), provider("google")];
        let credentials = vec![oidc_credential("hydra"), password_credential()];
        let nodes = ui_nodes(&providers, &credentials, false);

        let unlink = node(&nodes, "unlink", "hydra").expect("unlink node should render");
        assert_eq!(unlink.label, "Unlink hydra");
        assert!(node(&nodes, "link", "google").is_some());
    }

    #[test]
    fn last_method_unlink_policy_flag_overrides_gating() {
        let providers = vec![provider("hydra")];
        let credentials = vec![oidc_credential("hydra")];
        let nodes = ui_nodes(&providers, &credentials, true);
        assert!(node(&nodes, "unlink", "hydra").is_some());
    }

    #[test]
    fn removed_provider_keeps_unlink_and_other_providers_intact() {
        // hydra was removed from configuration after being linked.
        let providers = vec![provider("google"), provider("github")];
        let credentials = vec![oidc_credential("hydra"), password_credential()];
        let nodes = ui_nodes(&providers, &credentials, false);

        // Unlink affordance survives, labelled by provider id.
        let unlink = node(&nodes, "unlink", "hydra").expect("unlink node should render");
        assert_eq!(unlink.label, "Unlink hydra");
        // Other providers are unaffected.
        assert!(node(&nodes, "link", "google").is_some());
        assert!(node(&nodes, "link", "github").is_some());
    }

    #[test]
    fn linked_provider_does_not_offer_link_again() {
        let providers = vec![provider("google")];
        let credentials = vec![oidc_credential("google"), password_credential()];
        let nodes = ui_nodes(&providers, &credentials, false);

        assert!(node(&nodes, "link", "google").is_none());
        assert!(node(&nodes, "unlink", "google").is_some());
    }

    #[test]
    fn password_node_is_always_present() {
        let nodes = ui_nodes(&[], &[], false);
        assert!(nodes.iter().any(|node| node.name == "password"));
    }
}
