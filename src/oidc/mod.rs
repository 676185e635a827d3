//! OIDC provider client.
//!
//! Drives the OAuth2 authorization-code round-trip in two modes: `login`
//! (authenticate or auto-register) and `link` (attach the provider identity
//! to the identity bound server-side when the redirect was issued). The
//! browser round-trip is an explicit, persisted, single-use state record;
//! nothing about it is trusted from the callback request.

pub mod claims;
pub mod client;
pub mod providers;
pub mod state;
pub mod upstream;

pub use providers::{ProviderConfig, ProviderRegistry, ProviderSnapshot, load_providers_file};
pub use state::AuthorizationMode;

use sqlx::PgPool;
use uuid::Uuid;

use crate::flow::{FlowError, login, settings};
use crate::state::ServiceState;
use crate::token::{generate_token, hash_token};
use state::{consume_state_record, insert_state_record};

/// Where the callback sends the browser, plus a session token when a login
/// created one.
#[derive(Debug)]
pub struct CallbackOutcome {
    pub redirect_to: String,
    pub session_token: Option<String>,
}

/// Build the authorization redirect for a provider and persist the state
/// record binding (mode, flow, nonce, CSRF, identity).
///
/// In link mode the target identity is bound here, server-side; the callback
/// never trusts a client-supplied identity.
///
/// # Errors
/// `UnknownProvider` when the provider is not configured and enabled.
#[allow(clippy::too_many_arguments)]
pub async fn begin_authorization(
    pool: &PgPool,
    svc: &ServiceState,
    provider_id: &str,
    mode: AuthorizationMode,
    flow_id: Uuid,
    csrf_token_hash: &[u8],
    identity_id: Option<Uuid>,
    prompt_login: bool,
) -> Result<String, FlowError> {
    let provider = svc
        .providers()
        .find(provider_id)
        .ok_or_else(|| FlowError::UnknownProvider(provider_id.to_string()))?;
    let snapshot = ProviderSnapshot::of(&provider);

    let state = generate_token()?;
    let nonce = generate_token()?;

    insert_state_record(
        pool,
        &hash_token(&state),
        &hash_token(&nonce),
        provider_id,
        &snapshot,
        mode,
        flow_id,
        identity_id,
        csrf_token_hash,
        svc.config().oidc_state_ttl_seconds(),
    )
    .await?;

    let redirect_uri = svc.config().oidc_redirect_uri(provider_id);
    let url = client::authorization_url(&snapshot, &redirect_uri, &state, &nonce, prompt_login)?;
    Ok(url.to_string())
}

/// Handle the provider callback.
///
/// The state is consumed first, success or failure alike; a replayed state
/// (including a concurrent duplicate delivery) fails with `InvalidState`.
/// Everything after consumption works off the bound record and the snapshot
/// it carries.
///
/// # Errors
/// `InvalidState` for unknown/expired/replayed states or a nonce mismatch;
/// `UpstreamProvider` when the exchange or claim fetch fails.
#[allow(clippy::too_many_arguments)]
pub async fn handle_callback(
    pool: &PgPool,
    svc: &ServiceState,
    provider_id: &str,
    code: Option<&str>,
    state: Option<&str>,
    error: Option<&str>,
    error_description: Option<&str>,
    session_token_hash: Option<&[u8]>,
) -> Result<CallbackOutcome, FlowError> {
    let state_value = state.ok_or(FlowError::InvalidState)?;
    let record = consume_state_record(pool, &hash_token(state_value))
        .await?
        .ok_or(FlowError::InvalidState)?;
    if record.provider != provider_id {
        return Err(FlowError::InvalidState);
    }

    // Provider-reported errors still consume the state; they surface as a
    // flow message, not a raw protocol error.
    if let Some(error) = error {
        let description = error_description.unwrap_or(error);
        return match record.mode {
            AuthorizationMode::Link => settings::fail_link(pool, svc, &record, description).await,
            AuthorizationMode::Login => login::fail_oidc(pool, svc, &record, description).await,
        };
    }

    let code = code.ok_or(FlowError::InvalidState)?;
    let redirect_uri = svc.config().oidc_redirect_uri(&record.provider);
    let tokens = client::exchange_code(&record.snapshot, &redirect_uri, code).await?;

    let id_token = tokens
        .id_token
        .as_deref()
        .ok_or_else(|| FlowError::UpstreamProvider("token response had no id_token".into()))?;
    let id_claims = claims::decode_id_token(id_token)?;
    if !claims::nonce_matches(&id_claims, &record.nonce_hash) {
        return Err(FlowError::InvalidState);
    }

    let userinfo = match record.snapshot.userinfo_url.as_deref() {
        Some(url) => Some(client::fetch_userinfo(svc.http(), url, &tokens.access_token).await?),
        None => None,
    };
    let subject = claims::merge(id_claims, userinfo)?;

    match record.mode {
        AuthorizationMode::Link => {
            settings::complete_link(pool, svc, &record, &subject, &tokens.scopes).await
        }
        AuthorizationMode::Login => {
            login::complete_oidc_login(
                pool,
                svc,
                &record,
                &subject,
                &tokens.scopes,
                session_token_hash,
            )
            .await
        }
    }
}
