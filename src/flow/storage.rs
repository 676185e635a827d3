//! Database helpers for flow state.
//!
//! Flow rows carry an optimistic `version` counter. Submissions claim the
//! flow with a compare-and-swap on (id, state, version); the losing side of
//! a concurrent duplicate submission observes zero rows and is rejected
//! instead of interleaving.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::Instrument;
use uuid::Uuid;

use super::{LoginFlowState, RequestedAal, SettingsAction, SettingsFlowState};
use crate::messages::UiMessage;

#[derive(Clone, Debug)]
pub struct SettingsFlowRecord {
    pub id: Uuid,
    pub identity_id: Uuid,
    pub csrf_token_hash: Vec<u8>,
    pub state: SettingsFlowState,
    pub pending_action: Option<SettingsAction>,
    pub messages: Vec<UiMessage>,
    pub version: i64,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct LoginFlowRecord {
    pub id: Uuid,
    pub csrf_token_hash: Vec<u8>,
    pub requested_aal: RequestedAal,
    pub reauth_identity: Option<Uuid>,
    pub login_challenge: Option<String>,
    pub return_to: Option<String>,
    pub state: LoginFlowState,
    pub messages: Vec<UiMessage>,
    pub version: i64,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

const SETTINGS_COLUMNS: &str = r"
    id, identity_id, csrf_token_hash, state, pending_action::text AS pending_action,
    messages::text AS messages, version, issued_at, expires_at
";

const LOGIN_COLUMNS: &str = r"
    id, csrf_token_hash, requested_aal, reauth_identity, login_challenge,
    return_to, state, messages::text AS messages, version, issued_at, expires_at
";

pub async fn insert_settings_flow(
    pool: &PgPool,
    identity_id: Uuid,
    csrf_token_hash: &[u8],
    ttl_seconds: i64,
) -> Result<SettingsFlowRecord> {
    let query = format!(
        r"
        INSERT INTO settings_flows (identity_id, csrf_token_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        RETURNING {SETTINGS_COLUMNS}
    "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(identity_id)
        .bind(csrf_token_hash)
        .bind(ttl_seconds)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to insert settings flow")?;
    settings_flow_from_row(&row)
}

pub async fn lookup_settings_flow(
    pool: &PgPool,
    flow_id: Uuid,
) -> Result<Option<SettingsFlowRecord>> {
    let query = format!("SELECT {SETTINGS_COLUMNS} FROM settings_flows WHERE id = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(flow_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup settings flow")?;
    row.as_ref().map(settings_flow_from_row).transpose()
}

/// Claim a settings flow for one submission.
///
/// Returns false when the state or version no longer match, i.e. a
/// concurrent submission already claimed the flow.
pub async fn claim_settings_flow(
    pool: &PgPool,
    flow_id: Uuid,
    from_state: SettingsFlowState,
    version: i64,
) -> Result<bool> {
    let query = r"
        UPDATE settings_flows
        SET version = version + 1
        WHERE id = $1 AND state = $2 AND version = $3
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(flow_id)
        .bind(from_state.as_str())
        .bind(version)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to claim settings flow")?;
    Ok(row.is_some())
}

pub async fn mark_settings_succeeded(
    pool: &PgPool,
    flow_id: Uuid,
    message: &UiMessage,
) -> Result<()> {
    let message_text = one_message(message)?;
    let query = r"
        UPDATE settings_flows
        SET state = 'succeeded',
            pending_action = NULL,
            messages = messages || $2::jsonb
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(flow_id)
        .bind(&message_text)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to mark settings flow succeeded")?;
    Ok(())
}

pub async fn mark_settings_needs_reauth(
    pool: &PgPool,
    flow_id: Uuid,
    pending_action: &SettingsAction,
    message: &UiMessage,
) -> Result<()> {
    let action_text =
        serde_json::to_string(pending_action).context("failed to serialize pending action")?;
    let message_text = one_message(message)?;
    let query = r"
        UPDATE settings_flows
        SET state = 'needs_reauth',
            pending_action = $2::jsonb,
            messages = messages || $3::jsonb
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(flow_id)
        .bind(&action_text)
        .bind(&message_text)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to mark settings flow needs_reauth")?;
    Ok(())
}

/// Bring a flow back from `needs_reauth` before re-dispatching its pending
/// action; the action itself travels with the caller, not the row.
pub async fn reactivate_settings_flow(pool: &PgPool, flow_id: Uuid) -> Result<()> {
    let query = r"
        UPDATE settings_flows
        SET state = 'active', pending_action = NULL
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(flow_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to reactivate settings flow")?;
    Ok(())
}

pub async fn append_settings_message(
    pool: &PgPool,
    flow_id: Uuid,
    message: &UiMessage,
) -> Result<()> {
    let message_text = one_message(message)?;
    let query = r"
        UPDATE settings_flows
        SET messages = messages || $2::jsonb
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(flow_id)
        .bind(&message_text)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to append settings flow message")?;
    Ok(())
}

pub async fn insert_login_flow(
    pool: &PgPool,
    csrf_token_hash: &[u8],
    requested_aal: RequestedAal,
    reauth_identity: Option<Uuid>,
    login_challenge: Option<&str>,
    return_to: Option<&str>,
    ttl_seconds: i64,
) -> Result<LoginFlowRecord> {
    let query = format!(
        r"
        INSERT INTO login_flows
            (csrf_token_hash, requested_aal, reauth_identity, login_challenge, return_to, expires_at)
        VALUES ($1, $2, $3, $4, $5, NOW() + ($6 * INTERVAL '1 second'))
        RETURNING {LOGIN_COLUMNS}
    "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(csrf_token_hash)
        .bind(requested_aal.as_str())
        .bind(reauth_identity)
        .bind(login_challenge)
        .bind(return_to)
        .bind(ttl_seconds)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to insert login flow")?;
    login_flow_from_row(&row)
}

pub async fn lookup_login_flow(pool: &PgPool, flow_id: Uuid) -> Result<Option<LoginFlowRecord>> {
    let query = format!("SELECT {LOGIN_COLUMNS} FROM login_flows WHERE id = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(flow_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup login flow")?;
    row.as_ref().map(login_flow_from_row).transpose()
}

/// Claim an active login flow for one submission (see settings counterpart).
pub async fn claim_login_flow(pool: &PgPool, flow_id: Uuid, version: i64) -> Result<bool> {
    let query = r"
        UPDATE login_flows
        SET version = version + 1
        WHERE id = $1 AND state = 'active' AND version = $2
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(flow_id)
        .bind(version)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to claim login flow")?;
    Ok(row.is_some())
}

pub async fn mark_login_state(
    pool: &PgPool,
    flow_id: Uuid,
    state: LoginFlowState,
) -> Result<()> {
    let query = "UPDATE login_flows SET state = $2 WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(flow_id)
        .bind(state.as_str())
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update login flow state")?;
    Ok(())
}

pub async fn append_login_message(
    pool: &PgPool,
    flow_id: Uuid,
    message: &UiMessage,
) -> Result<()> {
    let message_text = one_message(message)?;
    let query = r"
        UPDATE login_flows
        SET messages = messages || $2::jsonb
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(flow_id)
        .bind(&message_text)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to append login flow message")?;
    Ok(())
}

fn one_message(message: &UiMessage) -> Result<String> {
    serde_json::to_string(&[message]).context("failed to serialize flow message")
}

fn settings_flow_from_row(row: &PgRow) -> Result<SettingsFlowRecord> {
    let state: String = row.get("state");
    let state = SettingsFlowState::from_str(&state)
        .with_context(|| format!("unknown settings flow state: {state}"))?;
    let pending_action = row
        .get::<Option<String>, _>("pending_action")
        .map(|text| serde_json::from_str(&text).context("failed to parse pending action"))
        .transpose()?;
    let messages_text: String = row.get("messages");
    let messages =
        serde_json::from_str(&messages_text).context("failed to parse flow messages")?;

    Ok(SettingsFlowRecord {
        id: row.get("id"),
        identity_id: row.get("identity_id"),
        csrf_token_hash: row.get("csrf_token_hash"),
        state,
        pending_action,
        messages,
        version: row.get("version"),
        issued_at: row.get("issued_at"),
        expires_at: row.get("expires_at"),
    })
}

fn login_flow_from_row(row: &PgRow) -> Result<LoginFlowRecord> {
    let requested_aal: String = row.get("requested_aal");
    let requested_aal = RequestedAal::from_str(&requested_aal)
        .with_context(|| format!("unknown requested aal: {requested_aal}"))?;
    let state: String = row.get("state");
    let state = LoginFlowState::from_str(&state)
        .with_context(|| format!("unknown login flow state: {state}"))?;
    let messages_text: String = row.get("messages");
    let messages =
        serde_json::from_str(&messages_text).context("failed to parse flow messages")?;

    Ok(LoginFlowRecord {
        id: row.get("id"),
        csrf_token_hash: row.get("csrf_token_hash"),
        requested_aal,
        reauth_identity: row.get("reauth_identity"),
        login_challenge: row.get("login_challenge"),
        return_to: row.get("return_to"),
        state,
        messages,
        version: row.get("version"),
        issued_at: row.get("issued_at"),
        expires_at: row.get("expires_at"),
    })
}

#[cfg(test)]
mod tests {
    use crate::messages::UiMessage;

    #[test]
    fn one_message_serializes_as_array() -> anyhow::Result<()> {
        // Flow message appends rely on `||` with a one-element jsonb array.
        let text = super::one_message(&UiMessage::settings_saved())?;
        let value: serde_json::Value = serde_json::from_str(&text)?;
        let array = value.as_array().expect("should be an array");
        assert_eq!(array.len(), 1);
        assert_eq!(
            array[0].get("id").and_then(serde_json::Value::as_u64),
            Some(1_050_001)
        );
        Ok(())
    }
}
