//! Persisted OAuth2 state records.
//!
//! One row per authorization redirect. The row binds everything the callback
//! needs (mode, flow, nonce, CSRF hash, and for link mode the target
//! identity), so the callback request itself is never trusted for any of it.
//! Consumption is a conditional UPDATE: the first callback wins, replays and
//! concurrent duplicates observe zero rows.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::providers::ProviderSnapshot;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuthorizationMode {
    Login,
    Link,
}

impl AuthorizationMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Link => "link",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "login" => Some(Self::Login),
            "link" => Some(Self::Link),
            _ => None,
        }
    }
}

/// A consumed state record, handed to the mode-specific completion logic.
#[derive(Debug)]
pub struct StateRecord {
    pub id: Uuid,
    pub provider: String,
    pub snapshot: ProviderSnapshot,
    pub mode: AuthorizationMode,
    pub flow_id: Uuid,
    pub identity_id: Option<Uuid>,
    pub nonce_hash: Vec<u8>,
    pub csrf_token_hash: Vec<u8>,
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_state_record(
    pool: &PgPool,
    state_hash: &[u8],
    nonce_hash: &[u8],
    provider: &str,
    snapshot: &ProviderSnapshot,
    mode: AuthorizationMode,
    flow_id: Uuid,
    identity_id: Option<Uuid>,
    csrf_token_hash: &[u8],
    ttl_seconds: i64,
) -> Result<()> {
    let snapshot_text =
        serde_json::to_string(snapshot).context("failed to serialize provider snapshot")?;
    let query = r"
        INSERT INTO oidc_flow_states
            (state_hash, nonce_hash, provider, provider_snapshot, mode, flow_id,
             identity_id, csrf_token_hash, expires_at)
        VALUES ($1, $2, $3, $4::jsonb, $5, $6, $7, $8, NOW() + ($9 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(state_hash)
        .bind(nonce_hash)
        .bind(provider)
        .bind(&snapshot_text)
        .bind(mode.as_str())
        .bind(flow_id)
        .bind(identity_id)
        .bind(csrf_token_hash)
        .bind(ttl_seconds)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert oidc state record")?;
    Ok(())
}

/// Consume a state record, success or failure alike.
///
/// Returns `None` for unknown, expired, or already-consumed states; the
/// caller cannot distinguish a replay from garbage, by construction.
pub async fn consume_state_record(
    pool: &PgPool,
    state_hash: &[u8],
) -> Result<Option<StateRecord>> {
    let query = r"
        UPDATE oidc_flow_states
        SET consumed_at = NOW()
        WHERE state_hash = $1
          AND consumed_at IS NULL
          AND expires_at > NOW()
        RETURNING id, provider, provider_snapshot::text AS provider_snapshot,
                  mode, flow_id, identity_id, nonce_hash, csrf_token_hash
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(state_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to consume oidc state record")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let snapshot_text: String = row.get("provider_snapshot");
    let snapshot: ProviderSnapshot =
        serde_json::from_str(&snapshot_text).context("failed to parse provider snapshot")?;
    let mode: String = row.get("mode");
    let mode = AuthorizationMode::from_str(&mode)
        .with_context(|| format!("unknown authorization mode: {mode}"))?;

    Ok(Some(StateRecord {
        id: row.get("id"),
        provider: row.get("provider"),
        snapshot,
        mode,
        flow_id: row.get("flow_id"),
        identity_id: row.get("identity_id"),
        nonce_hash: row.get("nonce_hash"),
        csrf_token_hash: row.get("csrf_token_hash"),
    }))
}

#[cfg(test)]
mod tests {
    use super::AuthorizationMode;

    #[test]
    fn authorization_mode_round_trips() {
        assert_eq!(AuthorizationMode::Login.as_str(), "login");
        assert_eq!(AuthorizationMode::Link.as_str(), "link");
        assert_eq!(
            AuthorizationMode::from_str("login"),
            Some(AuthorizationMode::Login)
        );
        assert_eq!(
            AuthorizationMode::from_str("link"),
            Some(AuthorizationMode::Link)
        );
        assert_eq!(AuthorizationMode::from_str("register"), None);
    }
}
