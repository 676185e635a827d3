//! Database helpers for session state.

use anyhow::{Context, Result, anyhow};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{AssuranceLevel, AuthenticationMethod, SessionRecord};
use crate::identity::storage::is_unique_violation;
use crate::token::{generate_token, hash_token};

/// Create a session for an identity and return the raw token.
///
/// The raw value is only returned to set the cookie; the database stores a
/// hash. Token collisions are retried a bounded number of times.
pub async fn insert_session(
    pool: &PgPool,
    identity_id: Uuid,
    method: &AuthenticationMethod,
    ttl_seconds: i64,
) -> Result<String> {
    let methods = vec![method.clone()];
    let methods_text =
        serde_json::to_string(&methods).context("failed to serialize authentication methods")?;
    let aal = AssuranceLevel::from_methods(&methods);

    let query = r"
        INSERT INTO sessions
            (identity_id, token_hash, authenticated_at, authentication_methods, aal, expires_at)
        VALUES ($1, $2, NOW(), $3::jsonb, $4, NOW() + ($5 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let token = generate_token()?;
        let token_hash = hash_token(&token);
        let result = sqlx::query(query)
            .bind(identity_id)
            .bind(&token_hash)
            .bind(&methods_text)
            .bind(aal.as_str())
            .bind(ttl_seconds)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }

    Err(anyhow!("failed to generate unique session token"))
}

/// Resolve a token hash into a session joined with its identity.
pub async fn lookup_session(pool: &PgPool, token_hash: &[u8]) -> Result<Option<SessionRecord>> {
    let query = r"
        SELECT sessions.id,
               sessions.identity_id,
               identities.email,
               sessions.authenticated_at,
               sessions.authentication_methods::text AS authentication_methods,
               sessions.expires_at
        FROM sessions
        JOIN identities ON identities.id = sessions.identity_id
        WHERE sessions.token_hash = $1
          AND sessions.expires_at > NOW()
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let methods_text: String = row.get("authentication_methods");
    let authentication_methods: Vec<AuthenticationMethod> = serde_json::from_str(&methods_text)
        .context("failed to parse authentication methods")?;
    let aal = AssuranceLevel::from_methods(&authentication_methods);

    Ok(Some(SessionRecord {
        id: row.get("id"),
        identity_id: row.get("identity_id"),
        email: row.get("email"),
        authenticated_at: row.get("authenticated_at"),
        authentication_methods,
        aal,
        expires_at: row.get("expires_at"),
    }))
}

/// Refresh the session's `authenticated_at` and append the method used.
///
/// This is what makes a previously stale session pass the privileged-session
/// check again. Returns false when no live session matched.
pub async fn refresh_session_auth(
    pool: &PgPool,
    token_hash: &[u8],
    method: &AuthenticationMethod,
) -> Result<bool> {
    let appended = vec![method.clone()];
    let appended_text =
        serde_json::to_string(&appended).context("failed to serialize authentication method")?;

    let query = r"
        UPDATE sessions
        SET authenticated_at = NOW(),
            authentication_methods = authentication_methods || $2::jsonb
        WHERE token_hash = $1
          AND expires_at > NOW()
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .bind(&appended_text)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to refresh session auth time")?;
    Ok(row.is_some())
}

/// Logout is idempotent; it's fine if no rows are deleted.
pub async fn delete_session(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    let query = "DELETE FROM sessions WHERE token_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete session")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::session::AuthenticationMethod;
    use chrono::Utc;

    #[test]
    fn appended_method_serializes_as_single_element_array() -> anyhow::Result<()> {
        // refresh_session_auth relies on `||` appending a one-element array.
        let method = AuthenticationMethod::oidc("hydra", Utc::now());
        let text = serde_json::to_string(&vec![method])?;
        let value: serde_json::Value = serde_json::from_str(&text)?;
        let array = value.as_array().expect("should be an array");
        assert_eq!(array.len(), 1);
        assert_eq!(
            array[0].get("provider").and_then(serde_json::Value::as_str),
            Some("hydra")
        );
        Ok(())
    }
}
