//! Database helpers for identities and credentials.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{Credential, CredentialMethod, Identity};

/// Outcome when attaching a provider identity to a local identity.
#[derive(Debug, Eq, PartialEq)]
pub enum LinkOutcome {
    /// A new credential was created under the target identity.
    Linked,
    /// The credential already exists under the same identity.
    AlreadyLinked,
    /// The (provider, subject) pair belongs to a different identity.
    Conflict,
}

/// Outcome when auto-registering an identity from provider claims.
#[derive(Debug)]
pub enum RegisterOutcome {
    Created(Identity),
    /// The email identifier or the (provider, subject) pair is already taken.
    Conflict,
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

pub async fn find_identity_by_oidc(
    pool: &PgPool,
    provider: &str,
    subject: &str,
) -> Result<Option<Identity>> {
    let query = r"
        SELECT identities.id, identities.email, identities.traits::text AS traits
        FROM identity_credentials
        JOIN identities ON identities.id = identity_credentials.identity_id
        WHERE identity_credentials.method = 'oidc'
          AND identity_credentials.provider = $1
          AND identity_credentials.subject = $2
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(provider)
        .bind(subject)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup identity by provider subject")?;
    row.map(identity_from_row).transpose()
}

pub async fn list_credentials(pool: &PgPool, identity_id: Uuid) -> Result<Vec<Credential>> {
    let query = r"
        SELECT id, identity_id, method, provider, subject, scopes
        FROM identity_credentials
        WHERE identity_id = $1
        ORDER BY created_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(identity_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list credentials")?;

    rows.into_iter()
        .map(|row| {
            let method: String = row.get("method");
            let method = CredentialMethod::from_str(&method)
                .with_context(|| format!("unknown credential method: {method}"))?;
            Ok(Credential {
                id: row.get("id"),
                identity_id: row.get("identity_id"),
                method,
                provider: row.get("provider"),
                subject: row.get("subject"),
                scopes: row.get("scopes"),
            })
        })
        .collect()
}

/// Number of distinct ways this identity can sign in.
pub async fn count_auth_methods(pool: &PgPool, identity_id: Uuid) -> Result<i64> {
    let query = "SELECT COUNT(*) AS methods FROM identity_credentials WHERE identity_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(identity_id)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count auth methods")?;
    Ok(row.get("methods"))
}

pub async fn password_hash_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<(Uuid, String)>> {
    let query = r"
        SELECT identities.id, identity_credentials.password_hash
        FROM identities
        JOIN identity_credentials ON identity_credentials.identity_id = identities.id
        WHERE identities.email = $1
          AND identity_credentials.method = 'password'
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup password credential")?;
    Ok(row.map(|row| (row.get("id"), row.get("password_hash"))))
}

/// Set or replace the password credential for an identity.
pub async fn upsert_password_credential(
    pool: &PgPool,
    identity_id: Uuid,
    password_hash: &str,
) -> Result<()> {
    let query = r"
        INSERT INTO identity_credentials (identity_id, method, password_hash)
        VALUES ($1, 'password', $2)
        ON CONFLICT (identity_id) WHERE method = 'password'
        DO UPDATE SET password_hash = EXCLUDED.password_hash
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(identity_id)
        .bind(password_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to upsert password credential")?;
    Ok(())
}

/// Attach (provider, subject) to the target identity.
///
/// The unique index on (provider, subject) is the arbiter under concurrency:
/// two racing link attempts for the same external subject get exactly one
/// `Linked` and one `Conflict`.
pub async fn link_oidc_credential(
    pool: &PgPool,
    identity_id: Uuid,
    provider: &str,
    subject: &str,
    scopes: &[String],
) -> Result<LinkOutcome> {
    let query = r"
        SELECT identity_id
        FROM identity_credentials
        WHERE method = 'oidc' AND provider = $1 AND subject = $2
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let existing = sqlx::query(query)
        .bind(provider)
        .bind(subject)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup existing link")?;

    if let Some(row) = existing {
        let owner: Uuid = row.get("identity_id");
        return Ok(if owner == identity_id {
            LinkOutcome::AlreadyLinked
        } else {
            LinkOutcome::Conflict
        });
    }

    let query = r"
        INSERT INTO identity_credentials (identity_id, method, provider, subject, scopes)
        VALUES ($1, 'oidc', $2, $3, $4)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(identity_id)
        .bind(provider)
        .bind(subject)
        .bind(scopes)
        .execute(pool)
        .instrument(span)
        .await;

    match result {
        Ok(_) => Ok(LinkOutcome::Linked),
        Err(err) if is_unique_violation(&err) => Ok(LinkOutcome::Conflict),
        Err(err) => Err(err).context("failed to insert oidc credential"),
    }
}

/// Remove the provider credential from an identity. Returns whether a
/// credential was actually deleted.
pub async fn unlink_oidc_credential(
    pool: &PgPool,
    identity_id: Uuid,
    provider: &str,
) -> Result<bool> {
    let query = r"
        DELETE FROM identity_credentials
        WHERE identity_id = $1 AND method = 'oidc' AND provider = $2
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(identity_id)
        .bind(provider)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to unlink oidc credential")?;
    Ok(result.rows_affected() > 0)
}

/// Create a new identity from provider claims together with its first
/// credential, in one transaction.
///
/// Both the email identifier and the (provider, subject) pair can collide
/// with existing rows; either way the transaction rolls back and the caller
/// sees `Conflict`.
pub async fn create_identity_with_oidc_credential(
    pool: &PgPool,
    email: &str,
    traits: &serde_json::Value,
    provider: &str,
    subject: &str,
    scopes: &[String],
) -> Result<RegisterOutcome> {
    let mut tx = pool.begin().await.context("begin registration transaction")?;

    let traits_text =
        serde_json::to_string(traits).context("failed to serialize identity traits")?;
    let query = r"
        INSERT INTO identities (email, traits)
        VALUES ($1, $2::jsonb)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(&traits_text)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await;

    let identity_id: Uuid = match row {
        Ok(row) => row.get("id"),
        Err(err) => {
            if is_unique_violation(&err) {
                let _ = tx.rollback().await;
                return Ok(RegisterOutcome::Conflict);
            }
            return Err(err).context("failed to insert identity");
        }
    };

    let query = r"
        INSERT INTO identity_credentials (identity_id, method, provider, subject, scopes)
        VALUES ($1, 'oidc', $2, $3, $4)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(identity_id)
        .bind(provider)
        .bind(subject)
        .bind(scopes)
        .execute(&mut *tx)
        .instrument(span)
        .await;

    if let Err(err) = result {
        if is_unique_violation(&err) {
            let _ = tx.rollback().await;
            return Ok(RegisterOutcome::Conflict);
        }
        return Err(err).context("failed to insert registration credential");
    }

    tx.commit().await.context("commit registration transaction")?;

    Ok(RegisterOutcome::Created(Identity {
        id: identity_id,
        email: email.to_string(),
        traits: traits.clone(),
    }))
}

fn identity_from_row(row: sqlx::postgres::PgRow) -> Result<Identity> {
    let traits_text: String = row.get("traits");
    let traits =
        serde_json::from_str(&traits_text).context("failed to parse identity traits")?;
    Ok(Identity {
        id: row.get("id"),
        email: row.get("email"),
        traits,
    })
}

#[cfg(test)]
mod tests {
    use super::{LinkOutcome, RegisterOutcome, is_unique_violation};
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[test]
    fn link_outcome_debug_names() {
        assert_eq!(format!("{:?}", LinkOutcome::Linked), "Linked");
        assert_eq!(format!("{:?}", LinkOutcome::AlreadyLinked), "AlreadyLinked");
        assert_eq!(format!("{:?}", LinkOutcome::Conflict), "Conflict");
    }

    #[test]
    fn register_outcome_conflict_debug_name() {
        assert_eq!(format!("{:?}", RegisterOutcome::Conflict), "Conflict");
    }

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn is_unique_violation_matches_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("40001"),
        }));
        assert!(!is_unique_violation(&err));

        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
