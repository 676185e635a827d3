//! Session endpoints and cookie plumbing.

use axum::{
    Json,
    extract::Extension,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{AUTHORIZATION, InvalidHeaderValue, SET_COOKIE},
    },
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::types::SessionResponse;
use crate::config::SelfServiceConfig;
use crate::session::{SessionRecord, storage::delete_session, storage::lookup_session};
use crate::state::ServiceState;
use crate::token::hash_token;

const SESSION_COOKIE_NAME: &str = "varco_session";

#[utoipa::path(
    get,
    path = "/v1/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 204, description = "No active session")
    ),
    tag = "session"
)]
pub async fn whoami(headers: HeaderMap, pool: Extension<PgPool>) -> impl IntoResponse {
    // Missing cookies are treated as "no session" to avoid leaking auth state.
    let Some(token) = extract_session_token(&headers) else {
        return StatusCode::NO_CONTENT.into_response();
    };
    let token_hash = hash_token(&token);
    match lookup_session(&pool, &token_hash).await {
        Ok(Some(session)) => {
            let response = SessionResponse {
                identity_id: session.identity_id.to_string(),
                email: session.email,
                authenticated_at: session.authenticated_at,
                aal: session.aal,
                authentication_methods: session.authentication_methods,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!("Failed to lookup session: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "session"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    svc: Extension<Arc<ServiceState>>,
) -> impl IntoResponse {
    if let Some(token) = extract_session_token(&headers) {
        let token_hash = hash_token(&token);
        if let Err(err) = delete_session(&pool, &token_hash).await {
            error!("Failed to delete session: {err}");
        }
    }

    // Always clear the cookie, even if the session record was missing.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(svc.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, response_headers).into_response()
}

/// Resolve the session cookie into a session record, if present.
///
/// Returns `Ok(None)` when the cookie is missing or invalid.
pub(crate) async fn authenticate_session(
    headers: &HeaderMap,
    pool: &PgPool,
) -> Result<Option<SessionRecord>, StatusCode> {
    let Some(token) = extract_session_token(headers) else {
        return Ok(None);
    };
    let token_hash = hash_token(&token);
    match lookup_session(pool, &token_hash).await {
        Ok(record) => Ok(record),
        Err(err) => {
            error!("Failed to lookup session: {err}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Resolve the session cookie or return 401.
pub(crate) async fn require_auth(
    headers: &HeaderMap,
    pool: &PgPool,
) -> Result<SessionRecord, StatusCode> {
    match authenticate_session(headers, pool).await? {
        Some(session) => Ok(session),
        None => Err(StatusCode::UNAUTHORIZED),
    }
}

/// The hash of the presented session token, for refresh-in-place operations.
pub(crate) fn session_token_hash(headers: &HeaderMap) -> Option<Vec<u8>> {
    extract_session_token(headers).map(|token| hash_token(&token))
}

/// Build a secure `HttpOnly` cookie for the session token.
pub(crate) fn session_cookie(
    config: &SelfServiceConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = config.session_ttl_seconds();
    let secure = config.session_cookie_secure();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn clear_session_cookie(config: &SelfServiceConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let secure = config.session_cookie_secure();
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == SESSION_COOKIE_NAME {
            return Some(val.to_string());
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() { None } else { Some(token.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::COOKIE;

    fn config(frontend: &str) -> SelfServiceConfig {
        SelfServiceConfig::new(frontend.to_string(), "https://api.varco.dev".to_string())
    }

    #[test]
    fn extract_session_token_prefers_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(
            COOKIE,
            HeaderValue::from_static("varco_session=from-cookie"),
        );
        assert_eq!(extract_session_token(&headers), Some("abc".to_string()));
    }

    #[test]
    fn extract_session_token_reads_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("other=1; varco_session=tok; theme=dark"),
        );
        assert_eq!(extract_session_token(&headers), Some("tok".to_string()));
    }

    #[test]
    fn extract_session_token_none_when_missing() {
        let headers = HeaderMap::new();
        assert_eq!(extract_session_token(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer  "));
        assert_eq!(extract_session_token(&headers), None);
    }

    #[test]
    fn session_cookie_secure_only_on_https_frontend() {
        let secure = session_cookie(&config("https://account.varco.dev"), "tok")
            .ok()
            .and_then(|value| value.to_str().ok().map(ToString::to_string));
        let secure = secure.expect("cookie should build");
        assert!(secure.contains("HttpOnly"));
        assert!(secure.contains("Secure"));

        let insecure = session_cookie(&config("http://localhost:4455"), "tok")
            .ok()
            .and_then(|value| value.to_str().ok().map(ToString::to_string));
        let insecure = insecure.expect("cookie should build");
        assert!(!insecure.contains("Secure"));
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        let cookie = clear_session_cookie(&config("https://account.varco.dev"))
            .ok()
            .and_then(|value| value.to_str().ok().map(ToString::to_string));
        let cookie = cookie.expect("cookie should build");
        assert!(cookie.contains("Max-Age=0"));
    }
}
