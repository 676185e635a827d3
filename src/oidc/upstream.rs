//! Upstream OAuth2 provider (admin API) integration.
//!
//! When a login flow carries a `login_challenge`, the login is embedded in an
//! authorization request owned by an upstream OAuth2 server. The request must
//! always be terminated: accepted on success, rejected with a recoverable
//! denial on failure or abandonment, never left dangling.

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};

/// Accept the upstream login request for the given subject.
///
/// # Errors
/// Returns an error if the admin endpoint is unreachable or responds without
/// a redirect target.
pub async fn accept_login_request(
    http: &reqwest::Client,
    admin_url: &str,
    login_challenge: &str,
    subject: &str,
) -> Result<String> {
    let endpoint = format!(
        "{}/oauth2/auth/requests/login/accept",
        admin_url.trim_end_matches('/')
    );
    let body = json!({ "subject": subject, "remember": false });
    put_login_request(http, &endpoint, login_challenge, &body)
        .await
        .context("failed to accept upstream login request")
}

/// Reject the upstream login request so the authorization request finishes
/// with a denial the client application can recover from.
///
/// # Errors
/// Returns an error if the admin endpoint is unreachable or responds without
/// a redirect target.
pub async fn reject_login_request(
    http: &reqwest::Client,
    admin_url: &str,
    login_challenge: &str,
    error: &str,
    error_description: &str,
) -> Result<String> {
    let endpoint = format!(
        "{}/oauth2/auth/requests/login/reject",
        admin_url.trim_end_matches('/')
    );
    let body = json!({ "error": error, "error_description": error_description });
    put_login_request(http, &endpoint, login_challenge, &body)
        .await
        .context("failed to reject upstream login request")
}

async fn put_login_request(
    http: &reqwest::Client,
    endpoint: &str,
    login_challenge: &str,
    body: &Value,
) -> Result<String> {
    let response = http
        .put(endpoint)
        .query(&[("login_challenge", login_challenge)])
        .json(body)
        .send()
        .await
        .context("upstream admin request failed")?;

    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("upstream admin returned {status}"));
    }

    let payload: Value = response
        .json()
        .await
        .context("invalid upstream admin response")?;
    payload
        .get("redirect_to")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| anyhow!("upstream admin response missing redirect_to"))
}
