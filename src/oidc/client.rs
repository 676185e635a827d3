//! OAuth2 authorization-code client for OIDC providers.
//!
//! Built on the `oauth2` crate with a token response type that surfaces the
//! `id_token`, which the basic client discards. All endpoint parameters come
//! from a [`ProviderSnapshot`], never from live configuration, so a registry
//! reload cannot change an exchange mid-flight.

use anyhow::{Context, Result};
use oauth2::{
    AuthUrl, AuthorizationCode, Client, ClientId, ClientSecret, CsrfToken, ExtraTokenFields,
    RedirectUrl, Scope, StandardRevocableToken, StandardTokenResponse, TokenResponse, TokenUrl,
    basic::{
        BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
        BasicTokenType,
    },
    reqwest::async_http_client,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use super::providers::ProviderSnapshot;
use crate::flow::FlowError;

const EXCHANGE_TIMEOUT_SECONDS: u64 = 10;

/// Extra token-endpoint fields beyond plain OAuth2.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdTokenFields {
    #[serde(default)]
    pub id_token: Option<String>,
}

impl ExtraTokenFields for IdTokenFields {}

type OidcTokenResponse = StandardTokenResponse<IdTokenFields, BasicTokenType>;

type OidcClient = Client<
    BasicErrorResponse,
    OidcTokenResponse,
    BasicTokenType,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
>;

fn oauth_client(snapshot: &ProviderSnapshot, redirect_uri: &str) -> Result<OidcClient> {
    let auth_url = AuthUrl::new(snapshot.authorization_url.clone())
        .context("invalid authorization endpoint URL")?;
    let token_url =
        TokenUrl::new(snapshot.token_url.clone()).context("invalid token endpoint URL")?;
    let redirect_url =
        RedirectUrl::new(redirect_uri.to_string()).context("invalid redirect URI")?;

    Ok(OidcClient::new(
        ClientId::new(snapshot.client_id.clone()),
        Some(ClientSecret::new(snapshot.client_secret.clone())),
        auth_url,
        Some(token_url),
    )
    .set_redirect_uri(redirect_url))
}

/// Build the authorization redirect with caller-supplied state and nonce.
///
/// `prompt_login` forces the provider to re-prompt for credentials; used when
/// the login flow itself is a forced re-authentication.
///
/// # Errors
/// Returns an error if any snapshot URL is malformed.
pub fn authorization_url(
    snapshot: &ProviderSnapshot,
    redirect_uri: &str,
    state: &str,
    nonce: &str,
    prompt_login: bool,
) -> Result<Url> {
    let client = oauth_client(snapshot, redirect_uri)?;
    let state = state.to_string();
    let mut request = client
        .authorize_url(move || CsrfToken::new(state))
        .add_extra_param("nonce", nonce);
    for scope in &snapshot.scopes {
        request = request.add_scope(Scope::new(scope.clone()));
    }
    if prompt_login {
        request = request.add_extra_param("prompt", "login");
    }
    let (url, _csrf) = request.url();
    Ok(url)
}

/// Tokens obtained from the code exchange.
#[derive(Debug)]
pub struct ExchangedTokens {
    pub access_token: String,
    pub id_token: Option<String>,
    pub scopes: Vec<String>,
}

/// Exchange the authorization code at the snapshotted token endpoint.
///
/// # Errors
/// `UpstreamProvider` when the provider rejects the code or the request
/// fails; `Internal` for malformed snapshot URLs.
pub async fn exchange_code(
    snapshot: &ProviderSnapshot,
    redirect_uri: &str,
    code: &str,
) -> Result<ExchangedTokens, FlowError> {
    let client = oauth_client(snapshot, redirect_uri)?;
    let exchange = client
        .exchange_code(AuthorizationCode::new(code.to_string()))
        .request_async(async_http_client);
    let token = tokio::time::timeout(Duration::from_secs(EXCHANGE_TIMEOUT_SECONDS), exchange)
        .await
        .map_err(|_| FlowError::UpstreamProvider("code exchange timed out".to_string()))?
        .map_err(|err| FlowError::UpstreamProvider(format!("code exchange failed: {err}")))?;

    let scopes = token
        .scopes()
        .map(|scopes| scopes.iter().map(|scope| scope.to_string()).collect())
        .unwrap_or_default();

    Ok(ExchangedTokens {
        access_token: token.access_token().secret().clone(),
        id_token: token.extra_fields().id_token.clone(),
        scopes,
    })
}

/// Claims returned by a provider's userinfo endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct UserinfoClaims {
    pub sub: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub website: Option<String>,
}

/// Fetch subject claims with the access token.
///
/// # Errors
/// `UpstreamProvider` when the endpoint errors or returns an unparsable body.
pub async fn fetch_userinfo(
    http: &reqwest::Client,
    userinfo_url: &str,
    access_token: &str,
) -> Result<UserinfoClaims, FlowError> {
    let response = http
        .get(userinfo_url)
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|err| FlowError::UpstreamProvider(format!("userinfo request failed: {err}")))?;

    if !response.status().is_success() {
        return Err(FlowError::UpstreamProvider(format!(
            "userinfo returned {}",
            response.status()
        )));
    }

    response
        .json::<UserinfoClaims>()
        .await
        .map_err(|err| FlowError::UpstreamProvider(format!("invalid userinfo body: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oidc::providers::{ProviderSnapshot, test_support::provider};

    fn snapshot() -> ProviderSnapshot {
        ProviderSnapshot::of(&provider("hydra"))
    }

    #[test]
    fn authorization_url_carries_state_nonce_and_scopes() -> Result<()> {
        let url = authorization_url(
            &snapshot(),
            "https://api.varco.dev/v1/self-service/oidc/callback/hydra",
            "state-value",
            "nonce-value",
            false,
        )?;

        assert!(url.as_str().starts_with("https://hydra.localhost/oauth2/auth"));
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert!(pairs.contains(&("state".to_string(), "state-value".to_string())));
        assert!(pairs.contains(&("nonce".to_string(), "nonce-value".to_string())));
        assert!(pairs.contains(&("response_type".to_string(), "code".to_string())));
        assert!(pairs.contains(&("scope".to_string(), "openid profile".to_string())));
        assert!(!pairs.iter().any(|(k, _)| k == "prompt"));
        Ok(())
    }

    #[test]
    fn authorization_url_adds_prompt_login_when_forced() -> Result<()> {
        let url = authorization_url(
            &snapshot(),
            "https://api.varco.dev/v1/self-service/oidc/callback/hydra",
            "state-value",
            "nonce-value",
            true,
        )?;
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert!(pairs.contains(&("prompt".to_string(), "login".to_string())));
        Ok(())
    }

    #[test]
    fn authorization_url_rejects_malformed_endpoint() {
        let mut snapshot = snapshot();
        snapshot.authorization_url = "not a url".to_string();
        assert!(
            authorization_url(&snapshot, "https://api.varco.dev/cb", "s", "n", false).is_err()
        );
    }

    #[test]
    fn token_response_parses_id_token_field() -> Result<()> {
        let body = r#"{
            "access_token": "at-123",
            "token_type": "bearer",
            "expires_in": 3600,
            "scope": "openid profile",
            "id_token": "header.payload.signature"
        }"#;
        let token: StandardTokenResponse<IdTokenFields, BasicTokenType> =
            serde_json::from_str(body)?;
        assert_eq!(
            token.extra_fields().id_token.as_deref(),
            Some("header.payload.signature")
        );
        Ok(())
    }
}
