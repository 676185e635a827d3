//! Self-service configuration.
//!
//! Process-wide knobs for flow lifetimes, the privileged-session window, and
//! frontend/public URLs. Provider definitions live in
//! [`crate::oidc::ProviderRegistry`] and are hot-swappable; everything here is
//! fixed at startup.

use url::Url;
use uuid::Uuid;

const DEFAULT_PRIVILEGED_SESSION_MAX_AGE_SECONDS: i64 = 15 * 60;
const DEFAULT_SESSION_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_LOGIN_FLOW_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_SETTINGS_FLOW_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_OIDC_STATE_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_RECOVERY_LINK_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_VERIFICATION_LINK_TTL_SECONDS: i64 = 60 * 60;

#[derive(Clone, Debug)]
pub struct SelfServiceConfig {
    frontend_base_url: String,
    public_base_url: String,
    privileged_session_max_age_seconds: i64,
    session_ttl_seconds: i64,
    login_flow_ttl_seconds: i64,
    settings_flow_ttl_seconds: i64,
    oidc_state_ttl_seconds: i64,
    recovery_link_ttl_seconds: i64,
    verification_link_ttl_seconds: i64,
    allow_last_method_unlink: bool,
    oauth2_admin_url: Option<String>,
    providers_file: Option<String>,
}

impl SelfServiceConfig {
    #[must_use]
    pub fn new(frontend_base_url: String, public_base_url: String) -> Self {
        Self {
            frontend_base_url,
            public_base_url,
            privileged_session_max_age_seconds: DEFAULT_PRIVILEGED_SESSION_MAX_AGE_SECONDS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            login_flow_ttl_seconds: DEFAULT_LOGIN_FLOW_TTL_SECONDS,
            settings_flow_ttl_seconds: DEFAULT_SETTINGS_FLOW_TTL_SECONDS,
            oidc_state_ttl_seconds: DEFAULT_OIDC_STATE_TTL_SECONDS,
            recovery_link_ttl_seconds: DEFAULT_RECOVERY_LINK_TTL_SECONDS,
            verification_link_ttl_seconds: DEFAULT_VERIFICATION_LINK_TTL_SECONDS,
            allow_last_method_unlink: false,
            oauth2_admin_url: None,
            providers_file: None,
        }
    }

    #[must_use]
    pub fn with_privileged_session_max_age_seconds(mut self, seconds: i64) -> Self {
        self.privileged_session_max_age_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_login_flow_ttl_seconds(mut self, seconds: i64) -> Self {
        self.login_flow_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_settings_flow_ttl_seconds(mut self, seconds: i64) -> Self {
        self.settings_flow_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_oidc_state_ttl_seconds(mut self, seconds: i64) -> Self {
        self.oidc_state_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_recovery_link_ttl_seconds(mut self, seconds: i64) -> Self {
        self.recovery_link_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_verification_link_ttl_seconds(mut self, seconds: i64) -> Self {
        self.verification_link_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_allow_last_method_unlink(mut self, allow: bool) -> Self {
        self.allow_last_method_unlink = allow;
        self
    }

    #[must_use]
    pub fn with_oauth2_admin_url(mut self, url: Option<String>) -> Self {
        self.oauth2_admin_url = url;
        self
    }

    #[must_use]
    pub fn with_providers_file(mut self, path: Option<String>) -> Self {
        self.providers_file = path;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn public_base_url(&self) -> &str {
        &self.public_base_url
    }

    #[must_use]
    pub fn privileged_session_max_age_seconds(&self) -> i64 {
        self.privileged_session_max_age_seconds
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn login_flow_ttl_seconds(&self) -> i64 {
        self.login_flow_ttl_seconds
    }

    #[must_use]
    pub fn settings_flow_ttl_seconds(&self) -> i64 {
        self.settings_flow_ttl_seconds
    }

    #[must_use]
    pub fn oidc_state_ttl_seconds(&self) -> i64 {
        self.oidc_state_ttl_seconds
    }

    #[must_use]
    pub fn recovery_link_ttl_seconds(&self) -> i64 {
        self.recovery_link_ttl_seconds
    }

    #[must_use]
    pub fn verification_link_ttl_seconds(&self) -> i64 {
        self.verification_link_ttl_seconds
    }

    #[must_use]
    pub fn allow_last_method_unlink(&self) -> bool {
        self.allow_last_method_unlink
    }

    #[must_use]
    pub fn oauth2_admin_url(&self) -> Option<&str> {
        self.oauth2_admin_url.as_deref()
    }

    #[must_use]
    pub fn providers_file(&self) -> Option<&str> {
        self.providers_file.as_deref()
    }

    /// Only mark cookies secure when the frontend is served over HTTPS.
    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }

    /// Redirect URI registered with every provider, derived from the public
    /// base URL so the callback lands on this service.
    #[must_use]
    pub fn oidc_redirect_uri(&self, provider_id: &str) -> String {
        let base = self.public_base_url.trim_end_matches('/');
        format!("{base}/v1/self-service/oidc/callback/{provider_id}")
    }

    /// Frontend page rendering a settings flow.
    #[must_use]
    pub fn settings_ui_url(&self, flow_id: Uuid) -> String {
        let base = self.frontend_base_url.trim_end_matches('/');
        format!("{base}/settings?flow={flow_id}")
    }

    /// Frontend page rendering a login flow.
    #[must_use]
    pub fn login_ui_url(&self, flow_id: Uuid) -> String {
        let base = self.frontend_base_url.trim_end_matches('/');
        format!("{base}/login?flow={flow_id}")
    }

    /// Where the browser lands after a login with no explicit return pointer.
    #[must_use]
    pub fn default_return_url(&self) -> String {
        self.frontend_base_url.trim_end_matches('/').to_string()
    }

    /// Endpoint that creates a forced re-authentication flow pointing back at
    /// the given settings flow.
    #[must_use]
    pub fn reauth_redirect_url(&self, settings_flow_id: Uuid) -> String {
        let base = self.public_base_url.trim_end_matches('/');
        format!("{base}/v1/self-service/login/browser?refresh=true&return_to={settings_flow_id}")
    }

    /// The exact origin of the frontend, for CORS.
    ///
    /// # Errors
    /// Returns an error if the frontend base URL cannot be parsed.
    pub fn frontend_origin(&self) -> anyhow::Result<String> {
        let parsed = Url::parse(&self.frontend_base_url)?;
        let host = parsed
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("frontend base URL must include a host"))?;
        let port = parsed
            .port()
            .map_or_else(String::new, |port| format!(":{port}"));
        Ok(format!("{}://{}{}", parsed.scheme(), host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SelfServiceConfig {
        SelfServiceConfig::new(
            "https://account.varco.dev".to_string(),
            "https://api.varco.dev".to_string(),
        )
    }

    #[test]
    fn defaults_and_overrides() {
        let config = config();
        assert_eq!(
            config.privileged_session_max_age_seconds(),
            DEFAULT_PRIVILEGED_SESSION_MAX_AGE_SECONDS
        );
        assert_eq!(config.session_ttl_seconds(), DEFAULT_SESSION_TTL_SECONDS);
        assert!(!config.allow_last_method_unlink());
        assert_eq!(config.oauth2_admin_url(), None);

        let config = config
            .with_privileged_session_max_age_seconds(1)
            .with_session_ttl_seconds(60)
            .with_login_flow_ttl_seconds(120)
            .with_settings_flow_ttl_seconds(180)
            .with_oidc_state_ttl_seconds(240)
            .with_recovery_link_ttl_seconds(300)
            .with_verification_link_ttl_seconds(360)
            .with_allow_last_method_unlink(true)
            .with_oauth2_admin_url(Some("https://hydra.localhost:4445".to_string()));

        assert_eq!(config.privileged_session_max_age_seconds(), 1);
        assert_eq!(config.session_ttl_seconds(), 60);
        assert_eq!(config.login_flow_ttl_seconds(), 120);
        assert_eq!(config.settings_flow_ttl_seconds(), 180);
        assert_eq!(config.oidc_state_ttl_seconds(), 240);
        assert_eq!(config.recovery_link_ttl_seconds(), 300);
        assert_eq!(config.verification_link_ttl_seconds(), 360);
        assert!(config.allow_last_method_unlink());
        assert_eq!(
            config.oauth2_admin_url(),
            Some("https://hydra.localhost:4445")
        );
    }

    #[test]
    fn cookie_secure_follows_frontend_scheme() {
        assert!(config().session_cookie_secure());
        let insecure = SelfServiceConfig::new(
            "http://localhost:4455".to_string(),
            "http://localhost:4433".to_string(),
        );
        assert!(!insecure.session_cookie_secure());
    }

    #[test]
    fn urls_trim_trailing_slashes() {
        let config = SelfServiceConfig::new(
            "https://account.varco.dev/".to_string(),
            "https://api.varco.dev/".to_string(),
        );
        assert_eq!(
            config.oidc_redirect_uri("google"),
            "https://api.varco.dev/v1/self-service/oidc/callback/google"
        );
        let flow = Uuid::nil();
        assert_eq!(
            config.settings_ui_url(flow),
            format!("https://account.varco.dev/settings?flow={flow}")
        );
        assert_eq!(
            config.reauth_redirect_url(flow),
            format!("https://api.varco.dev/v1/self-service/login/browser?refresh=true&return_to={flow}")
        );
    }

    #[test]
    fn frontend_origin_strips_path() {
        let config = SelfServiceConfig::new(
            "https://account.varco.dev:8443/app/".to_string(),
            "https://api.varco.dev".to_string(),
        );
        assert_eq!(
            config.frontend_origin().ok().as_deref(),
            Some("https://account.varco.dev:8443")
        );
    }
}
