//! OIDC provider configuration and the hot-swappable registry.
//!
//! Provider definitions are process-wide and externally supplied. A reload
//! replaces the registry snapshot for *new* flows only: every authorization
//! redirect persists a [`ProviderSnapshot`] into its state record, so
//! in-flight round-trips finish with the parameters they started with.

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub id: String,
    pub label: String,
    pub issuer_url: String,
    pub authorization_url: String,
    pub token_url: String,
    pub userinfo_url: Option<String>,
    pub client_id: String,
    pub client_secret: SecretString,
    pub scopes: Vec<String>,
    pub enabled: bool,
}

/// On-disk provider definition (JSON array entries).
#[derive(Debug, Deserialize)]
struct ProviderFileEntry {
    id: String,
    #[serde(default)]
    label: Option<String>,
    issuer_url: String,
    authorization_url: String,
    token_url: String,
    #[serde(default)]
    userinfo_url: Option<String>,
    client_id: String,
    client_secret: String,
    #[serde(default)]
    scopes: Vec<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

const fn default_enabled() -> bool {
    true
}

impl From<ProviderFileEntry> for ProviderConfig {
    fn from(entry: ProviderFileEntry) -> Self {
        Self {
            label: entry.label.unwrap_or_else(|| entry.id.clone()),
            id: entry.id,
            issuer_url: entry.issuer_url,
            authorization_url: entry.authorization_url,
            token_url: entry.token_url,
            userinfo_url: entry.userinfo_url,
            client_id: entry.client_id,
            client_secret: SecretString::from(entry.client_secret),
            scopes: entry.scopes,
            enabled: entry.enabled,
        }
    }
}

/// Parse a providers file (JSON array of provider definitions).
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
pub fn load_providers_file(path: &str) -> Result<Vec<ProviderConfig>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read providers file: {path}"))?;
    parse_providers(&raw).with_context(|| format!("invalid providers file: {path}"))
}

/// Parse the providers JSON document.
///
/// # Errors
/// Returns an error when the document is not a JSON array of providers.
pub fn parse_providers(raw: &str) -> Result<Vec<ProviderConfig>> {
    let entries: Vec<ProviderFileEntry> =
        serde_json::from_str(raw).context("failed to parse provider definitions")?;
    Ok(entries.into_iter().map(ProviderConfig::from).collect())
}

/// Versioned provider set. Readers take an `Arc` snapshot; `replace` swaps
/// the whole set and affects only flows created afterwards.
pub struct ProviderRegistry {
    inner: RwLock<Arc<Vec<ProviderConfig>>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new(providers: Vec<ProviderConfig>) -> Self {
        Self {
            inner: RwLock::new(Arc::new(providers)),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<ProviderConfig>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, providers: Vec<ProviderConfig>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(providers);
    }

    /// Find an enabled provider by id.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<ProviderConfig> {
        self.snapshot()
            .iter()
            .find(|provider| provider.id == id && provider.enabled)
            .cloned()
    }

    /// All currently enabled providers, in configuration order.
    #[must_use]
    pub fn enabled(&self) -> Vec<ProviderConfig> {
        self.snapshot()
            .iter()
            .filter(|provider| provider.enabled)
            .cloned()
            .collect()
    }
}

/// Provider parameters captured into an OAuth2 state record.
///
/// The snapshot must be sufficient to finish the code exchange after a
/// registry reload removed the provider, so it carries the client secret;
/// the rows live minutes and are consumed on callback.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderSnapshot {
    pub id: String,
    pub label: String,
    pub authorization_url: String,
    pub token_url: String,
    #[serde(default)]
    pub userinfo_url: Option<String>,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
}

impl ProviderSnapshot {
    #[must_use]
    pub fn of(provider: &ProviderConfig) -> Self {
        Self {
            id: provider.id.clone(),
            label: provider.label.clone(),
            authorization_url: provider.authorization_url.clone(),
            token_url: provider.token_url.clone(),
            userinfo_url: provider.userinfo_url.clone(),
            client_id: provider.client_id.clone(),
            client_secret: provider.client_secret.expose_secret().to_string(),
            scopes: provider.scopes.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::ProviderConfig;
    use secrecy::SecretString;

    pub(crate) fn provider(id: &str) -> ProviderConfig {
        ProviderConfig {
            id: id.to_string(),
            label: id.to_string(),
            issuer_url: format!("https://{id}.localhost"),
            authorization_url: format!("https://{id}.localhost/oauth2/auth"),
            token_url: format!("https://{id}.localhost/oauth2/token"),
            userinfo_url: Some(format!("https://{id}.localhost/userinfo")),
            client_id: format!("{id}-client"),
            client_secret: SecretString::from("s3cret".to_string()),
            scopes: vec!["openid".to_string(), "profile".to_string()],
            enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::provider;
    use super::*;

    #[test]
    fn parse_providers_fills_defaults() -> Result<()> {
        let raw = r#"[
            {
                "id": "hydra",
                "issuer_url": "https://hydra.localhost",
                "authorization_url": "https://hydra.localhost/oauth2/auth",
                "token_url": "https://hydra.localhost/oauth2/token",
                "client_id": "varco-client",
                "client_secret": "varco-secret",
                "scopes": ["openid", "offline"]
            }
        ]"#;
        let providers = parse_providers(raw)?;
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].id, "hydra");
        assert_eq!(providers[0].label, "hydra");
        assert!(providers[0].enabled);
        assert_eq!(providers[0].userinfo_url, None);
        Ok(())
    }

    #[test]
    fn parse_providers_rejects_garbage() {
        assert!(parse_providers("{}").is_err());
        assert!(parse_providers("not json").is_err());
    }

    #[test]
    fn registry_find_skips_disabled() {
        let mut google = provider("google");
        google.enabled = false;
        let registry = ProviderRegistry::new(vec![provider("hydra"), google]);

        assert!(registry.find("hydra").is_some());
        assert!(registry.find("google").is_none());
        assert!(registry.find("github").is_none());
        assert_eq!(registry.enabled().len(), 1);
    }

    #[test]
    fn replace_swaps_for_new_readers_only() {
        let registry = ProviderRegistry::new(vec![provider("hydra"), provider("google")]);
        let in_flight = registry.snapshot();

        registry.replace(vec![provider("google")]);

        // New flows see the reduced set; the captured snapshot is unchanged.
        assert!(registry.find("hydra").is_none());
        assert_eq!(in_flight.len(), 2);
        assert!(in_flight.iter().any(|provider| provider.id == "hydra"));
    }

    #[test]
    fn snapshot_of_carries_exchange_parameters() {
        let snapshot = ProviderSnapshot::of(&provider("hydra"));
        assert_eq!(snapshot.id, "hydra");
        assert_eq!(snapshot.client_secret, "s3cret");
        assert_eq!(snapshot.token_url, "https://hydra.localhost/oauth2/token");
    }
}
