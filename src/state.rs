//! Process-wide service state injected into handlers and engines.

use anyhow::{Context, Result};
use std::time::Duration;

use crate::config::SelfServiceConfig;
use crate::oidc::{ProviderConfig, ProviderRegistry};

const HTTP_TIMEOUT_SECONDS: u64 = 10;

/// Configuration, the hot-swappable provider registry, and the shared HTTP
/// client for provider traffic.
pub struct ServiceState {
    config: SelfServiceConfig,
    providers: ProviderRegistry,
    http: reqwest::Client,
}

impl ServiceState {
    /// Build the service state with a bounded-timeout HTTP client.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: SelfServiceConfig, providers: Vec<ProviderConfig>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECONDS))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            config,
            providers: ProviderRegistry::new(providers),
            http,
        })
    }

    #[must_use]
    pub fn config(&self) -> &SelfServiceConfig {
        &self.config
    }

    #[must_use]
    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_state_builds_with_empty_registry() {
        let config = SelfServiceConfig::new(
            "https://account.varco.dev".to_string(),
            "https://api.varco.dev".to_string(),
        );
        let state = ServiceState::new(config, Vec::new());
        let state = state.expect("state should build");
        assert!(state.providers().snapshot().is_empty());
    }
}
