use crate::api;
use crate::config::SelfServiceConfig;
use crate::oidc::load_providers_file;
use crate::state::ServiceState;
use anyhow::Result;
use tracing::warn;

/// Everything the server action needs, resolved from flags and environment.
#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub frontend_base_url: String,
    pub public_base_url: String,
    pub providers_file: Option<String>,
    pub oauth2_admin_url: Option<String>,
    pub privileged_session_max_age_seconds: i64,
    pub session_ttl_seconds: i64,
    pub login_flow_ttl_seconds: i64,
    pub settings_flow_ttl_seconds: i64,
    pub oidc_state_ttl_seconds: i64,
    pub recovery_link_ttl_seconds: i64,
    pub verification_link_ttl_seconds: i64,
    pub allow_last_method_unlink: bool,
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if the providers file is invalid or the server fails to
/// start.
pub async fn execute(args: Args) -> Result<()> {
    let providers = match args.providers_file.as_deref() {
        Some(path) => load_providers_file(path)?,
        None => Vec::new(),
    };
    if providers.is_empty() {
        warn!("No OIDC providers configured; only password flows are available");
    }

    let config = SelfServiceConfig::new(args.frontend_base_url, args.public_base_url)
        .with_privileged_session_max_age_seconds(args.privileged_session_max_age_seconds)
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_login_flow_ttl_seconds(args.login_flow_ttl_seconds)
        .with_settings_flow_ttl_seconds(args.settings_flow_ttl_seconds)
        .with_oidc_state_ttl_seconds(args.oidc_state_ttl_seconds)
        .with_recovery_link_ttl_seconds(args.recovery_link_ttl_seconds)
        .with_verification_link_ttl_seconds(args.verification_link_ttl_seconds)
        .with_allow_last_method_unlink(args.allow_last_method_unlink)
        .with_oauth2_admin_url(args.oauth2_admin_url)
        .with_providers_file(args.providers_file);

    let svc = ServiceState::new(config, providers)?;

    api::new(args.port, args.dsn, svc).await
}
