use crate::cli::actions::{Action, server};
use anyhow::{Context, Result};

/// Turn parsed arguments into an executable action.
///
/// # Errors
/// Returns an error when a required argument is missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let args = server::Args {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn: matches
            .get_one::<String>("dsn")
            .cloned()
            .context("missing required argument: --dsn")?,
        frontend_base_url: matches
            .get_one::<String>("frontend-base-url")
            .cloned()
            .context("missing argument: --frontend-base-url")?,
        public_base_url: matches
            .get_one::<String>("public-base-url")
            .cloned()
            .context("missing argument: --public-base-url")?,
        providers_file: matches.get_one::<String>("providers-file").cloned(),
        oauth2_admin_url: matches.get_one::<String>("oauth2-admin-url").cloned(),
        privileged_session_max_age_seconds: matches
            .get_one::<i64>("privileged-session-max-age-seconds")
            .copied()
            .unwrap_or(900),
        session_ttl_seconds: matches
            .get_one::<i64>("session-ttl-seconds")
            .copied()
            .unwrap_or(604_800),
        login_flow_ttl_seconds: matches
            .get_one::<i64>("login-flow-ttl-seconds")
            .copied()
            .unwrap_or(3600),
        settings_flow_ttl_seconds: matches
            .get_one::<i64>("settings-flow-ttl-seconds")
            .copied()
            .unwrap_or(3600),
        oidc_state_ttl_seconds: matches
            .get_one::<i64>("oidc-state-ttl-seconds")
            .copied()
            .unwrap_or(600),
        recovery_link_ttl_seconds: matches
            .get_one::<i64>("recovery-link-ttl-seconds")
            .copied()
            .unwrap_or(3600),
        verification_link_ttl_seconds: matches
            .get_one::<i64>("verification-link-ttl-seconds")
            .copied()
            .unwrap_or(3600),
        allow_last_method_unlink: matches.get_flag("allow-last-method-unlink"),
    };

    Ok(Action::Server(Box::new(args)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn handler_builds_server_action() -> Result<()> {
        let matches = commands::new().get_matches_from(vec![
            "varco",
            "--dsn",
            "postgres://localhost/varco",
            "--providers-file",
            "/etc/varco/providers.json",
            "--allow-last-method-unlink",
        ]);
        let Action::Server(args) = handler(&matches)?;
        assert_eq!(args.port, 8080);
        assert_eq!(args.dsn, "postgres://localhost/varco");
        assert_eq!(
            args.providers_file.as_deref(),
            Some("/etc/varco/providers.json")
        );
        assert!(args.allow_last_method_unlink);
        assert_eq!(args.privileged_session_max_age_seconds, 900);
        Ok(())
    }
}
