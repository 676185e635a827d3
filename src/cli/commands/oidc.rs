use clap::{Arg, ArgAction, Command};

pub fn with_args(command: Command) -> Command {
    let command = with_url_args(command);
    let command = with_flow_args(command);
    with_policy_args(command)
}

fn with_url_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("frontend-base-url")
                .long("frontend-base-url")
                .help("Frontend base URL rendering the login and settings pages")
                .env("VARCO_FRONTEND_BASE_URL")
                .default_value("https://account.varco.dev"),
        )
        .arg(
            Arg::new("public-base-url")
                .long("public-base-url")
                .help("Public base URL of this service, used for OIDC redirect URIs")
                .env("VARCO_PUBLIC_BASE_URL")
                .default_value("https://api.varco.dev"),
        )
        .arg(
            Arg::new("providers-file")
                .long("providers-file")
                .help("JSON file with OIDC provider definitions; reloadable at runtime")
                .env("VARCO_PROVIDERS_FILE"),
        )
        .arg(
            Arg::new("oauth2-admin-url")
                .long("oauth2-admin-url")
                .help("Admin URL of the upstream OAuth2 server handling login challenges")
                .env("VARCO_OAUTH2_ADMIN_URL"),
        )
}

fn with_flow_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("session-ttl-seconds")
                .long("session-ttl-seconds")
                .help("Session cookie TTL in seconds")
                .env("VARCO_SESSION_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("login-flow-ttl-seconds")
                .long("login-flow-ttl-seconds")
                .help("Login flow lifetime in seconds")
                .env("VARCO_LOGIN_FLOW_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("settings-flow-ttl-seconds")
                .long("settings-flow-ttl-seconds")
                .help("Settings flow lifetime in seconds")
                .env("VARCO_SETTINGS_FLOW_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("oidc-state-ttl-seconds")
                .long("oidc-state-ttl-seconds")
                .help("Lifetime of an OAuth2 state record in seconds")
                .env("VARCO_OIDC_STATE_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("recovery-link-ttl-seconds")
                .long("recovery-link-ttl-seconds")
                .help("Account recovery link lifetime in seconds")
                .env("VARCO_RECOVERY_LINK_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("verification-link-ttl-seconds")
                .long("verification-link-ttl-seconds")
                .help("Verification link lifetime in seconds")
                .env("VARCO_VERIFICATION_LINK_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64)),
        )
}

fn with_policy_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("privileged-session-max-age-seconds")
                .long("privileged-session-max-age-seconds")
                .help("How recently a session must have authenticated for link/unlink")
                .env("VARCO_PRIVILEGED_SESSION_MAX_AGE_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("allow-last-method-unlink")
                .long("allow-last-method-unlink")
                .help("Permit unlinking the last remaining authentication method")
                .env("VARCO_ALLOW_LAST_METHOD_UNLINK")
                .action(ArgAction::SetTrue),
        )
}
