use super::handlers::{admin, health, login, oidc, session, settings};
use utoipa::openapi::{InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI spec.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Handlers for the same path must be registered in a single `routes!` call
/// so their methods merge instead of colliding.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut varco_tag = Tag::new("varco");
    varco_tag.description = Some("Service metadata".to_string());

    let mut session_tag = Tag::new("session");
    session_tag.description = Some("Session introspection and logout".to_string());

    let mut settings_tag = Tag::new("settings");
    settings_tag.description =
        Some("Account settings flows: password, provider link/unlink".to_string());

    let mut login_tag = Tag::new("login");
    login_tag.description = Some("Login and forced re-authentication flows".to_string());

    let mut oidc_tag = Tag::new("oidc");
    oidc_tag.description = Some("Provider callback".to_string());

    let mut admin_tag = Tag::new("admin");
    admin_tag.description = Some("Operator-only configuration endpoints".to_string());

    let mut base = cargo_openapi();
    base.tags = Some(vec![
        varco_tag,
        session_tag,
        settings_tag,
        login_tag,
        oidc_tag,
        admin_tag,
    ]);

    OpenApiRouter::with_openapi(base)
        .routes(routes!(health::health))
        .routes(routes!(session::whoami))
        .routes(routes!(session::logout))
        .routes(routes!(settings::create_settings_flow))
        .routes(routes!(
            settings::get_settings_flow,
            settings::submit_settings_flow
        ))
        .routes(routes!(login::create_login_flow))
        .routes(routes!(login::get_login_flow, login::submit_login_flow))
        .routes(routes!(oidc::oidc_callback))
        .routes(routes!(admin::reload_providers))
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &str) -> Option<&str> {
    if value.is_empty() { None } else { Some(value) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_lists_self_service_paths() {
        let spec = openapi();
        let paths = &spec.paths.paths;
        assert!(paths.contains_key("/health"));
        assert!(paths.contains_key("/v1/session"));
        assert!(paths.contains_key("/v1/self-service/settings"));
        assert!(paths.contains_key("/v1/self-service/settings/browser"));
        assert!(paths.contains_key("/v1/self-service/login"));
        assert!(paths.contains_key("/v1/self-service/login/browser"));
        assert!(paths.contains_key("/v1/self-service/oidc/callback/{provider}"));
        assert!(paths.contains_key("/v1/admin/providers/reload"));
    }

    #[test]
    fn openapi_info_comes_from_cargo_metadata() {
        let spec = openapi();
        assert_eq!(spec.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(spec.info.version, env!("CARGO_PKG_VERSION"));
    }
}
