//! Administrative endpoints.
//!
//! These routes must only be reachable from the operator network; the
//! deployment, not this service, is responsible for keeping them off the
//! public listener.

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use std::sync::Arc;
use tracing::{error, info};

use super::types::ProvidersReloadedResponse;
use crate::oidc::load_providers_file;
use crate::state::ServiceState;

#[utoipa::path(
    post,
    path = "/v1/admin/providers/reload",
    responses(
        (status = 200, description = "Registry swapped", body = ProvidersReloadedResponse),
        (status = 400, description = "No providers file configured", body = String),
        (status = 422, description = "Providers file did not parse", body = String)
    ),
    tag = "admin"
)]
pub async fn reload_providers(svc: Extension<Arc<ServiceState>>) -> impl IntoResponse {
    let Some(path) = svc.config().providers_file() else {
        return (
            StatusCode::BAD_REQUEST,
            "No providers file configured".to_string(),
        )
            .into_response();
    };

    match load_providers_file(path) {
        Ok(providers) => {
            let count = providers.len();
            // In-flight flows keep their snapshots; only new flows see this.
            svc.providers().replace(providers);
            info!("Provider registry reloaded with {count} providers");
            (
                StatusCode::OK,
                Json(ProvidersReloadedResponse { providers: count }),
            )
                .into_response()
        }
        Err(err) => {
            error!("Failed to reload providers: {err:#}");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Providers file did not parse".to_string(),
            )
                .into_response()
        }
    }
}
