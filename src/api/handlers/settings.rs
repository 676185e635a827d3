//! Settings flow endpoints.

use axum::{
    Json,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::flow_error_response;
use super::session::require_auth;
use super::types::{
    CreatedSettingsFlowResponse, FlowQuery, RedirectResponse, SettingsFlowResponse,
    SettingsSubmission,
};
use crate::flow::settings::{self, SettingsSubmitOutcome};
use crate::flow::{SettingsAction, storage::SettingsFlowRecord};
use crate::state::ServiceState;

#[utoipa::path(
    get,
    path = "/v1/self-service/settings/browser",
    responses(
        (status = 200, description = "Settings flow created", body = CreatedSettingsFlowResponse),
        (status = 401, description = "Missing or invalid session cookie.")
    ),
    tag = "settings"
)]
pub async fn create_settings_flow(
    headers: axum::http::HeaderMap,
    pool: Extension<PgPool>,
    svc: Extension<Arc<ServiceState>>,
) -> impl IntoResponse {
    let session = match require_auth(&headers, &pool).await {
        Ok(session) => session,
        Err(status) => return status.into_response(),
    };

    match settings::create_flow(&pool, &svc, &session).await {
        Ok((flow, csrf_token)) => match build_response(&pool, &svc, flow).await {
            Ok(flow) => (
                StatusCode::OK,
                Json(CreatedSettingsFlowResponse { flow, csrf_token }),
            )
                .into_response(),
            Err(err) => {
                error!("Failed to render settings flow: {err}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        Err(err) => {
            error!("Failed to create settings flow: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/self-service/settings",
    params(FlowQuery),
    responses(
        (status = 200, description = "Settings flow", body = SettingsFlowResponse),
        (status = 401, description = "Missing or invalid session cookie."),
        (status = 404, description = "Unknown flow", body = String)
    ),
    tag = "settings"
)]
pub async fn get_settings_flow(
    headers: axum::http::HeaderMap,
    pool: Extension<PgPool>,
    svc: Extension<Arc<ServiceState>>,
    query: Query<FlowQuery>,
) -> impl IntoResponse {
    let session = match require_auth(&headers, &pool).await {
        Ok(session) => session,
        Err(status) => return status.into_response(),
    };

    let flow = match settings::fetch_flow(&pool, &session, query.flow).await {
        Ok(flow) => flow,
        Err(err) => return flow_error_response(&err).into_response(),
    };

    match build_response(&pool, &svc, flow).await {
        Ok(flow) => (StatusCode::OK, Json(flow)).into_response(),
        Err(err) => {
            error!("Failed to render settings flow: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/self-service/settings",
    params(FlowQuery),
    request_body = SettingsSubmission,
    responses(
        (status = 200, description = "Settings saved", body = SettingsFlowResponse),
        (status = 422, description = "Browser redirect required", body = RedirectResponse),
        (status = 400, description = "Validation error", body = String),
        (status = 401, description = "Missing or invalid session cookie."),
        (status = 403, description = "CSRF token mismatch", body = String),
        (status = 409, description = "Conflict", body = String),
        (status = 410, description = "Flow expired", body = String)
    ),
    tag = "settings"
)]
pub async fn submit_settings_flow(
    headers: axum::http::HeaderMap,
    pool: Extension<PgPool>,
    svc: Extension<Arc<ServiceState>>,
    query: Query<FlowQuery>,
    payload: Option<Json<SettingsSubmission>>,
) -> impl IntoResponse {
    let session = match require_auth(&headers, &pool).await {
        Ok(session) => session,
        Err(status) => return status.into_response(),
    };

    let Some(Json(submission)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let action = match SettingsAction::from_fields(
        submission.password,
        submission.link,
        submission.unlink,
    ) {
        Ok(action) => action,
        Err(err) => return flow_error_response(&err).into_response(),
    };

    match settings::submit(
        &pool,
        &svc,
        &session,
        query.flow,
        &submission.csrf_token,
        action,
    )
    .await
    {
        Ok(SettingsSubmitOutcome::Saved(flow)) => match build_response(&pool, &svc, flow).await {
            Ok(flow) => (StatusCode::OK, Json(flow)).into_response(),
            Err(err) => {
                error!("Failed to render settings flow: {err}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        Ok(
            SettingsSubmitOutcome::RedirectToProvider { redirect_to }
            | SettingsSubmitOutcome::ReauthRequired { redirect_to },
        ) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(RedirectResponse { redirect_to }),
        )
            .into_response(),
        Err(err) => flow_error_response(&err).into_response(),
    }
}

async fn build_response(
    pool: &PgPool,
    svc: &ServiceState,
    flow: SettingsFlowRecord,
) -> anyhow::Result<SettingsFlowResponse> {
    let ui = settings::render_ui(pool, svc, &flow).await?;
    Ok(SettingsFlowResponse {
        id: flow.id,
        identity_id: flow.identity_id,
        state: flow.state,
        issued_at: flow.issued_at,
        expires_at: flow.expires_at,
        messages: flow.messages,
        ui,
    })
}
