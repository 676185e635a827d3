//! Login flow endpoints.

use axum::{
    Json,
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::flow_error_response;
use super::session::{authenticate_session, session_cookie, session_token_hash};
use super::types::{
    CreatedLoginFlowResponse, FlowQuery, LoginBrowserQuery, LoginFlowResponse, LoginSubmission,
    RedirectResponse,
};
use crate::flow::login::{self, LoginSubmitOutcome};
use crate::flow::{LoginMethod, RequestedAal, storage::LoginFlowRecord};
use crate::state::ServiceState;

#[utoipa::path(
    get,
    path = "/v1/self-service/login/browser",
    params(LoginBrowserQuery),
    responses(
        (status = 200, description = "Login flow created", body = CreatedLoginFlowResponse)
    ),
    tag = "login"
)]
pub async fn create_login_flow(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    svc: Extension<Arc<ServiceState>>,
    query: Query<LoginBrowserQuery>,
) -> impl IntoResponse {
    // A forced re-auth pins the current session's identity to the flow; a
    // plain login ignores any existing session.
    let session = match authenticate_session(&headers, &pool).await {
        Ok(session) => session,
        Err(status) => return status.into_response(),
    };
    let requested_aal = if query.refresh.unwrap_or(false) {
        RequestedAal::Forced
    } else {
        RequestedAal::Default
    };

    match login::create_flow(
        &pool,
        &svc,
        requested_aal,
        query.return_to.as_deref(),
        query.login_challenge.as_deref(),
        session.as_ref(),
    )
    .await
    {
        Ok((flow, csrf_token)) => match build_response(&pool, &svc, flow).await {
            Ok(flow) => (
                StatusCode::OK,
                Json(CreatedLoginFlowResponse { flow, csrf_token }),
            )
                .into_response(),
            Err(err) => {
                error!("Failed to render login flow: {err}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        Err(err) => {
            error!("Failed to create login flow: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/self-service/login",
    params(FlowQuery),
    responses(
        (status = 200, description = "Login flow", body = LoginFlowResponse),
        (status = 404, description = "Unknown flow", body = String)
    ),
    tag = "login"
)]
pub async fn get_login_flow(
    pool: Extension<PgPool>,
    svc: Extension<Arc<ServiceState>>,
    query: Query<FlowQuery>,
) -> impl IntoResponse {
    let flow = match login::fetch_flow(&pool, query.flow).await {
        Ok(flow) => flow,
        Err(err) => return flow_error_response(&err).into_response(),
    };

    match build_response(&pool, &svc, flow).await {
        Ok(flow) => (StatusCode::OK, Json(flow)).into_response(),
        Err(err) => {
            error!("Failed to render login flow: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/self-service/login",
    params(FlowQuery),
    request_body = LoginSubmission,
    responses(
        (status = 200, description = "Authenticated", body = RedirectResponse),
        (status = 422, description = "Browser redirect required", body = RedirectResponse),
        (status = 400, description = "Validation error", body = String),
        (status = 403, description = "CSRF token mismatch", body = String),
        (status = 410, description = "Flow expired", body = String)
    ),
    tag = "login"
)]
pub async fn submit_login_flow(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    svc: Extension<Arc<ServiceState>>,
    query: Query<FlowQuery>,
    payload: Option<Json<LoginSubmission>>,
) -> impl IntoResponse {
    let Some(Json(submission)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let method = match LoginMethod::from_fields(
        submission.provider,
        submission.identifier,
        submission.password,
    ) {
        Ok(method) => method,
        Err(err) => return flow_error_response(&err).into_response(),
    };

    let token_hash = session_token_hash(&headers);
    match login::submit(
        &pool,
        &svc,
        query.flow,
        &submission.csrf_token,
        method,
        token_hash.as_deref(),
    )
    .await
    {
        Ok(LoginSubmitOutcome::SessionIssued {
            session_token,
            redirect_to,
        }) => {
            let mut response_headers = HeaderMap::new();
            if let Ok(cookie) = session_cookie(svc.config(), &session_token) {
                response_headers.insert(SET_COOKIE, cookie);
            }
            (
                StatusCode::OK,
                response_headers,
                Json(RedirectResponse { redirect_to }),
            )
                .into_response()
        }
        Ok(LoginSubmitOutcome::Reauthenticated { redirect_to }) => {
            (StatusCode::OK, Json(RedirectResponse { redirect_to })).into_response()
        }
        Ok(LoginSubmitOutcome::RedirectToProvider { redirect_to }) => (
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
    flow: LoginFlowRecord,
) -> anyhow::Result<LoginFlowResponse> {
    let ui = login::render_ui(pool, svc, &flow).await?;
    Ok(LoginFlowResponse {
        id: flow.id,
        state: flow.state,
        requested_aal: flow.requested_aal,
        issued_at: flow.issued_at,
        expires_at: flow.expires_at,
        messages: flow.messages,
        ui,
    })
}
