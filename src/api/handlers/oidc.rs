//! Provider callback endpoint. Driven by the provider redirect, not the end
//! user.

use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, HeaderValue, StatusCode, header::LOCATION, header::SET_COOKIE},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::flow_error_response;
use super::session::{session_cookie, session_token_hash};
use super::types::CallbackQuery;
use crate::oidc;
use crate::state::ServiceState;

#[utoipa::path(
    get,
    path = "/v1/self-service/oidc/callback/{provider}",
    params(
        ("provider" = String, Path, description = "Provider id the redirect was issued for"),
        CallbackQuery
    ),
    responses(
        (status = 303, description = "Round-trip finished; continue at the redirect target"),
        (status = 400, description = "Invalid or replayed state", body = String),
        (status = 502, description = "Upstream provider failure", body = String)
    ),
    tag = "oidc"
)]
pub async fn oidc_callback(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    svc: Extension<Arc<ServiceState>>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> impl IntoResponse {
    let token_hash = session_token_hash(&headers);

    match oidc::handle_callback(
        &pool,
        &svc,
        &provider,
        query.code.as_deref(),
        query.state.as_deref(),
        query.error.as_deref(),
        query.error_description.as_deref(),
        token_hash.as_deref(),
    )
    .await
    {
        Ok(outcome) => {
            let Ok(location) = HeaderValue::from_str(&outcome.redirect_to) else {
                error!("Callback produced an unusable redirect target");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            };
            let mut response_headers = HeaderMap::new();
            response_headers.insert(LOCATION, location);
            if let Some(session_token) = outcome.session_token.as_deref() {
                if let Ok(cookie) = session_cookie(svc.config(), session_token) {
                    response_headers.insert(SET_COOKIE, cookie);
                }
            }
            (StatusCode::SEE_OTHER, response_headers).into_response()
        }
        Err(err) => flow_error_response(&err).into_response(),
    }
}
