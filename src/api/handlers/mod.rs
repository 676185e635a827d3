//! HTTP handlers: a thin layer mapping engine outcomes to responses.

pub mod admin;
pub mod health;
pub mod login;
pub mod oidc;
pub mod session;
pub mod settings;
pub mod types;

use axum::http::StatusCode;
use tracing::error;

use crate::flow::FlowError;

/// Map a flow error to a response. Expected conditions keep their detail;
/// internal faults are logged and masked.
pub(crate) fn flow_error_response(err: &FlowError) -> (StatusCode, String) {
    let status = match err {
        FlowError::Validation(_)
        | FlowError::InvalidState
        | FlowError::UnknownProvider(_)
        | FlowError::LastAuthMethod => StatusCode::BAD_REQUEST,
        FlowError::CsrfMismatch => StatusCode::FORBIDDEN,
        FlowError::FlowNotFound => StatusCode::NOT_FOUND,
        FlowError::CredentialConflict | FlowError::ConcurrentSubmission => StatusCode::CONFLICT,
        FlowError::FlowExpired => StatusCode::GONE,
        FlowError::UpstreamProvider(_) => StatusCode::BAD_GATEWAY,
        FlowError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if matches!(err, FlowError::Internal(_)) {
        error!("Internal flow error: {err:#}");
        return (status, "Internal error".to_string());
    }
    (status, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn flow_error_statuses() {
        let (status, _) = flow_error_response(&FlowError::CsrfMismatch);
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = flow_error_response(&FlowError::FlowExpired);
        assert_eq!(status, StatusCode::GONE);

        let (status, _) = flow_error_response(&FlowError::CredentialConflict);
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = flow_error_response(&FlowError::FlowNotFound);
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn internal_errors_are_masked() {
        let (status, body) = flow_error_response(&FlowError::Internal(anyhow!("pool exhausted")));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.contains("pool"));
    }
}
