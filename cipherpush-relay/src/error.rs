//! Relay error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cipherpush_core::{BroadcastFailure, NoticeResult, PushError};

/// Relay errors mapped to HTTP status codes.
#[derive(Debug)]
pub enum RelayError {
    Core(PushError),
    /// Broadcast aborted; carries the lookup results already produced.
    Dispatch(PushError, Vec<NoticeResult>),
    BadRequest(String),
    Timeout(u64),
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Core(e) | Self::Dispatch(e, _) => write!(f, "{}", e),
            Self::BadRequest(e) => write!(f, "Bad request: {}", e),
            Self::Timeout(secs) => write!(f, "Broadcast still running after {}s", secs),
        }
    }
}

impl std::error::Error for RelayError {}

fn status_for(e: &PushError) -> StatusCode {
    match e {
        PushError::Validation(_) | PushError::InvalidCredential(_) => StatusCode::BAD_REQUEST,
        PushError::NotFound(_) => StatusCode::NOT_FOUND,
        PushError::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        PushError::RegistrationFailed(_) | PushError::Transport(_) => StatusCode::BAD_GATEWAY,
        PushError::NoTargetsResolved => StatusCode::UNPROCESSABLE_ENTITY,
        PushError::Entropy(_) | PushError::Crypto(_) | PushError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::Core(e) => {
                if status_for(e).is_server_error() {
                    tracing::error!(error = %e, "Request failed");
                }
                (status_for(e), serde_json::json!({ "error": e.to_string() }))
            }
            Self::Dispatch(e, results) => (
                status_for(e),
                serde_json::json!({ "error": e.to_string(), "results": results }),
            ),
            Self::BadRequest(e) => (StatusCode::BAD_REQUEST, serde_json::json!({ "error": e })),
            Self::Timeout(_) => (
                StatusCode::GATEWAY_TIMEOUT,
                serde_json::json!({ "error": self.to_string() }),
            ),
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<PushError> for RelayError {
    fn from(e: PushError) -> Self {
        Self::Core(e)
    }
}

impl From<BroadcastFailure> for RelayError {
    fn from(f: BroadcastFailure) -> Self {
        Self::Dispatch(f.error, f.results)
    }
}
