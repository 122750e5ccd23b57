//! Error taxonomy shared by the session client, registry callers and handlers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// The backend could not be reached at the network level.
    #[error("scanner backend is unreachable: {0}")]
    BackendUnreachable(String),

    /// The login exchange was refused by the backend.
    #[error("backend refused login with status {status}")]
    AuthenticationExpired { status: u16 },

    /// The backend refused a second target because of its license limit.
    #[error("license limit reached while creating target {address}")]
    LicenseConflict { address: String },

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// A successful backend response did not have the expected shape.
    #[error("unexpected backend response: {0}")]
    InvalidBackendResponse(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::BackendUnreachable(_) | ProxyError::InvalidBackendResponse(_) => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::AuthenticationExpired { .. } | ProxyError::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            ProxyError::LicenseConflict { .. } => StatusCode::CONFLICT,
            ProxyError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::debug!("rejecting request: {}", self);
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
