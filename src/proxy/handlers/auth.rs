//! Client login against the shared credential

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::json;
use uuid::Uuid;

use crate::proxy::common::schemas::{parse_json, LoginRequest, LoginResponse};
use crate::proxy::error::ProxyError;
use crate::proxy::server::AppState;

/// Issue a fresh watcher identifier to a client presenting the shared credential.
pub async fn login(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<LoginResponse>, ProxyError> {
    let request: LoginRequest = parse_json(&body)?;
    if !state.credential.matches(&request.email, &request.password) {
        tracing::warn!("Rejected login for {}", request.email);
        return Err(ProxyError::InvalidCredentials);
    }

    let watcher_uuid = Uuid::new_v4().to_string();
    tracing::info!("Issued watcher {} to {}", watcher_uuid, request.email);
    Ok(Json(LoginResponse {
        response: "Ok".to_string(),
        watcher_uuid,
    }))
}

/// `PATCH me`: profile changes would alter the account every client shares, so they
/// are acknowledged without reaching the backend.
pub async fn shield_profile() -> Response {
    tracing::debug!("Ignoring profile update on the shared account");
    (StatusCode::NO_CONTENT, Json(json!({ "response": "Ok" }))).into_response()
}
