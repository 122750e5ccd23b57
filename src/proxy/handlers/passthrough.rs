//! Transparent forwarding of every API call the proxy does not intercept.

use axum::{
    extract::State,
    http::{Method, StatusCode, Uri},
    response::Response,
};
use bytes::Bytes;

use crate::proxy::common::relay::{error_response, relay, split_watcher, with_query};
use crate::proxy::error::ProxyError;
use crate::proxy::server::AppState;

pub const API_PREFIX: &str = "/api/v1";

/// Backend path (relative to the API root) for a client path, if it lies under it.
fn backend_path(path: &str) -> Option<&str> {
    let rest = path.strip_prefix(API_PREFIX)?;
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    Some(rest.trim_start_matches('/'))
}

pub async fn forward(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let Some(path) = backend_path(uri.path()) else {
        return Ok(error_response(
            StatusCode::NOT_FOUND,
            format!("no route for {}", uri.path()),
        ));
    };

    let (watcher, rest) = split_watcher(uri.query());
    if let Some(watcher) = &watcher {
        state.registry.touch(watcher).await;
    }

    let target = with_query(path, rest.as_deref());
    tracing::debug!("Forwarding {} /{}", method, target);
    let body = (!body.is_empty()).then_some(body);
    let response = state.backend.request(method, &target, body).await?;
    Ok(relay(response))
}
