// Handlers module - scanner API endpoints the proxy intercepts

pub mod auth;
pub mod passthrough;
pub mod scans;
pub mod targets;

use crate::proxy::error::ProxyError;
use crate::proxy::server::AppState;

/// Extract the watcher from a raw query and refresh it.
pub(crate) async fn require_watcher(
    state: &AppState,
    watcher: Option<String>,
) -> Result<String, ProxyError> {
    let watcher = watcher
        .ok_or_else(|| ProxyError::MalformedRequest("watcher_uuid is required".into()))?;
    state.registry.touch(&watcher).await;
    Ok(watcher)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
        Router,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::proxy::config::ScanProxyConfig;
    use crate::proxy::registry::TargetRegistry;
    use crate::proxy::security::SharedCredential;
    use crate::proxy::server::{build_router, AppState};
    use crate::proxy::upstream::mock::MockBackend;

    pub fn test_state(backend: Arc<MockBackend>, demo_mode: bool) -> AppState {
        AppState {
            registry: Arc::new(TargetRegistry::default()),
            backend,
            credential: Arc::new(SharedCredential::new("admin@example.com", "password")),
            demo_mode,
            scan_proxy: None,
        }
    }

    pub fn test_state_with_proxy(backend: Arc<MockBackend>, proxy: ScanProxyConfig) -> AppState {
        AppState {
            scan_proxy: Some(proxy),
            ..test_state(backend, false)
        }
    }

    pub fn app(state: &AppState) -> Router {
        build_router(state.clone())
    }

    /// Send one request through the router and decode the JSON reply (Null if empty).
    pub async fn send(
        app: Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(json) => Body::from(json.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }
}
