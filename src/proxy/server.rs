use crate::proxy::config::ScanProxyConfig;
use crate::proxy::registry::TargetRegistry;
use crate::proxy::security::SharedCredential;
use crate::proxy::upstream::Backend;
use axum::{
    extract::{DefaultBodyLimit, State},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

/// Axum application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TargetRegistry>,
    pub backend: Arc<dyn Backend>,
    pub credential: Arc<SharedCredential>,
    /// Resolve license conflicts locally instead of relaying them
    pub demo_mode: bool,
    pub scan_proxy: Option<ScanProxyConfig>,
}

/// Routes of the multiplexing proxy. Intercepted endpoints fall back to plain
/// forwarding for every other method, as does any unknown path.
pub fn build_router(state: AppState) -> Router {
    use crate::proxy::handlers::{auth, passthrough, scans, targets};

    Router::new()
        .route(
            "/api/v1/me/login",
            post(auth::login).fallback(passthrough::forward),
        )
        .route(
            "/api/v1/me",
            patch(auth::shield_profile).fallback(passthrough::forward),
        )
        .route(
            "/api/v1/targets",
            post(targets::create_target).fallback(passthrough::forward),
        )
        .route(
            "/api/v1/targets/:target_id",
            delete(targets::delete_target).fallback(passthrough::forward),
        )
        .route(
            "/api/v1/scans",
            post(scans::create_scan).fallback(passthrough::forward),
        )
        .route("/healthz", get(health_check_handler))
        .fallback(passthrough::forward)
        .layer(DefaultBodyLimit::max(32 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Axum server instance
pub struct AxumServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl AxumServer {
    /// Start Axum server
    pub async fn start(
        host: String,
        port: u16,
        state: AppState,
    ) -> Result<(Self, tokio::task::JoinHandle<()>), String> {
        let app = build_router(state);

        // Bind address
        let addr = format!("{}:{}", host, port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| format!("Failed to bind address {}: {}", addr, e))?;

        tracing::info!("Multiplexing proxy listening on http://{}", addr);

        // Create shutdown channel
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let server_instance = Self {
            shutdown_tx: Some(shutdown_tx),
        };

        // Start server in a new task
        let handle = tokio::spawn(async move {
            use hyper::server::conn::http1;
            use hyper_util::rt::TokioIo;
            use hyper_util::service::TowerToHyperService;

            loop {
                tokio::select! {
                    res = listener.accept() => {
                        match res {
                            Ok((stream, _)) => {
                                let io = TokioIo::new(stream);
                                let service = TowerToHyperService::new(app.clone());

                                tokio::task::spawn(async move {
                                    if let Err(err) = http1::Builder::new()
                                        .serve_connection(io, service)
                                        .await
                                    {
                                        debug!("Connection handling ended or error: {:?}", err);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {:?}", e);
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::info!("Multiplexing proxy stopped listening");
                        break;
                    }
                }
            }
        });

        Ok((server_instance, handle))
    }

    /// Stop the server
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Health check handler
async fn health_check_handler(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({
        "status": "ok",
        "targets": state.registry.len().await,
    }))
    .into_response()
}
