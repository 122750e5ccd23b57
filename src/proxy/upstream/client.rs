// Upstream client implementation
// Authenticated HTTP session against the scanner REST API

use async_trait::async_trait;
use axum::http::{HeaderValue, Method};
use bytes::Bytes;
use reqwest::{header, Client};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Duration;

use super::{call_with_reauth, Backend, BackendResponse};
use crate::proxy::config::{BackendConfig, UpstreamProxyConfig};
use crate::proxy::error::ProxyError;
use crate::proxy::security::password_digest;

/// Session header the scanner issues on login and expects on every later call
const SESSION_HEADER: &str = "x-auth";
const LOGIN_PATH: &str = "me/login";

#[derive(Serialize)]
struct LoginPayload<'a> {
    email: &'a str,
    password: &'a str,
    remember_me: bool,
    logout_previous: bool,
}

pub struct BackendClient {
    http_client: Client,
    api_root: String,
    username: String,
    password_digest: String,
    // Session cookies live in the client's cookie store
    session_token: RwLock<Option<HeaderValue>>,
}

impl BackendClient {
    pub fn new(
        config: &BackendConfig,
        proxy_config: &UpstreamProxyConfig,
    ) -> Result<Self, String> {
        let mut default_headers = header::HeaderMap::new();
        default_headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        default_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let mut builder = Client::builder()
            // Connection settings (keep one warm pool towards the single backend)
            .connect_timeout(Duration::from_secs(20))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(config.request_timeout())
            .default_headers(default_headers)
            .cookie_store(true)
            // Appliances ship with self-signed certificates
            .danger_accept_invalid_certs(!config.secure)
            .user_agent(concat!("scan-mux/", env!("CARGO_PKG_VERSION")));

        if proxy_config.enabled && !proxy_config.url.is_empty() {
            let proxy = reqwest::Proxy::all(&proxy_config.url)
                .map_err(|e| format!("Invalid upstream proxy {}: {}", proxy_config.url, e))?;
            builder = builder.proxy(proxy);
            tracing::info!("BackendClient enabled proxy: {}", proxy_config.url);
        } else {
            builder = builder.no_proxy();
        }

        let http_client = builder
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            http_client,
            api_root: config.api_root(),
            username: config.username.clone(),
            password_digest: password_digest(&config.password),
            session_token: RwLock::new(None),
        })
    }

    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    fn build_url(api_root: &str, path: &str) -> String {
        format!("{}{}", api_root, path.trim_start_matches('/'))
    }

    /// One raw round trip, no re-authentication.
    async fn send_once(
        &self,
        method: Method,
        path: &str,
        body: Option<&Bytes>,
    ) -> Result<BackendResponse, ProxyError> {
        let url = Self::build_url(&self.api_root, path);
        let mut request = self.http_client.request(method.clone(), &url);

        let token = self.session_token.read().await.clone();
        if let Some(token) = token {
            request = request.header(SESSION_HEADER, token);
        }
        if let Some(body) = body {
            request = request
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        let response = request.send().await.map_err(|e| {
            tracing::debug!("{} {} failed: {}", method, url, e);
            ProxyError::BackendUnreachable(format!("{} {}: {}", method, url, e))
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| ProxyError::BackendUnreachable(format!("reading {}: {}", url, e)))?;

        tracing::debug!("Backend {} /{} -> {}", method, path, status);
        Ok(BackendResponse {
            status,
            headers,
            body,
        })
    }

    /// Password-digest login; captures the session header (cookies are kept by the
    /// client's cookie store).
    pub async fn login(&self) -> Result<(), ProxyError> {
        let payload = LoginPayload {
            email: &self.username,
            password: &self.password_digest,
            remember_me: true,
            logout_previous: true,
        };
        let body = serde_json::to_vec(&payload)
            .map_err(|e| ProxyError::Internal(format!("serializing login: {}", e)))?;

        let response = self
            .send_once(Method::POST, LOGIN_PATH, Some(&Bytes::from(body)))
            .await?;
        if !response.is_success() {
            return Err(ProxyError::AuthenticationExpired {
                status: response.status.as_u16(),
            });
        }

        if let Some(token) = response.headers.get(SESSION_HEADER) {
            *self.session_token.write().await = Some(token.clone());
        }
        tracing::info!("Backend session renewed for {}", self.username);
        Ok(())
    }

    /// Block until the backend answers at all, giving up after `attempts`.
    pub async fn probe(&self, attempts: u32, interval: Duration) -> Result<(), ProxyError> {
        let mut last_error = None;

        for attempt in 1..=attempts {
            tracing::info!(
                "Connecting to scanner backend ({}) attempt {}/{}",
                self.api_root,
                attempt,
                attempts
            );
            match self.send_once(Method::GET, "", None).await {
                Ok(_) => {
                    tracing::info!("Connection to scanner backend established");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("{}", e);
                    last_error = Some(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }

        tracing::error!("Failed to connect to scanner backend after {} attempts", attempts);
        Err(last_error
            .unwrap_or_else(|| ProxyError::BackendUnreachable("no connection attempt made".into())))
    }
}

#[async_trait]
impl Backend for BackendClient {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
    ) -> Result<BackendResponse, ProxyError> {
        call_with_reauth(
            || self.send_once(method.clone(), path, body.as_ref()),
            || self.login(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::State,
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct FakeScanner {
        accept_login: bool,
        logins: AtomicUsize,
        target_calls: AtomicUsize,
        last_login: Mutex<Option<Value>>,
    }

    impl FakeScanner {
        fn new(accept_login: bool) -> Arc<Self> {
            Arc::new(Self {
                accept_login,
                logins: AtomicUsize::new(0),
                target_calls: AtomicUsize::new(0),
                last_login: Mutex::new(None),
            })
        }
    }

    async fn fake_login(State(fake): State<Arc<FakeScanner>>, Json(body): Json<Value>) -> Response {
        fake.logins.fetch_add(1, Ordering::SeqCst);
        *fake.last_login.lock().unwrap() = Some(body);
        if !fake.accept_login {
            return StatusCode::FORBIDDEN.into_response();
        }
        (StatusCode::NO_CONTENT, [("X-Auth", "session-1")]).into_response()
    }

    async fn fake_targets(State(fake): State<Arc<FakeScanner>>, headers: HeaderMap) -> Response {
        fake.target_calls.fetch_add(1, Ordering::SeqCst);
        let authorized = headers
            .get("x-auth")
            .map(|v| v == "session-1")
            .unwrap_or(false);
        if authorized {
            Json(json!({ "targets": [] })).into_response()
        } else {
            StatusCode::UNAUTHORIZED.into_response()
        }
    }

    async fn spawn_fake(fake: Arc<FakeScanner>) -> SocketAddr {
        let app = Router::new()
            .route("/api/v1/me/login", post(fake_login))
            .route("/api/v1/targets", get(fake_targets))
            .with_state(fake);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn client_for(addr: SocketAddr) -> BackendClient {
        let config = BackendConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            scheme: "http".into(),
            username: "admin@example.com".into(),
            password: "password".into(),
            request_timeout: 5,
            ..BackendConfig::default()
        };
        BackendClient::new(&config, &UpstreamProxyConfig::default()).unwrap()
    }

    #[test]
    fn test_build_url() {
        let root = "https://scanner:3443/api/v1/";
        assert_eq!(
            BackendClient::build_url(root, "targets/abc"),
            "https://scanner:3443/api/v1/targets/abc"
        );
        assert_eq!(
            BackendClient::build_url(root, "/scans?l=20"),
            "https://scanner:3443/api/v1/scans?l=20"
        );
        assert_eq!(BackendClient::build_url(root, ""), root);
    }

    #[tokio::test]
    async fn test_relogin_on_unauthorized() {
        let fake = FakeScanner::new(true);
        let client = client_for(spawn_fake(fake.clone()).await);

        let response = client.get("targets").await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(fake.logins.load(Ordering::SeqCst), 1);
        assert_eq!(fake.target_calls.load(Ordering::SeqCst), 2);

        let login = fake.last_login.lock().unwrap().clone().unwrap();
        assert_eq!(login["email"], "admin@example.com");
        assert_eq!(login["password"], password_digest("password"));
        assert_eq!(login["remember_me"], true);

        // the renewed session is reused
        let again = client.get("targets").await.unwrap();
        assert_eq!(again.status, StatusCode::OK);
        assert_eq!(fake.logins.load(Ordering::SeqCst), 1);
        assert_eq!(fake.target_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_persistent_unauthorized_is_surfaced() {
        let fake = FakeScanner::new(false);
        let client = client_for(spawn_fake(fake.clone()).await);

        let response = client.get("targets").await.unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(fake.logins.load(Ordering::SeqCst), 1);
        assert_eq!(fake.target_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_probe_accepts_any_answer() {
        let fake = FakeScanner::new(true);
        let client = client_for(spawn_fake(fake).await);
        assert!(client.probe(1, Duration::from_millis(10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_probe_gives_up_when_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client_for(addr);
        let result = client.probe(2, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(ProxyError::BackendUnreachable(_))));
    }
}
