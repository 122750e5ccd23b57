// In-memory backend for router tests

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use serde_json::{json, Value};

use super::{Backend, BackendResponse};
use crate::proxy::error::ProxyError;

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub body: Option<Bytes>,
}

impl RecordedCall {
    pub fn json(&self) -> Value {
        self.body
            .as_ref()
            .and_then(|b| serde_json::from_slice(b).ok())
            .unwrap_or(Value::Null)
    }
}

#[derive(Clone)]
enum Reply {
    Response(BackendResponse),
    Unreachable,
}

/// Scripted replies per (method, path). Queued replies are consumed in order and
/// the last one repeats. Unscripted calls get a 404.
#[derive(Default)]
pub struct MockBackend {
    replies: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Option<Duration>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call take `delay`, so concurrent requests overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn on(&self, method: Method, path: &str, status: StatusCode, body: Value) -> &Self {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        let body = if body.is_null() {
            Bytes::new()
        } else {
            Bytes::from(body.to_string())
        };
        self.push(
            method,
            path,
            Reply::Response(BackendResponse {
                status,
                headers,
                body,
            }),
        )
    }

    pub fn on_unreachable(&self, method: Method, path: &str) -> &Self {
        self.push(method, path, Reply::Unreachable)
    }

    fn push(&self, method: Method, path: &str, reply: Reply) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: &Method, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| &c.method == method && c.path == path)
            .count()
    }

    fn next_reply(&self, method: &Method, path: &str) -> Option<Reply> {
        let mut replies = self.replies.lock().unwrap();
        let queue = replies.get_mut(&(method.clone(), path.to_string()))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
    ) -> Result<BackendResponse, ProxyError> {
        self.calls.lock().unwrap().push(RecordedCall {
            method: method.clone(),
            path: path.to_string(),
            body,
        });

        match self.delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }

        match self.next_reply(&method, path) {
            Some(Reply::Response(response)) => Ok(response),
            Some(Reply::Unreachable) => Err(ProxyError::BackendUnreachable(format!(
                "{} {}: connection refused",
                method, path
            ))),
            None => Ok(BackendResponse {
                status: StatusCode::NOT_FOUND,
                headers: HeaderMap::new(),
                body: Bytes::from(json!({ "message": "Object not found" }).to_string()),
            }),
        }
    }
}
