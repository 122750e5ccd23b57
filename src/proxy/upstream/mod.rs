// Upstream module - scanner backend session

pub mod client;
pub mod reauth;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::proxy::error::ProxyError;

pub use client::BackendClient;
pub use reauth::call_with_reauth;

/// Raw backend reply, relayed to clients as-is unless a handler rewrites it.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl BackendResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ProxyError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ProxyError::InvalidBackendResponse(format!("{} ({})", e, self.status)))
    }
}

/// Authenticated access to the scanner API. Paths are relative to the API root and
/// may carry a query string.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
    ) -> Result<BackendResponse, ProxyError>;

    async fn get(&self, path: &str) -> Result<BackendResponse, ProxyError> {
        self.request(Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: Bytes) -> Result<BackendResponse, ProxyError> {
        self.request(Method::POST, path, Some(body)).await
    }

    async fn patch(&self, path: &str, body: Bytes) -> Result<BackendResponse, ProxyError> {
        self.request(Method::PATCH, path, Some(body)).await
    }

    async fn delete(&self, path: &str) -> Result<BackendResponse, ProxyError> {
        self.request(Method::DELETE, path, None).await
    }
}
