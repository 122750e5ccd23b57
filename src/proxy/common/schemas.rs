//! Wire shapes of the payloads the proxy inspects. Everything else is relayed
//! untouched, so these only name the fields the proxy actually reads.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::proxy::error::ProxyError;

/// Scan session states after which a scan no longer occupies its target.
const FINISHED_SCAN_STATES: [&str; 3] = ["completed", "failed", "aborted"];

/// Parse a client body, rejecting anything that does not fit `T`.
pub fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProxyError> {
    serde_json::from_slice(body).map_err(|e| ProxyError::MalformedRequest(e.to_string()))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub response: String,
    pub watcher_uuid: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateTargetRequest {
    #[serde(default)]
    pub address: Option<String>,
}

impl CreateTargetRequest {
    /// The trimmed, non-empty target address.
    pub fn address(&self) -> Result<String, ProxyError> {
        self.address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ProxyError::MalformedRequest("address is required".into()))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateScanRequest {
    #[serde(default)]
    pub target_id: Option<String>,
}

impl CreateScanRequest {
    pub fn target_id(&self) -> Result<&str, ProxyError> {
        self.target_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ProxyError::MalformedRequest("target_id is required".into()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendTarget {
    pub target_id: String,
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct BackendTargetList {
    #[serde(default)]
    pub targets: Vec<BackendTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSession {
    #[serde(default)]
    pub status: String,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// A backend scan. Unknown fields are kept so the scan can be handed back as is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendScan {
    pub scan_id: String,
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_session: Option<ScanSession>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl BackendScan {
    pub fn is_active(&self) -> bool {
        match &self.current_session {
            Some(session) => !FINISHED_SCAN_STATES.contains(&session.status.as_str()),
            None => false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BackendScanList {
    #[serde(default)]
    pub scans: Vec<BackendScan>,
}
