//! Scan creation, deduplicated against scans already running on the same target.

use axum::{
    extract::{RawQuery, State},
    response::{IntoResponse, Json, Response},
};
use bytes::Bytes;

use crate::proxy::common::relay::{relay, split_watcher, with_query};
use crate::proxy::common::schemas::{parse_json, BackendScan, BackendScanList, CreateScanRequest};
use crate::proxy::error::ProxyError;
use crate::proxy::server::AppState;

/// `POST scans`
pub async fn create_scan(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let (watcher, rest) = split_watcher(query.as_deref());
    if let Some(watcher) = &watcher {
        state.registry.touch(watcher).await;
    }

    let request: CreateScanRequest = parse_json(&body)?;
    let target_id = request.target_id()?;

    if let Some(scan) = find_active_scan(&state, target_id).await {
        tracing::info!(
            "Target {} already has scan {} running, not starting another",
            target_id,
            scan.scan_id
        );
        return Ok(Json(scan).into_response());
    }

    let response = state
        .backend
        .post(&with_query("scans", rest.as_deref()), body)
        .await?;
    Ok(relay(response))
}

/// First scan on `target_id` whose session has not finished. A failed lookup is
/// treated as "none" so the creation still goes through.
async fn find_active_scan(state: &AppState, target_id: &str) -> Option<BackendScan> {
    let listing = match state.backend.get("scans").await {
        Ok(listing) if listing.is_success() => listing,
        Ok(listing) => {
            tracing::debug!("Scan listing answered {}", listing.status);
            return None;
        }
        Err(e) => {
            tracing::warn!("Scan listing failed: {}", e);
            return None;
        }
    };

    let scans: BackendScanList = match listing.json() {
        Ok(scans) => scans,
        Err(e) => {
            tracing::warn!("{}", e);
            return None;
        }
    };
    scans
        .scans
        .into_iter()
        .find(|scan| scan.target_id == target_id && scan.is_active())
}
