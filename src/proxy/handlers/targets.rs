//! Target creation and deletion, multiplexed over the backend's single license slot.

use axum::{
    extract::{Path, RawQuery, State},
    http::StatusCode,
    response::Response,
};
use bytes::Bytes;
use serde_json::{json, Map, Value};

use super::require_watcher;
use crate::proxy::common::relay::{ok_response, order_response, relay, relay_json, split_watcher};
use crate::proxy::common::schemas::{parse_json, BackendTarget, BackendTargetList, CreateTargetRequest};
use crate::proxy::config::ScanProxyConfig;
use crate::proxy::error::ProxyError;
use crate::proxy::registry::{AttachOutcome, Claim, CreationTicket};
use crate::proxy::server::AppState;
use crate::proxy::upstream::{Backend, BackendResponse};

/// `POST targets?watcher_uuid=…`
pub async fn create_target(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let (watcher, _) = split_watcher(query.as_deref());
    let watcher = require_watcher(&state, watcher).await?;
    let address = parse_json::<CreateTargetRequest>(&body)?.address()?;

    let resolution = state.registry.resolve_or_create(&address, &watcher).await;
    let order = resolution.target.order;

    match resolution.claim {
        Claim::Bound(target_id) => {
            tracing::debug!("Target {} already bound to {}", address, target_id);
            Ok(order_response(order, Some(&target_id)))
        }
        Claim::Wait(waiter) => {
            tracing::debug!("Waiting for in-flight creation of {}", address);
            let target_id = waiter.wait().await;
            // earlier targets may have gone away while waiting
            let order = state.registry.order_of(&address).await.unwrap_or(order);
            Ok(order_response(order, target_id.as_deref()))
        }
        Claim::Create(ticket) => {
            // Detached so a client hanging up cannot leave the target stuck in Creating
            let task_state = state.clone();
            let task_ticket = ticket.clone();
            let task = tokio::spawn(async move {
                let result = create_on_backend(&task_state, &task_ticket, order, body).await;
                // no-op once bound
                task_state.registry.abandon_creation(&task_ticket).await;
                result
            });

            match task.await {
                Ok(result) => result,
                Err(e) => {
                    state.registry.abandon_creation(&ticket).await;
                    Err(ProxyError::Internal(format!(
                        "creation of target {} did not complete: {}",
                        address, e
                    )))
                }
            }
        }
    }
}

async fn create_on_backend(
    state: &AppState,
    ticket: &CreationTicket,
    order: usize,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let address = ticket.address();
    tracing::info!("Creating backend target for {}", address);
    let response = state.backend.post("targets", body).await?;

    if response.is_success() {
        let payload: Map<String, Value> = response.json()?;
        let Some(target_id) = payload.get("target_id").and_then(Value::as_str) else {
            tracing::warn!(
                "Backend created {} without a target_id: {}",
                address,
                String::from_utf8_lossy(&response.body)
            );
            return Err(ProxyError::InvalidBackendResponse(
                "created target carries no target_id".into(),
            ));
        };
        let target_id = target_id.to_string();
        return finish_creation(state, ticket, order, &target_id, &response, payload).await;
    }

    if response.status == StatusCode::CONFLICT && state.demo_mode {
        let conflict = ProxyError::LicenseConflict {
            address: address.to_string(),
        };
        tracing::info!("{}, resolving contention", conflict);
        return resolve_contention(state, ticket, order).await;
    }

    tracing::warn!(
        "Backend refused target {} with status {}",
        address,
        response.status
    );
    Ok(relay(response))
}

async fn finish_creation(
    state: &AppState,
    ticket: &CreationTicket,
    order: usize,
    target_id: &str,
    response: &BackendResponse,
    mut payload: Map<String, Value>,
) -> Result<Response, ProxyError> {
    let address = ticket.address();
    match state.registry.attach_backend_id(ticket, target_id).await {
        AttachOutcome::Attached => {
            tracing::info!("Target {} bound to backend target {}", address, target_id);
            if let Some(proxy) = &state.scan_proxy {
                if let Err(e) = configure_scan_proxy(state.backend.as_ref(), target_id, proxy).await {
                    tracing::warn!("Failed to configure scan proxy on {}: {}", target_id, e);
                }
            }
            let order = state.registry.order_of(address).await.unwrap_or(order);
            payload.insert("order".to_string(), json!(order));
            Ok(relay_json(response, &Value::Object(payload)))
        }
        outcome => {
            // Released while in flight, or bound elsewhere: the new backend target has no owner
            tracing::warn!(
                "Target {} no longer needs backend target {} ({:?})",
                address,
                target_id,
                outcome
            );
            delete_backend_target(state.backend.as_ref(), target_id).await;
            let order = state.registry.order_of(address).await.unwrap_or(order);
            Ok(order_response(order, None))
        }
    }
}

/// The backend refused a new target because its license slot is taken. Either the
/// slot already holds this address, or idle occupants are evicted and the client
/// is told to retry.
async fn resolve_contention(
    state: &AppState,
    ticket: &CreationTicket,
    order: usize,
) -> Result<Response, ProxyError> {
    let address = ticket.address();
    state.registry.garbage_collect().await;

    let listing = state.backend.get("targets").await?;
    if !listing.is_success() {
        return Ok(relay(listing));
    }
    let existing: BackendTargetList = listing.json()?;

    if let Some(same) = existing.targets.iter().find(|t| t.address == address) {
        let outcome = state.registry.attach_backend_id(ticket, &same.target_id).await;
        let order = state.registry.order_of(address).await.unwrap_or(order);
        tracing::info!(
            "Backend already holds {} as {} ({:?})",
            address,
            same.target_id,
            outcome
        );
        return Ok(match outcome {
            AttachOutcome::Orphaned => order_response(order, None),
            _ => order_response(order, Some(&same.target_id)),
        });
    }

    for target in &existing.targets {
        if state.registry.is_releasable(&target.address).await {
            tracing::info!(
                "Evicting idle backend target {} ({}) to make room for {}",
                target.target_id,
                target.address,
                address
            );
            delete_backend_target(state.backend.as_ref(), &target.target_id).await;
            state.registry.forget_idle(&target.address).await;
        } else {
            tracing::debug!(
                "Backend target {} ({}) is still watched",
                target.target_id,
                target.address
            );
        }
    }

    let order = state.registry.order_of(address).await.unwrap_or(order);
    Ok(order_response(order, None))
}

/// Point the scanner at the configured proxy for everything it sends to this target.
pub async fn configure_scan_proxy(
    backend: &dyn Backend,
    target_id: &str,
    proxy: &ScanProxyConfig,
) -> Result<(), ProxyError> {
    let body = json!({
        "proxy": {
            "protocol": proxy.protocol,
            "address": proxy.address,
            "port": proxy.port,
            "enabled": true,
        }
    });
    let response = backend
        .patch(
            &format!("targets/{}/configuration", target_id),
            Bytes::from(body.to_string()),
        )
        .await?;

    if response.status != StatusCode::NO_CONTENT {
        return Err(ProxyError::InvalidBackendResponse(format!(
            "configuration update answered {}",
            response.status
        )));
    }
    tracing::debug!(
        "Target {} scans through {}://{}:{}",
        target_id,
        proxy.protocol,
        proxy.address,
        proxy.port
    );
    Ok(())
}

async fn delete_backend_target(backend: &dyn Backend, target_id: &str) {
    match backend.delete(&format!("targets/{}", target_id)).await {
        Ok(response) if response.is_success() => {
            tracing::info!("Deleted backend target {}", target_id);
        }
        Ok(response) => {
            tracing::warn!(
                "Backend refused to delete target {}: {}",
                target_id,
                response.status
            );
        }
        Err(e) => tracing::warn!("Failed to delete backend target {}: {}", target_id, e),
    }
}

/// `DELETE targets/{id}?watcher_uuid=…`
pub async fn delete_target(
    State(state): State<AppState>,
    Path(target_id): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Response, ProxyError> {
    let (watcher, _) = split_watcher(query.as_deref());
    let watcher = require_watcher(&state, watcher).await?;
    let path = format!("targets/{}", target_id);

    let lookup = state.backend.get(&path).await?;
    if !lookup.is_success() {
        return Ok(relay(lookup));
    }
    let target: BackendTarget = lookup.json()?;

    if !state.registry.release(&target.address, &watcher).await {
        tracing::debug!(
            "Watcher {} left {}, target still in use",
            watcher,
            target.address
        );
        return Ok(ok_response());
    }

    tracing::info!("Last watcher left {}, deleting {}", target.address, target_id);
    let deleted = state.backend.delete(&path).await?;
    if deleted.is_success() {
        Ok(ok_response())
    } else {
        Ok(relay(deleted))
    }
}
