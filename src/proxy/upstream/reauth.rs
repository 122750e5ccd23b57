use std::future::Future;

use axum::http::StatusCode;

use super::BackendResponse;
use crate::proxy::error::ProxyError;

/// Statuses the scanner uses to demand a fresh login.
pub fn requires_login(status: StatusCode) -> bool {
    status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED
}

/// Run `call`; on 400/401 log in once and retry once.
///
/// The retried response is returned whatever its status, so a backend that keeps
/// rejecting the session surfaces its own answer instead of looping. A refused
/// login does not prevent the retry; a network failure during login does.
pub async fn call_with_reauth<C, CFut, L, LFut>(
    mut call: C,
    login: L,
) -> Result<BackendResponse, ProxyError>
where
    C: FnMut() -> CFut,
    CFut: Future<Output = Result<BackendResponse, ProxyError>>,
    L: FnOnce() -> LFut,
    LFut: Future<Output = Result<(), ProxyError>>,
{
    let response = call().await?;
    if !requires_login(response.status) {
        return Ok(response);
    }

    tracing::warn!(
        "Backend answered {}, renewing session and retrying once",
        response.status
    );
    match login().await {
        Ok(()) => {}
        Err(e @ ProxyError::AuthenticationExpired { .. }) => {
            tracing::warn!("{}", e);
        }
        Err(e) => return Err(e),
    }

    call().await
}
