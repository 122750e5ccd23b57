// Translation of backend replies into client responses

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};
use url::form_urlencoded;

use crate::proxy::upstream::BackendResponse;

/// Query parameter carrying the watcher identifier; never forwarded to the backend.
pub const WATCHER_PARAM: &str = "watcher_uuid";

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Relay a backend reply unmodified, minus its transfer encoding.
pub fn relay(backend: BackendResponse) -> Response {
    let mut response = Response::new(Body::from(backend.body));
    *response.status_mut() = backend.status;
    *response.headers_mut() = backend.headers;
    response.headers_mut().remove(header::TRANSFER_ENCODING);
    response
}

/// Relay the backend status and headers with a rewritten JSON body.
pub fn relay_json(backend: &BackendResponse, body: &Value) -> Response {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = backend.status;
    *response.headers_mut() = backend.headers.clone();
    let headers = response.headers_mut();
    headers.remove(header::TRANSFER_ENCODING);
    headers.remove(header::CONTENT_LENGTH);
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

pub fn ok_response() -> Response {
    Json(json!({ "response": "Ok" })).into_response()
}

/// `{order}` or `{order, target_id}`.
pub fn order_response(order: usize, target_id: Option<&str>) -> Response {
    let body = match target_id {
        Some(id) => json!({ "order": order, "target_id": id }),
        None => json!({ "order": order }),
    };
    Json(body).into_response()
}

/// Split the watcher identifier off a raw query string. Returns the watcher and the
/// remaining query, re-encoded, if anything is left.
pub fn split_watcher(query: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(query) = query else {
        return (None, None);
    };

    let mut watcher = None;
    let mut rest = form_urlencoded::Serializer::new(String::new());
    let mut kept = 0;
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if key == WATCHER_PARAM {
            if !value.trim().is_empty() {
                watcher = Some(value.into_owned());
            }
        } else {
            rest.append_pair(&key, &value);
            kept += 1;
        }
    }

    let rest = (kept > 0).then(|| rest.finish());
    (watcher, rest)
}

/// Append an optional query string to a backend path.
pub fn with_query(path: &str, query: Option<&str>) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("{}?{}", path, q),
        _ => path.to_string(),
    }
}
