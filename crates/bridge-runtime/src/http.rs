//! HTTP transport: turns every inbound call into a bridged request.
//!
//! Operation naming: `GET`/`HEAD` use the path as-is, every other method
//! appends the lowercase method (`POST /invoice` is `/invoice.post`).

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bridge_core::{BridgeError, BridgeService, RequestPayload};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    bridge: Arc<BridgeService>,
}

/// Build the router: admin routes plus a fallback that forwards everything else.
pub fn router(bridge: Arc<BridgeService>) -> Router {
    Router::new()
        .route("/", get(hello))
        .route("/_bridge/health", get(health_check))
        .route("/_bridge/stats", get(stats))
        .fallback(forward)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { bridge })
}

/// Operation name for a method and path.
pub fn operation_name(method: &Method, path: &str) -> String {
    if method == Method::GET || method == Method::HEAD {
        path.to_string()
    } else {
        format!("{}.{}", path, method.as_str().to_ascii_lowercase())
    }
}

/// Map a bridge error onto an HTTP response.
pub fn error_response(err: &BridgeError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err.to_json())).into_response()
}

fn request_payload(
    method: &Method,
    uri: &Uri,
    query: BTreeMap<String, String>,
    headers: &HeaderMap,
    body: &Bytes,
) -> RequestPayload {
    let mut payload = RequestPayload::new(method.as_str(), uri.path());
    payload.query = query;
    payload.headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    payload.body = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
    };
    payload
}

/// Forward any unrouted call through the bridge
async fn forward(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    query: Option<Query<BTreeMap<String, String>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let operation = operation_name(&method, uri.path());
    let query = query.map(|Query(q)| q).unwrap_or_default();
    let payload = request_payload(&method, &uri, query, &headers, &body);

    let payload = match serde_json::to_value(&payload) {
        Ok(value) => value,
        Err(e) => return error_response(&BridgeError::DecodeFailure(e.to_string())),
    };

    debug!(operation = %operation, "Forwarding request through bridge");
    match state.bridge.request(&operation, payload).await {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn hello() -> &'static str {
    "hello"
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let bridge_state = state.bridge.state();
    let status = if state.bridge.is_running() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": bridge_state,
            "service": state.bridge.config().service_name,
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.bridge.stats())
}
