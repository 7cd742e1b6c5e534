//! HTTP front end against a running bridge on the in-memory broker.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use bridge_core::BridgeService;
use bridge_runtime::config::RuntimeConfig;
use bridge_runtime::{build_bridge, handlers, http};
use serde_json::{json, Value};
use shared_queue::InMemoryBroker;
use std::sync::Arc;
use tower::ServiceExt;

async fn running_bridge() -> Arc<BridgeService> {
    let mut config = RuntimeConfig::default();
    config.bridge.service_name = "billing".into();
    let bridge = Arc::new(build_bridge(
        &config,
        Arc::new(InMemoryBroker::new()),
        handlers::dispatch_table(),
    ));
    bridge.start().await.unwrap();
    bridge
}

async fn call(bridge: &Arc<BridgeService>, request: Request<Body>) -> (StatusCode, Value) {
    let response = http::router(Arc::clone(bridge))
        .oneshot(request)
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_post_invoice() {
    let bridge = running_bridge().await;
    let request = Request::builder()
        .method("POST")
        .uri("/invoice")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"invoice": {"buyerID": "b-1", "amount": {"totalAmount": 100, "currencyCode": "USD"}}})
                .to_string(),
        ))
        .unwrap();

    let (status, body) = call(&bridge, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("invoice created"));
    bridge.shutdown().await;
}

#[tokio::test]
async fn test_get_sla() {
    let bridge = running_bridge().await;
    let request = Request::builder().uri("/sla").body(Body::empty()).unwrap();

    let (status, body) = call(&bridge, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("sla"));
    bridge.shutdown().await;
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let bridge = running_bridge().await;
    let request = Request::builder().uri("/unknown").body(Body::empty()).unwrap();

    let (status, body) = call(&bridge, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found_operation");
    assert!(body["message"].as_str().unwrap().contains("/unknown"));
    bridge.shutdown().await;
}

#[tokio::test]
async fn test_stopped_bridge_is_503() {
    let bridge = running_bridge().await;
    bridge.shutdown().await;

    let request = Request::builder().uri("/sla").body(Body::empty()).unwrap();
    let (status, body) = call(&bridge, request).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "service_unavailable");

    let request = Request::builder()
        .uri("/_bridge/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(&bridge, request).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "closed");
}

#[tokio::test]
async fn test_stats_endpoint() {
    let bridge = running_bridge().await;
    let request = Request::builder().uri("/sla").body(Body::empty()).unwrap();
    call(&bridge, request).await;

    let request = Request::builder()
        .uri("/_bridge/stats")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(&bridge, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "billing");
    assert_eq!(body["state"], "running");
    assert_eq!(body["operations"], json!(["/invoice.post", "/sla"]));
    assert_eq!(body["pending"]["completed"], 1);
    assert_eq!(body["correlator"]["received"], 1);
    bridge.shutdown().await;
}
