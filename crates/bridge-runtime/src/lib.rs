//! # Bridge Runtime
//!
//! Wires the bridge to its broker, its optional store and an HTTP listener.
//!
//! - `config` - environment-driven configuration
//! - `handlers` - reply handlers and the dispatch table
//! - `http` - axum router forwarding calls through the bridge

pub mod config;
pub mod handlers;
pub mod http;

use anyhow::{Context, Result};
use bridge_core::{BridgeService, DispatchTable, InMemoryStore, ShutdownReport};
use config::RuntimeConfig;
use shared_queue::QueueConnector;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Broker connector for this build.
#[cfg(feature = "amqp")]
pub fn queue_connector(config: &RuntimeConfig) -> Arc<dyn QueueConnector> {
    Arc::new(shared_queue::AmqpConnector::new(
        config.bridge.queue.url.clone(),
        config.bridge.service_name.clone(),
    ))
}

/// Broker connector for this build.
#[cfg(not(feature = "amqp"))]
pub fn queue_connector(_config: &RuntimeConfig) -> Arc<dyn QueueConnector> {
    tracing::warn!("Built without the amqp feature; using the in-memory broker");
    Arc::new(shared_queue::InMemoryBroker::new())
}

/// Assemble the bridge from configuration, a connector and a dispatch table.
pub fn build_bridge(
    config: &RuntimeConfig,
    connector: Arc<dyn QueueConnector>,
    dispatch: DispatchTable,
) -> BridgeService {
    let bridge = BridgeService::new(config.bridge.clone(), connector, dispatch);
    match &config.bridge.store.url {
        Some(url) => {
            info!(
                configured = %redact(url),
                "No document store driver is built in; using the in-process store"
            );
            bridge.with_store(Arc::new(InMemoryStore::new()))
        }
        None => bridge,
    }
}

/// Serve HTTP until `signal` resolves, then shut the bridge down.
///
/// The bridge is shut down before axum waits on open connections, so calls
/// still waiting for a reply answer `503` instead of holding the server open
/// until their deadline.
pub async fn serve<F>(
    listener: TcpListener,
    bridge: Arc<BridgeService>,
    signal: F,
) -> Result<ShutdownReport>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (report_tx, report_rx) = oneshot::channel();
    let shutdown_bridge = Arc::clone(&bridge);

    let served = axum::serve(listener, http::router(Arc::clone(&bridge)))
        .with_graceful_shutdown(async move {
            signal.await;
            let report = shutdown_bridge.shutdown().await;
            if !report.is_clean() {
                warn!(errors = ?report.errors, "Bridge shutdown was incomplete");
            }
            info!(drained = report.drained, "Bridge drained, closing HTTP listener");
            let _ = report_tx.send(report);
        })
        .await;

    // Server failed before the signal fired
    let report = match report_rx.await {
        Ok(report) => report,
        Err(_) => bridge.shutdown().await,
    };

    served.context("HTTP server failed")?;
    Ok(report)
}

/// Strip credentials from a URL for logging.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}{}", &url[..scheme_end + 3], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}
