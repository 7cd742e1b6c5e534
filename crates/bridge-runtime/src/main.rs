//! # Bridge Runtime
//!
//! HTTP in, queue out, reply back.
//!
//! ## Startup Sequence
//!
//! 1. Initialize logging (`RUST_LOG`, default `info`)
//! 2. Load configuration from the environment
//! 3. Start the bridge (broker, queues, consumer, store)
//! 4. Serve HTTP until Ctrl+C
//! 5. Shut the bridge down, resolving anything still pending, then let
//!    in-flight HTTP calls finish

use anyhow::{Context, Result};
use bridge_runtime::config::load_config;
use bridge_runtime::{build_bridge, handlers, queue_connector, serve};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config()?;
    let bridge = Arc::new(build_bridge(
        &config,
        queue_connector(&config),
        handlers::dispatch_table(),
    ));
    bridge.start().await.context("failed to start bridge")?;

    let addr = config.http.addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(addr = %addr, service = %config.bridge.service_name, "Bridge is running. Press Ctrl+C to stop.");

    let report = serve(listener, bridge, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
        }
    })
    .await?;

    info!(drained = report.drained, "Shutdown complete");
    Ok(())
}
