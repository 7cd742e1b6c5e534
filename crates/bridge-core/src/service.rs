//! Bridge service - lifecycle manager and transport-facing entry point.
//!
//! ```text
//! Uninitialized ──start()──→ Connecting ──ok──→ Running ──shutdown()──→ ShuttingDown ──→ Closed
//!       ▲                        │
//!       └─────────failure────────┘
//! ```

use crate::domain::config::BridgeConfig;
use crate::domain::correlation::RequestId;
use crate::domain::dispatch::DispatchTable;
use crate::domain::envelope::RequestEnvelope;
use crate::domain::error::{BridgeError, BridgeResult};
use crate::domain::pending::{
    cleanup_task, PendingReply, PendingRequestRegistry, PendingStatsSnapshot,
};
use crate::ipc::correlator::{CorrelatorStats, CorrelatorStatsSnapshot, InboundCorrelator};
use crate::ipc::publisher::OutboundPublisher;
use crate::ports::store::{StoreConnector, StoreHandle};
use parking_lot::RwLock;
use serde::Serialize;
use shared_queue::{QueueChannel, QueueConnection, QueueConnector};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle state of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Connecting,
    Running,
    ShuttingDown,
    Closed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Result of a shutdown. Close failures are collected, never raised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Pending requests resolved with `ServiceShuttingDown`
    pub drained: usize,
    /// Best-effort steps that failed, as `"step: error"`
    pub errors: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn record(&mut self, step: &str, err: impl fmt::Display) {
        warn!(step = step, error = %err, "Shutdown step failed");
        self.errors.push(format!("{}: {}", step, err));
    }
}

/// Snapshot served by the admin stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStats {
    pub service: String,
    pub state: LifecycleState,
    pub request_queue: String,
    pub reply_queue: String,
    pub operations: Vec<String>,
    pub pending: PendingStatsSnapshot,
    pub correlator: CorrelatorStatsSnapshot,
}

/// Everything opened by `start()`, torn down by `shutdown()` or a failed start.
#[derive(Default)]
struct Resources {
    connection: Option<Arc<dyn QueueConnection>>,
    channel: Option<Arc<dyn QueueChannel>>,
    consumer_tag: Option<String>,
    shutdown_tx: Option<watch::Sender<bool>>,
    correlator: Option<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
    store: Option<Arc<dyn StoreHandle>>,
}

impl Resources {
    /// Close everything in reverse dependency order, best-effort.
    async fn teardown(mut self, registry: &PendingRequestRegistry) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        // Stop consumption first so no reply races the drain
        if let (Some(channel), Some(tag)) = (&self.channel, self.consumer_tag.take()) {
            if let Err(e) = channel.cancel(&tag).await {
                report.record("cancel consumer", e);
            }
        }
        if let Some(tx) = self.shutdown_tx.take() {
            // Err only means every task already exited
            let _ = tx.send(true);
        }
        if let Some(task) = self.correlator.take() {
            if let Err(e) = task.await {
                report.record("stop correlator", e);
            }
        }
        if let Some(task) = self.sweeper.take() {
            if let Err(e) = task.await {
                report.record("stop sweeper", e);
            }
        }

        for request in registry.drain() {
            debug!(
                request_id = %request.request_id(),
                operation = %request.operation(),
                "Resolving pending request on shutdown"
            );
            request.resolve(Err(BridgeError::ServiceShuttingDown));
            report.drained += 1;
        }

        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                report.record("close channel", e);
            }
        }
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                report.record("close connection", e);
            }
        }
        if let Some(store) = self.store.take() {
            if let Err(e) = store.close().await {
                report.record("close store", e);
            }
        }

        report
    }
}

fn init_failed(step: &str, err: impl fmt::Display) -> BridgeError {
    BridgeError::InitializationFailed(format!("{}: {}", step, err))
}

/// Request-reply bridge over a message queue.
///
/// Owns the connection, channel, consumer and background tasks; nothing is
/// global. Share it behind an `Arc`.
pub struct BridgeService {
    config: BridgeConfig,
    connector: Arc<dyn QueueConnector>,
    store_connector: Option<Arc<dyn StoreConnector>>,
    dispatch: Arc<DispatchTable>,
    registry: Arc<PendingRequestRegistry>,
    correlator_stats: Arc<CorrelatorStats>,
    state: RwLock<LifecycleState>,
    publisher: RwLock<Option<Arc<OutboundPublisher>>>,
    resources: Mutex<Option<Resources>>,
}

impl BridgeService {
    /// Create a bridge. The dispatch table is frozen from here on.
    pub fn new(
        config: BridgeConfig,
        connector: Arc<dyn QueueConnector>,
        dispatch: DispatchTable,
    ) -> Self {
        let registry = Arc::new(PendingRequestRegistry::new(config.request_timeout()));
        Self {
            config,
            connector,
            store_connector: None,
            dispatch: Arc::new(dispatch),
            registry,
            correlator_stats: Arc::new(CorrelatorStats::default()),
            state: RwLock::new(LifecycleState::Uninitialized),
            publisher: RwLock::new(None),
            resources: Mutex::new(None),
        }
    }

    /// Attach an auxiliary store, connected during `start()`.
    pub fn with_store(mut self, store: Arc<dyn StoreConnector>) -> Self {
        self.store_connector = Some(store);
        self
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn dispatch(&self) -> &DispatchTable {
        &self.dispatch
    }

    pub fn registry(&self) -> &Arc<PendingRequestRegistry> {
        &self.registry
    }

    /// Connect, declare queues, start consuming. On failure everything opened
    /// so far is closed and the bridge returns to `Uninitialized`.
    pub async fn start(&self) -> BridgeResult<()> {
        {
            let mut state = self.state.write();
            if *state != LifecycleState::Uninitialized {
                return Err(BridgeError::InitializationFailed(format!(
                    "cannot start from state {}",
                    *state
                )));
            }
            *state = LifecycleState::Connecting;
        }

        info!(
            service = %self.config.service_name,
            broker = %self.connector.describe(),
            request_queue = %self.config.request_queue(),
            reply_queue = %self.config.reply_queue(),
            "Starting bridge"
        );

        let mut resources = Resources::default();
        match self.open(&mut resources).await {
            Ok(publisher) => {
                *self.publisher.write() = Some(Arc::new(publisher));
                *self.resources.lock().await = Some(resources);
                *self.state.write() = LifecycleState::Running;
                info!(
                    service = %self.config.service_name,
                    operations = self.dispatch.len(),
                    "Bridge running"
                );
                Ok(())
            }
            Err(e) => {
                error!(service = %self.config.service_name, error = %e, "Bridge failed to start");
                let report = resources.teardown(&self.registry).await;
                if !report.is_clean() {
                    warn!(errors = ?report.errors, "Rollback after failed start was incomplete");
                }
                *self.state.write() = LifecycleState::Uninitialized;
                Err(e)
            }
        }
    }

    async fn open(&self, resources: &mut Resources) -> BridgeResult<OutboundPublisher> {
        let request_queue = self.config.request_queue();
        let reply_queue = self.config.reply_queue();

        let connection = self
            .connector
            .connect()
            .await
            .map_err(|e| init_failed("connect to broker", e))?;
        resources.connection = Some(Arc::clone(&connection));

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| init_failed("create channel", e))?;
        resources.channel = Some(Arc::clone(&channel));

        channel
            .assert_queue(request_queue)
            .await
            .map_err(|e| init_failed("assert request queue", e))?;
        if self.config.is_split() {
            channel
                .assert_queue(reply_queue)
                .await
                .map_err(|e| init_failed("assert reply queue", e))?;
        }

        let consumer = channel
            .consume(reply_queue)
            .await
            .map_err(|e| init_failed("consume reply queue", e))?;
        resources.consumer_tag = Some(consumer.tag().to_string());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        resources.shutdown_tx = Some(shutdown_tx);

        let correlator = InboundCorrelator::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.dispatch),
            Arc::clone(&channel),
            Arc::clone(&self.correlator_stats),
        );
        resources.correlator = Some(tokio::spawn(correlator.run(consumer, shutdown_rx.clone())));
        resources.sweeper = Some(tokio::spawn(cleanup_task(
            Arc::clone(&self.registry),
            self.config.cleanup_interval(),
            shutdown_rx,
        )));

        if let Some(store) = &self.store_connector {
            debug!(store = %store.describe(), "Connecting auxiliary store");
            let handle = store
                .connect()
                .await
                .map_err(|e| init_failed("connect to store", e))?;
            resources.store = Some(handle);
        }

        let publisher = OutboundPublisher::new(channel, request_queue);
        Ok(if self.config.is_split() {
            publisher.with_reply_to(reply_queue)
        } else {
            publisher
        })
    }

    /// Register and publish a request; returns the handle to await.
    pub async fn submit(
        &self,
        operation: &str,
        payload: serde_json::Value,
    ) -> BridgeResult<PendingReply> {
        self.submit_with_timeout(operation, payload, None).await
    }

    /// Like [`submit`](Self::submit) with a per-call deadline.
    pub async fn submit_with_timeout(
        &self,
        operation: &str,
        payload: serde_json::Value,
        timeout: Option<Duration>,
    ) -> BridgeResult<PendingReply> {
        // Register under the state lock so shutdown's drain sees every handle
        let (request_id, reply, publisher) = {
            let state = self.state.read();
            if *state != LifecycleState::Running {
                return Err(BridgeError::ServiceUnavailable(format!(
                    "bridge is {}",
                    *state
                )));
            }
            let Some(publisher) = self.publisher.read().clone() else {
                return Err(BridgeError::ServiceUnavailable(
                    "channel not available".into(),
                ));
            };
            let (request_id, reply) = self.registry.register(operation, timeout);
            (request_id, reply, publisher)
        };

        let envelope = RequestEnvelope::new(request_id, operation, payload);
        if let Err(e) = publisher.publish(envelope).await {
            self.fail_request(request_id, e.clone());
            return Err(e);
        }

        Ok(reply)
    }

    fn fail_request(&self, request_id: RequestId, err: BridgeError) {
        if self.registry.complete(request_id, Err(err)).is_err() {
            debug!(request_id = %request_id, "Failed request already resolved");
        }
    }

    /// Submit a request and wait for its outcome.
    pub async fn request(
        &self,
        operation: &str,
        payload: serde_json::Value,
    ) -> BridgeResult<serde_json::Value> {
        self.request_with_timeout(operation, payload, None).await
    }

    pub async fn request_with_timeout(
        &self,
        operation: &str,
        payload: serde_json::Value,
        timeout: Option<Duration>,
    ) -> BridgeResult<serde_json::Value> {
        let reply = self.submit_with_timeout(operation, payload, timeout).await?;
        reply.wait(&self.registry).await
    }

    /// Stop consuming, resolve every pending request with
    /// `ServiceShuttingDown`, close channel, connection and store.
    ///
    /// Idempotent: later calls return an empty report.
    pub async fn shutdown(&self) -> ShutdownReport {
        {
            let mut state = self.state.write();
            let current = *state;
            match current {
                LifecycleState::Running => *state = LifecycleState::ShuttingDown,
                LifecycleState::Uninitialized => {
                    *state = LifecycleState::Closed;
                    info!(service = %self.config.service_name, "Bridge closed before start");
                    return ShutdownReport::default();
                }
                other => {
                    debug!(state = %other, "Shutdown already handled");
                    return ShutdownReport::default();
                }
            }
        }

        info!(
            service = %self.config.service_name,
            pending = self.registry.pending_count(),
            "Shutting down bridge"
        );

        *self.publisher.write() = None;
        let resources = self.resources.lock().await.take();
        let report = match resources {
            Some(resources) => resources.teardown(&self.registry).await,
            None => ShutdownReport::default(),
        };

        *self.state.write() = LifecycleState::Closed;
        info!(
            service = %self.config.service_name,
            drained = report.drained,
            errors = report.errors.len(),
            "Bridge closed"
        );
        report
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            service: self.config.service_name.clone(),
            state: self.state(),
            request_queue: self.config.request_queue().to_string(),
            reply_queue: self.config.reply_queue().to_string(),
            operations: self
                .dispatch
                .operations()
                .into_iter()
                .map(str::to_string)
                .collect(),
            pending: self.registry.snapshot(),
            correlator: self.correlator_stats.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dispatch::HandlerResult;
    use crate::ports::store::InMemoryStore;
    use serde_json::{json, Value};
    use shared_queue::InMemoryBroker;

    fn table() -> DispatchTable {
        DispatchTable::new().with_handler("/sla", |_: &Value| HandlerResult::success("sla"))
    }

    fn bridge(broker: &InMemoryBroker) -> BridgeService {
        BridgeService::new(
            BridgeConfig::for_service("billing"),
            Arc::new(broker.clone()),
            table(),
        )
    }

    #[tokio::test]
    async fn test_start_transitions_to_running() {
        let broker = InMemoryBroker::new();
        let service = bridge(&broker);
        assert_eq!(service.state(), LifecycleState::Uninitialized);

        service.start().await.unwrap();
        assert_eq!(service.state(), LifecycleState::Running);
        assert!(broker.has_queue("billing"));
        assert_eq!(broker.consumer_count("billing"), 1);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let broker = InMemoryBroker::new();
        let service = bridge(&broker);
        service.start().await.unwrap();

        assert!(matches!(
            service.start().await,
            Err(BridgeError::InitializationFailed(_))
        ));
        assert_eq!(service.state(), LifecycleState::Running);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_request_before_start_unavailable() {
        let broker = InMemoryBroker::new();
        let service = bridge(&broker);

        let err = service.request("/sla", json!(null)).await.unwrap_err();
        assert!(matches!(err, BridgeError::ServiceUnavailable(_)));
        assert_eq!(service.registry().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_broker_rolls_back() {
        let broker = InMemoryBroker::new();
        broker.set_reachable(false);
        let service = bridge(&broker);

        let err = service.start().await.unwrap_err();
        assert!(matches!(err, BridgeError::InitializationFailed(msg) if msg.contains("connect to broker")));
        assert_eq!(service.state(), LifecycleState::Uninitialized);

        broker.set_reachable(true);
        service.start().await.unwrap();
        assert!(service.is_running());
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_store_failure_closes_queue_resources() {
        let broker = InMemoryBroker::new();
        let store = InMemoryStore::new();
        store.set_reachable(false);
        let service = bridge(&broker).with_store(Arc::new(store.clone()));

        assert!(service.start().await.is_err());
        assert_eq!(service.state(), LifecycleState::Uninitialized);
        assert_eq!(broker.open_connections(), 0);
        assert_eq!(broker.open_channels(), 0);
        assert_eq!(broker.consumer_count("billing"), 0);
    }

    #[tokio::test]
    async fn test_shutdown_idempotent() {
        let broker = InMemoryBroker::new();
        let store = InMemoryStore::new();
        let service = bridge(&broker).with_store(Arc::new(store.clone()));
        service.start().await.unwrap();
        assert_eq!(store.open_handles(), 1);

        let first = service.shutdown().await;
        assert!(first.is_clean());
        assert_eq!(service.state(), LifecycleState::Closed);
        assert_eq!(broker.open_connections(), 0);
        assert_eq!(store.open_handles(), 0);

        assert_eq!(service.shutdown().await, ShutdownReport::default());
        assert!(matches!(
            service.request("/sla", json!(null)).await,
            Err(BridgeError::ServiceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_collects_close_failures() {
        let broker = InMemoryBroker::new();
        let service = bridge(&broker);
        service.start().await.unwrap();

        broker.fail_closes(true);
        let report = service.shutdown().await;

        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[0].starts_with("close channel"));
        assert!(report.errors[1].starts_with("close connection"));
        assert_eq!(service.state(), LifecycleState::Closed);
    }

    #[tokio::test]
    async fn test_shutdown_before_start_closes() {
        let broker = InMemoryBroker::new();
        let service = bridge(&broker);
        assert!(service.shutdown().await.is_clean());
        assert_eq!(service.state(), LifecycleState::Closed);
        assert!(service.start().await.is_err());
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let broker = InMemoryBroker::new();
        let service = bridge(&broker);
        service.start().await.unwrap();
        service.request("/sla", json!(null)).await.unwrap();

        let stats = service.stats();
        assert_eq!(stats.state, LifecycleState::Running);
        assert_eq!(stats.operations, vec!["/sla".to_string()]);
        assert_eq!(stats.pending.completed, 1);
        assert_eq!(stats.correlator.received, 1);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["state"], "running");
        service.shutdown().await;
    }
}
