//! Pending Request Registry - the async-to-sync bridge.
//!
//! Maps request IDs to callers waiting for a reply that arrives on the queue.

use crate::domain::correlation::RequestId;
use crate::domain::error::BridgeError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

/// What a caller finally receives: the handler's payload or an error.
pub type ReplyOutcome = Result<serde_json::Value, BridgeError>;

/// Resolution delivered to a waiting caller
#[derive(Debug)]
pub struct Resolution {
    /// Request this resolution is for
    pub request_id: RequestId,
    /// Success payload or error
    pub outcome: ReplyOutcome,
    /// Time between registration and resolution
    pub response_time: Duration,
}

/// A request waiting for its reply
struct PendingRequest {
    /// One-shot completion slot; sending consumes it
    sender: oneshot::Sender<Resolution>,
    /// When request was registered
    created_at: Instant,
    /// Operation name (for logging)
    operation: String,
    /// Deadline for this request
    timeout: Duration,
}

impl PendingRequest {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) > self.timeout
    }

    /// Resolve the caller. Returns false if the caller already went away.
    fn resolve(self, request_id: RequestId, outcome: ReplyOutcome) -> bool {
        let resolution = Resolution {
            request_id,
            outcome,
            response_time: self.created_at.elapsed(),
        };
        self.sender.send(resolution).is_ok()
    }
}

/// Statistics for the pending request registry
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Total requests registered
    pub total_registered: AtomicU64,
    /// Total requests resolved through `complete()`
    pub total_completed: AtomicU64,
    /// Total requests that hit their deadline
    pub total_timeouts: AtomicU64,
    /// Total requests whose caller was gone, or that were cancelled
    pub total_cancelled: AtomicU64,
    /// Total requests removed by `drain()`
    pub total_drained: AtomicU64,
}

/// Point-in-time copy of [`PendingStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingStatsSnapshot {
    pub pending: usize,
    pub registered: u64,
    pub completed: u64,
    pub timeouts: u64,
    pub cancelled: u64,
    pub drained: u64,
}

/// Receiving half handed to the caller by [`PendingRequestRegistry::register`].
#[derive(Debug)]
pub struct PendingReply {
    request_id: RequestId,
    receiver: oneshot::Receiver<Resolution>,
    timeout: Duration,
}

impl PendingReply {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for the reply, up to the request's deadline.
    ///
    /// On expiry the handle is removed from `registry` and the caller gets
    /// `RequestTimedOut`.
    pub async fn wait(self, registry: &PendingRequestRegistry) -> ReplyOutcome {
        let request_id = self.request_id;
        match tokio::time::timeout(self.timeout, self.receiver).await {
            Ok(Ok(resolution)) => resolution.outcome,
            Ok(Err(_)) => Err(BridgeError::ResponseChannelClosed),
            Err(_) => {
                registry.expire(&request_id);
                Err(BridgeError::RequestTimedOut(self.timeout.as_millis() as u64))
            }
        }
    }
}

/// A handle removed by [`PendingRequestRegistry::drain`], still owed a resolution.
pub struct DrainedRequest {
    request_id: RequestId,
    request: PendingRequest,
}

impl DrainedRequest {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn operation(&self) -> &str {
        &self.request.operation
    }

    pub fn age(&self) -> Duration {
        self.request.created_at.elapsed()
    }

    /// Resolve the drained caller. Returns false if the caller already went away.
    pub fn resolve(self, outcome: ReplyOutcome) -> bool {
        self.request.resolve(self.request_id, outcome)
    }
}

impl std::fmt::Debug for DrainedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrainedRequest")
            .field("request_id", &self.request_id)
            .field("operation", &self.request.operation)
            .finish()
    }
}

/// Pending request registry.
///
/// Flow:
/// 1. Caller calls `register()` to get a request ID and a `PendingReply`
/// 2. Caller publishes a request envelope carrying the ID
/// 3. Correlator receives the reply and calls `complete()`
/// 4. Caller awaits the `PendingReply` or times out
///
/// Every handle leaves the table exactly once: through `complete()`,
/// `expire()`, `remove_expired()`, `cancel()` or `drain()`.
pub struct PendingRequestRegistry {
    /// Map of request ID to pending request
    pending: DashMap<RequestId, PendingRequest>,
    /// Default deadline
    default_timeout: Duration,
    /// Statistics
    stats: Arc<PendingStats>,
}

impl PendingRequestRegistry {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            default_timeout,
            stats: Arc::new(PendingStats::default()),
        }
    }

    /// Register a pending request and get the receiver for its resolution.
    pub fn register(&self, operation: &str, timeout: Option<Duration>) -> (RequestId, PendingReply) {
        let (tx, rx) = oneshot::channel();
        let timeout = timeout.unwrap_or(self.default_timeout);
        let request = PendingRequest {
            sender: tx,
            created_at: Instant::now(),
            operation: operation.to_string(),
            timeout,
        };

        let request_id = loop {
            let candidate = RequestId::new();
            if let Entry::Vacant(slot) = self.pending.entry(candidate) {
                slot.insert(request);
                break candidate;
            }
        };
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);

        debug!(
            request_id = %request_id,
            operation = operation,
            "Registered pending request"
        );

        (
            request_id,
            PendingReply {
                request_id,
                receiver: rx,
                timeout,
            },
        )
    }

    /// Resolve a pending request and remove it.
    ///
    /// Returns `Ok(true)` if the caller received the outcome, `Ok(false)` if
    /// the handle existed but its caller was already gone, and
    /// `Err(UnknownOrExpiredRequest)` if no handle exists for the ID.
    pub fn complete(&self, request_id: RequestId, outcome: ReplyOutcome) -> Result<bool, BridgeError> {
        let Some((_, pending)) = self.pending.remove(&request_id) else {
            debug!(request_id = %request_id, "No pending request for ID");
            return Err(BridgeError::UnknownOrExpiredRequest(request_id));
        };

        let operation = pending.operation.clone();
        let elapsed = pending.created_at.elapsed();
        let is_error = outcome.is_err();

        if pending.resolve(request_id, outcome) {
            self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
            debug!(
                request_id = %request_id,
                operation = %operation,
                error = is_error,
                response_time_ms = elapsed.as_millis() as u64,
                "Completed pending request"
            );
            Ok(true)
        } else {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(
                request_id = %request_id,
                operation = %operation,
                "Pending request caller dropped"
            );
            Ok(false)
        }
    }

    /// Remove every remaining handle so the caller can force-resolve them.
    pub fn drain(&self) -> Vec<DrainedRequest> {
        let ids: Vec<RequestId> = self.pending.iter().map(|entry| *entry.key()).collect();
        let drained: Vec<DrainedRequest> = ids
            .into_iter()
            .filter_map(|id| self.pending.remove(&id))
            .map(|(request_id, request)| DrainedRequest {
                request_id,
                request,
            })
            .collect();

        self.stats
            .total_drained
            .fetch_add(drained.len() as u64, Ordering::Relaxed);
        if !drained.is_empty() {
            debug!(count = drained.len(), "Drained pending requests");
        }
        drained
    }

    /// Drop a request whose caller stopped waiting at its deadline.
    pub fn expire(&self, request_id: &RequestId) -> bool {
        if let Some((_, request)) = self.pending.remove(request_id) {
            self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
            warn!(
                request_id = %request_id,
                operation = %request.operation,
                timeout_ms = request.timeout.as_millis() as u64,
                "Pending request timed out"
            );
            true
        } else {
            false
        }
    }

    /// Resolve every overdue request with `RequestTimedOut` (TTL sweep).
    ///
    /// Returns the number of requests removed.
    pub fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| *entry.key())
            .collect();

        let mut removed = 0;
        for id in expired {
            let Some((_, request)) = self.pending.remove_if(&id, |_, r| r.is_expired(now)) else {
                continue;
            };
            warn!(
                request_id = %id,
                operation = %request.operation,
                elapsed_ms = now.duration_since(request.created_at).as_millis() as u64,
                timeout_ms = request.timeout.as_millis() as u64,
                "Removing expired pending request"
            );
            let timeout_ms = request.timeout.as_millis() as u64;
            self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
            request.resolve(id, Err(BridgeError::RequestTimedOut(timeout_ms)));
            removed += 1;
        }

        removed
    }

    /// Cancel a pending request without resolving it.
    pub fn cancel(&self, request_id: &RequestId) -> bool {
        if self.pending.remove(request_id).is_some() {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Get number of currently pending requests
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Check if a request ID is pending
    pub fn is_pending(&self, request_id: &RequestId) -> bool {
        self.pending.contains_key(request_id)
    }

    /// Default per-request deadline
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Get statistics
    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }

    pub fn snapshot(&self) -> PendingStatsSnapshot {
        PendingStatsSnapshot {
            pending: self.pending_count(),
            registered: self.stats.total_registered.load(Ordering::Relaxed),
            completed: self.stats.total_completed.load(Ordering::Relaxed),
            timeouts: self.stats.total_timeouts.load(Ordering::Relaxed),
            cancelled: self.stats.total_cancelled.load(Ordering::Relaxed),
            drained: self.stats.total_drained.load(Ordering::Relaxed),
        }
    }
}

/// Background task that resolves expired requests until shutdown is signalled.
pub async fn cleanup_task(
    registry: Arc<PendingRequestRegistry>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut cleanup_interval = tokio::time::interval(interval);
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cleanup_interval.tick() => {
                let removed = registry.remove_expired();
                if removed > 0 {
                    debug!(removed = removed, "Cleaned up expired pending requests");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Pending request cleanup stopped");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_register_and_complete() {
        let registry = PendingRequestRegistry::new(Duration::from_secs(30));

        let (request_id, reply) = registry.register("/sla", None);
        assert!(registry.is_pending(&request_id));
        assert_eq!(registry.pending_count(), 1);
        assert_eq!(reply.request_id(), request_id);

        assert_eq!(registry.complete(request_id, Ok(json!("sla"))), Ok(true));
        assert_eq!(reply.wait(&registry).await, Ok(json!("sla")));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_complete_unknown_id() {
        let registry = PendingRequestRegistry::new(Duration::from_secs(30));
        let unknown = RequestId::new();

        assert_eq!(
            registry.complete(unknown, Ok(json!(null))),
            Err(BridgeError::UnknownOrExpiredRequest(unknown))
        );
    }

    #[tokio::test]
    async fn test_second_completion_is_rejected() {
        let registry = PendingRequestRegistry::new(Duration::from_secs(30));
        let (id, reply) = registry.register("/invoice.post", None);

        assert_eq!(registry.complete(id, Ok(json!("first"))), Ok(true));
        assert_eq!(
            registry.complete(id, Err(BridgeError::handler(500, "second"))),
            Err(BridgeError::UnknownOrExpiredRequest(id))
        );

        assert_eq!(reply.wait(&registry).await, Ok(json!("first")));
    }

    #[tokio::test]
    async fn test_complete_after_caller_dropped() {
        let registry = PendingRequestRegistry::new(Duration::from_secs(30));
        let (id, reply) = registry.register("/sla", None);
        drop(reply);

        assert_eq!(registry.complete(id, Ok(json!(null))), Ok(false));
        assert!(!registry.is_pending(&id));
        assert_eq!(registry.snapshot().cancelled, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration_unique() {
        let registry = Arc::new(PendingRequestRegistry::new(Duration::from_secs(30)));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                (0..250)
                    .map(|_| {
                        let (id, reply) = registry.register("/sla", None);
                        std::mem::forget(reply);
                        id
                    })
                    .collect::<Vec<_>>()
            }));
        }

        let mut ids = HashSet::new();
        for task in tasks {
            for id in task.await.unwrap() {
                assert!(ids.insert(id), "duplicate request id {id}");
            }
        }
        assert_eq!(ids.len(), 2_000);
        assert_eq!(registry.pending_count(), 2_000);
    }

    #[tokio::test]
    async fn test_drain_returns_remaining() {
        let registry = PendingRequestRegistry::new(Duration::from_secs(30));
        let handles: Vec<_> = (0..5).map(|_| registry.register("/sla", None)).collect();

        registry.complete(handles[0].0, Ok(json!(0))).unwrap();
        registry.complete(handles[1].0, Ok(json!(1))).unwrap();

        let drained = registry.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(registry.pending_count(), 0);

        let drained_ids: HashSet<_> = drained.iter().map(DrainedRequest::request_id).collect();
        let expected: HashSet<_> = handles[2..].iter().map(|(id, _)| *id).collect();
        assert_eq!(drained_ids, expected);

        for request in drained {
            assert!(request.resolve(Err(BridgeError::ServiceShuttingDown)));
        }
        for (_, reply) in handles.into_iter().skip(2) {
            assert_eq!(
                reply.wait(&registry).await,
                Err(BridgeError::ServiceShuttingDown)
            );
        }
        assert_eq!(registry.snapshot().drained, 3);
    }

    #[tokio::test]
    async fn test_remove_expired_resolves_timeout() {
        let registry = PendingRequestRegistry::new(Duration::from_millis(10));

        let (id1, reply1) = registry.register("/sla", None);
        let (id2, _reply2) = registry.register("/sla", Some(Duration::from_secs(30)));

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(registry.remove_expired(), 1);
        assert!(!registry.is_pending(&id1));
        assert!(registry.is_pending(&id2));
        assert_eq!(
            reply1.receiver.await.unwrap().outcome,
            Err(BridgeError::RequestTimedOut(10))
        );
        assert_eq!(registry.snapshot().timeouts, 1);
    }

    #[tokio::test]
    async fn test_wait_times_out_and_expires() {
        let registry = PendingRequestRegistry::new(Duration::from_millis(20));
        let (id, reply) = registry.register("/sla", None);

        assert_eq!(
            reply.wait(&registry).await,
            Err(BridgeError::RequestTimedOut(20))
        );
        assert!(!registry.is_pending(&id));
        assert_eq!(
            registry.complete(id, Ok(json!("late"))),
            Err(BridgeError::UnknownOrExpiredRequest(id))
        );
    }

    #[tokio::test]
    async fn test_cancel() {
        let registry = PendingRequestRegistry::new(Duration::from_secs(30));
        let (id, _reply) = registry.register("/sla", None);

        assert!(registry.cancel(&id));
        assert!(!registry.is_pending(&id));
        assert!(!registry.cancel(&id));
    }

    #[tokio::test]
    async fn test_cleanup_task_stops_on_shutdown() {
        let registry = Arc::new(PendingRequestRegistry::new(Duration::from_millis(5)));
        let (tx, rx) = watch::channel(false);
        let (id, _reply) = registry.register("/sla", None);

        let task = tokio::spawn(cleanup_task(
            Arc::clone(&registry),
            Duration::from_millis(5),
            rx,
        ));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!registry.is_pending(&id));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_millis(200), task)
            .await
            .expect("cleanup task should stop")
            .unwrap();
    }
}
