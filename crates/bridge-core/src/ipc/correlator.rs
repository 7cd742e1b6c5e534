//! Inbound correlator: consumes replies, runs the matching handler and
//! resolves the waiting caller.
//!
//! One delivery at a time, in delivery order:
//!
//! ```text
//! decode ──✗──→ DecodeFailure (ack, drop)
//!   │
//!   ▼
//! pending? ──✗──→ orphan (ack, drop, handler NOT invoked)
//!   │
//!   ▼
//! dispatch ──✗──→ complete(NotFoundOperation)
//!   │
//!   ▼
//! handler ──→ complete(Success | HandlerError) ──→ ack
//! ```

use crate::domain::correlation::RequestId;
use crate::domain::dispatch::{DispatchTable, EventHandler, HandlerResult};
use crate::domain::envelope::ReplyEnvelope;
use crate::domain::error::status;
use crate::domain::pending::{PendingRequestRegistry, ReplyOutcome};
use serde::Serialize;
use shared_queue::{Consumer, Delivery, QueueChannel};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// What happened to a single delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// A pending request was resolved. `delivered` is false if its caller
    /// had already gone away.
    Completed {
        request_id: RequestId,
        operation: String,
        success: bool,
        delivered: bool,
    },
    /// No pending request for this ID.
    Orphaned(RequestId),
    /// Body was not a valid reply envelope.
    Malformed(String),
}

/// Correlator counters
#[derive(Debug, Default)]
pub struct CorrelatorStats {
    pub received: AtomicU64,
    pub completed: AtomicU64,
    pub orphaned: AtomicU64,
    pub decode_failures: AtomicU64,
    pub handler_failures: AtomicU64,
    pub unknown_operations: AtomicU64,
    pub ack_failures: AtomicU64,
}

impl CorrelatorStats {
    pub fn snapshot(&self) -> CorrelatorStatsSnapshot {
        CorrelatorStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            orphaned: self.orphaned.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            unknown_operations: self.unknown_operations.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CorrelatorStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CorrelatorStatsSnapshot {
    pub received: u64,
    pub completed: u64,
    pub orphaned: u64,
    pub decode_failures: u64,
    pub handler_failures: u64,
    pub unknown_operations: u64,
    pub ack_failures: u64,
}

/// Matches replies to pending requests.
pub struct InboundCorrelator {
    registry: Arc<PendingRequestRegistry>,
    dispatch: Arc<DispatchTable>,
    channel: Arc<dyn QueueChannel>,
    stats: Arc<CorrelatorStats>,
}

impl InboundCorrelator {
    pub fn new(
        registry: Arc<PendingRequestRegistry>,
        dispatch: Arc<DispatchTable>,
        channel: Arc<dyn QueueChannel>,
        stats: Arc<CorrelatorStats>,
    ) -> Self {
        Self {
            registry,
            dispatch,
            channel,
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<CorrelatorStats> {
        &self.stats
    }

    /// Consume until the stream ends or shutdown is signalled.
    pub async fn run(self, mut consumer: Consumer, mut shutdown: watch::Receiver<bool>) {
        info!(
            queue = %consumer.queue(),
            consumer_tag = %consumer.tag(),
            "Correlator started"
        );

        loop {
            tokio::select! {
                delivery = consumer.recv() => {
                    match delivery {
                        Some(delivery) => {
                            self.handle_delivery(delivery).await;
                        }
                        None => {
                            warn!(queue = %consumer.queue(), "Reply stream closed, stopping correlator");
                            break;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Correlator received shutdown signal");
                        break;
                    }
                }
            }
        }

        info!(queue = %consumer.queue(), "Correlator stopped");
    }

    /// Process one delivery and acknowledge it.
    pub async fn handle_delivery(&self, delivery: Delivery) -> DeliveryOutcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        let outcome = self.correlate(&delivery);

        if let Err(e) = self.channel.ack(delivery.tag).await {
            self.stats.ack_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                delivery_tag = %delivery.tag,
                error = %e,
                "Failed to ack delivery; broker may redeliver"
            );
        }

        outcome
    }

    fn correlate(&self, delivery: &Delivery) -> DeliveryOutcome {
        let reply = match ReplyEnvelope::decode(&delivery.body) {
            Ok(reply) => reply,
            Err(e) => {
                self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    queue = %delivery.queue,
                    delivery_tag = %delivery.tag,
                    error = %e,
                    "Dropping malformed reply"
                );
                return DeliveryOutcome::Malformed(e.to_string());
            }
        };

        let request_id = reply.request_id;
        if !self.registry.is_pending(&request_id) {
            self.stats.orphaned.fetch_add(1, Ordering::Relaxed);
            warn!(
                request_id = %request_id,
                operation = %reply.operation,
                redelivered = delivery.redelivered,
                "Reply for unknown or expired request"
            );
            return DeliveryOutcome::Orphaned(request_id);
        }

        let outcome = self.dispatch_reply(&reply);
        let success = outcome.is_ok();

        match self.registry.complete(request_id, outcome) {
            Ok(delivered) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                DeliveryOutcome::Completed {
                    request_id,
                    operation: reply.operation,
                    success,
                    delivered,
                }
            }
            Err(_) => {
                // Expired between the lookup and completion
                self.stats.orphaned.fetch_add(1, Ordering::Relaxed);
                warn!(
                    request_id = %request_id,
                    operation = %reply.operation,
                    "Request expired before its reply was applied"
                );
                DeliveryOutcome::Orphaned(request_id)
            }
        }
    }

    fn dispatch_reply(&self, reply: &ReplyEnvelope) -> ReplyOutcome {
        let handler = match self.dispatch.resolve(&reply.operation) {
            Ok(handler) => handler,
            Err(e) => {
                self.stats.unknown_operations.fetch_add(1, Ordering::Relaxed);
                debug!(
                    request_id = %reply.request_id,
                    operation = %reply.operation,
                    "No handler for operation"
                );
                return Err(e);
            }
        };

        let outcome = invoke(handler.as_ref(), reply).into_outcome();
        if outcome.is_err() {
            self.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }
}

/// Run a handler, turning a panic into a 500 failure.
fn invoke(handler: &dyn EventHandler, reply: &ReplyEnvelope) -> HandlerResult {
    match catch_unwind(AssertUnwindSafe(|| handler.handle(&reply.body))) {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "handler panicked".to_string());
            error!(
                request_id = %reply.request_id,
                operation = %reply.operation,
                panic = %message,
                "Handler panicked"
            );
            HandlerResult::failure(status::INTERNAL_ERROR, message)
        }
    }
}
