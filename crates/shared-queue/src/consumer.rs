//! # Queue Consumer
//!
//! Receiving side of a `consume()` call.

use crate::channel::Delivery;
use tokio::sync::mpsc;
use tracing::debug;

/// A consumer handle for receiving deliveries from one queue.
///
/// `recv()` returns `None` once the consumer has been cancelled or the
/// channel behind it closed.
pub struct Consumer {
    /// Consumer tag, used to cancel.
    tag: String,
    /// Queue being consumed.
    queue: String,
    /// Deliveries pushed by the broker.
    receiver: mpsc::UnboundedReceiver<Delivery>,
}

impl Consumer {
    /// Create a new consumer handle.
    #[must_use]
    pub fn new(
        tag: impl Into<String>,
        queue: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<Delivery>,
    ) -> Self {
        Self {
            tag: tag.into(),
            queue: queue.into(),
            receiver,
        }
    }

    /// Receive the next delivery.
    pub async fn recv(&mut self) -> Option<Delivery> {
        let delivery = self.receiver.recv().await;
        if delivery.is_none() {
            debug!(consumer_tag = %self.tag, queue = %self.queue, "Consumer stream ended");
        }
        delivery
    }

    /// Try to receive a delivery without waiting.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.receiver.try_recv().ok()
    }

    /// Consumer tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Queue this consumer reads from.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }
}
