//! Outbound publisher: serializes request envelopes onto the request queue.

use crate::domain::envelope::RequestEnvelope;
use crate::domain::error::BridgeError;
use shared_queue::QueueChannel;
use std::sync::Arc;
use tracing::{debug, warn};

/// Publishes request envelopes to a fixed queue.
pub struct OutboundPublisher {
    channel: Arc<dyn QueueChannel>,
    queue: String,
    /// Set when replies come back on a different queue
    reply_to: Option<String>,
}

impl OutboundPublisher {
    pub fn new(channel: Arc<dyn QueueChannel>, queue: impl Into<String>) -> Self {
        Self {
            channel,
            queue: queue.into(),
            reply_to: None,
        }
    }

    /// Stamp every published envelope with the queue replies should go to.
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// Encode and submit an envelope. Any failure is a `PublishFailed`.
    pub async fn publish(&self, envelope: RequestEnvelope) -> Result<(), BridgeError> {
        let request_id = envelope.request_id;
        let envelope = envelope.with_reply_to(self.reply_to.clone());
        let body = envelope
            .encode()
            .map_err(|e| BridgeError::PublishFailed(format!("encode: {}", e)))?;

        if let Err(e) = self.channel.publish(&self.queue, &body).await {
            warn!(
                request_id = %request_id,
                queue = %self.queue,
                error = %e,
                "Failed to publish request"
            );
            return Err(BridgeError::PublishFailed(e.to_string()));
        }

        debug!(
            request_id = %request_id,
            operation = %envelope.operation,
            queue = %self.queue,
            bytes = body.len(),
            "Published request"
        );
        Ok(())
    }
}
