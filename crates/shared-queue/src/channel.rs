//! # Queue Transport Traits
//!
//! The three handles a client walks through: connector, connection, channel.

use crate::consumer::Consumer;
use crate::QueueError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Broker-assigned identifier of a single delivery, used for ack/nack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(pub u64);

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Tag to acknowledge this delivery with.
    pub tag: DeliveryTag,
    /// Queue the message was consumed from.
    pub queue: String,
    /// Raw message body.
    pub body: Vec<u8>,
    /// True if this message was delivered before and not acknowledged.
    pub redelivered: bool,
}

/// Opens connections to a broker.
#[async_trait]
pub trait QueueConnector: Send + Sync {
    /// Establish a new connection.
    async fn connect(&self) -> Result<Arc<dyn QueueConnection>, QueueError>;

    /// Human-readable broker description for logs (credentials redacted).
    fn describe(&self) -> String;
}

/// An open broker connection.
#[async_trait]
pub trait QueueConnection: Send + Sync {
    /// Open a channel on this connection.
    async fn create_channel(&self) -> Result<Arc<dyn QueueChannel>, QueueError>;

    /// Close the connection and every channel opened on it.
    async fn close(&self) -> Result<(), QueueError>;
}

/// A channel: the unit that publishes, consumes and acknowledges.
#[async_trait]
pub trait QueueChannel: Send + Sync {
    /// Declare the queue if it does not exist yet. Idempotent.
    async fn assert_queue(&self, queue: &str) -> Result<(), QueueError>;

    /// Submit a message to the named queue.
    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), QueueError>;

    /// Start consuming the named queue with manual acknowledgement.
    async fn consume(&self, queue: &str) -> Result<Consumer, QueueError>;

    /// Stop a consumer. Its pending unacked deliveries stay owned by the channel.
    async fn cancel(&self, consumer_tag: &str) -> Result<(), QueueError>;

    /// Acknowledge a delivery.
    async fn ack(&self, tag: DeliveryTag) -> Result<(), QueueError>;

    /// Reject a delivery, optionally putting it back on the queue.
    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), QueueError>;

    /// Close the channel. Unacked deliveries are requeued by the broker.
    async fn close(&self) -> Result<(), QueueError>;
}
