//! # Shared Queue - Named Queues with Manual Acknowledgement
//!
//! Transport abstraction used by the bridge to publish request envelopes and
//! consume replies.
//!
//! ## Model
//!
//! ```text
//! QueueConnector ──connect()──→ QueueConnection ──create_channel()──→ QueueChannel
//!                                                                     │
//!                        assert_queue / publish / consume / ack / close
//!                                                                     │
//!                                                                     ▼
//!                                                      Consumer ──recv()──→ Delivery
//! ```
//!
//! ## Delivery Semantics
//!
//! - **At-least-once:** a delivery stays unacknowledged until `ack()`; if the
//!   owning channel closes first, the message is requeued and redelivered
//!   with `redelivered = true`.
//! - **Manual ack:** consumers must acknowledge every delivery, including the
//!   ones they decide to drop.
//! - **Round-robin:** multiple consumers on one queue share its messages.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod channel;
pub mod consumer;
pub mod memory;

pub use channel::{Delivery, DeliveryTag, QueueChannel, QueueConnection, QueueConnector};
pub use consumer::Consumer;
pub use memory::InMemoryBroker;

#[cfg(feature = "amqp")]
pub use amqp::AmqpConnector;

use thiserror::Error;

/// Errors raised by queue transports.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The broker could not be reached.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The connection was already closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The channel was already closed.
    #[error("channel closed")]
    ChannelClosed,

    /// The named queue has not been declared.
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// The broker refused or failed to accept a message.
    #[error("publish to '{queue}' failed: {reason}")]
    PublishFailed { queue: String, reason: String },

    /// Ack/nack for a delivery tag this channel does not own.
    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),

    /// Any other broker-side failure.
    #[error("broker error: {0}")]
    Broker(String),
}

/// Prefix for generated consumer tags.
pub const CONSUMER_TAG_PREFIX: &str = "bridge";

/// Generate a unique consumer tag.
#[must_use]
pub fn consumer_tag() -> String {
    format!("{}-{}", CONSUMER_TAG_PREFIX, uuid::Uuid::new_v4())
}
