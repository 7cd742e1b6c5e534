#![allow(missing_docs)]

//! Bridge Core - request-reply correlation over a message queue.
//!
//! A synchronous caller (typically an HTTP request) is turned into a queue
//! message; its reply, arriving asynchronously on a consumer, is matched back
//! to the caller by request ID.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            BridgeService                             │
//! │                                                                      │
//! │  request(op, payload)                                                │
//! │        │                                                             │
//! │        ▼                                                             │
//! │  ┌──────────────────────┐  register   ┌─────────────────────────┐   │
//! │  │  OutboundPublisher   │◄────────────│ PendingRequestRegistry  │   │
//! │  └──────────┬───────────┘             │ (RequestId → oneshot)   │   │
//! │             │ publish                 └───────────▲─────────────┘   │
//! │             ▼                                     │ complete        │
//! │      ┌─────────────┐  consume  ┌──────────────────┴─────────────┐   │
//! │      │    Queue    │──────────→│       InboundCorrelator        │   │
//! │      └─────────────┘           │ decode → lookup → dispatch     │   │
//! │                                └──────────────────┬─────────────┘   │
//! │                                                   │ resolve         │
//! │                                       ┌───────────▼─────────────┐   │
//! │                                       │      DispatchTable      │   │
//! │                                       │ (operation → handler)   │   │
//! │                                       └─────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - Every request ID is unique for the life of the process.
//! - Every registered request is resolved exactly once: by its reply, by its
//!   deadline, by a publish failure, or by shutdown.
//! - A malformed or orphaned reply is acknowledged and dropped; it never
//!   stops the consumer.
//!
//! # Usage
//!
//! ```ignore
//! use bridge_core::{BridgeConfig, BridgeService, DispatchTable, HandlerResult};
//!
//! let dispatch = DispatchTable::new()
//!     .with_handler("/invoice.post", |_: &Value| HandlerResult::success("invoice created"));
//! let service = BridgeService::new(BridgeConfig::for_service("billing"), connector, dispatch);
//! service.start().await?;
//! let reply = service.request("/invoice.post", payload).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod domain;
pub mod ipc;
pub mod ports;
pub mod service;

// Re-exports for public API
pub use domain::config::{BridgeConfig, ConfigError};
pub use domain::correlation::RequestId;
pub use domain::dispatch::{DispatchTable, EventHandler, HandlerResult};
pub use domain::envelope::{ReplyEnvelope, RequestEnvelope, RequestPayload};
pub use domain::error::{status, BridgeError, BridgeResult};
pub use domain::pending::{PendingReply, PendingRequestRegistry, PendingStatsSnapshot};
pub use ipc::{CorrelatorStatsSnapshot, DeliveryOutcome, InboundCorrelator, OutboundPublisher};
pub use ports::{InMemoryStore, StoreConnector, StoreError, StoreHandle};
pub use service::{BridgeService, BridgeStats, LifecycleState, ShutdownReport};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
