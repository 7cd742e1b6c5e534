//! Domain layer: identifiers, envelopes, errors, the pending registry and
//! the dispatch table. No I/O.

pub mod config;
pub mod correlation;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod pending;

pub use config::{BridgeConfig, ConfigError, QueueConfig, StoreConfig, TimeoutConfig};
pub use correlation::RequestId;
pub use dispatch::{DispatchTable, EventHandler, HandlerResult};
pub use envelope::{ReplyEnvelope, RequestEnvelope, RequestPayload};
pub use error::{status, BridgeError, BridgeResult};
pub use pending::{
    cleanup_task, DrainedRequest, PendingReply, PendingRequestRegistry, PendingStats,
    PendingStatsSnapshot, ReplyOutcome, Resolution,
};
