//! Queue-facing side of the bridge: outbound publisher and inbound correlator.

pub mod correlator;
pub mod publisher;

pub use correlator::{CorrelatorStats, CorrelatorStatsSnapshot, DeliveryOutcome, InboundCorrelator};
pub use publisher::OutboundPublisher;
