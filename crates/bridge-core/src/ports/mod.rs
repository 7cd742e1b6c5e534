//! Outbound ports for resources the bridge manages but does not use on the
//! correlation path.

pub mod store;

pub use store::{InMemoryStore, StoreConnector, StoreError, StoreHandle};
