//! Auxiliary document store port.
//!
//! The bridge only sequences the store's lifecycle: connect on start, close
//! on shutdown. Nothing on the request/reply path touches it.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    ConnectionFailed(String),
    #[error("store already closed")]
    AlreadyClosed,
    #[error("store close failed: {0}")]
    CloseFailed(String),
}

/// Opens store handles.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn StoreHandle>, StoreError>;

    /// Store description for logs (credentials redacted).
    fn describe(&self) -> String;
}

/// An open store handle.
#[async_trait]
pub trait StoreHandle: Send + Sync {
    /// Liveness check.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn close(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct StoreState {
    unreachable: bool,
    fail_close: bool,
    open_handles: usize,
    connects: u64,
}

/// In-process store. Cloning shares the same state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unreachable = !reachable;
    }

    pub fn fail_closes(&self, fail: bool) {
        self.state.lock().fail_close = fail;
    }

    pub fn open_handles(&self) -> usize {
        self.state.lock().open_handles
    }

    pub fn connect_count(&self) -> u64 {
        self.state.lock().connects
    }
}

#[async_trait]
impl StoreConnector for InMemoryStore {
    async fn connect(&self) -> Result<Arc<dyn StoreHandle>, StoreError> {
        let mut state = self.state.lock();
        if state.unreachable {
            return Err(StoreError::ConnectionFailed("in-memory store unreachable".into()));
        }
        state.open_handles += 1;
        state.connects += 1;
        debug!(open_handles = state.open_handles, "In-memory store connected");

        Ok(Arc::new(InMemoryStoreHandle {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }

    fn describe(&self) -> String {
        "memory://store".to_string()
    }
}

struct InMemoryStoreHandle {
    state: Arc<Mutex<StoreState>>,
    closed: AtomicBool,
}

#[async_trait]
impl StoreHandle for InMemoryStoreHandle {
    async fn ping(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::AlreadyClosed)
        } else {
            Ok(())
        }
    }

    async fn close(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if state.fail_close {
            return Err(StoreError::CloseFailed("in-memory store refused close".into()));
        }
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(StoreError::AlreadyClosed);
        }
        state.open_handles -= 1;
        Ok(())
    }
}
