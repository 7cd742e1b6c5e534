//! Event dispatch table: operation name to handler.
//!
//! Built once before the bridge starts, then shared read-only behind an `Arc`.

use crate::domain::error::BridgeError;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome reported by a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerResult {
    Success(Value),
    Failure { status: u16, message: String },
}

impl HandlerResult {
    pub fn success(payload: impl Into<Value>) -> Self {
        Self::Success(payload.into())
    }

    pub fn failure(status: u16, message: impl Into<String>) -> Self {
        Self::Failure {
            status,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Convert into the outcome a waiting caller receives.
    pub fn into_outcome(self) -> Result<Value, BridgeError> {
        match self {
            Self::Success(payload) => Ok(payload),
            Self::Failure { status, message } => Err(BridgeError::handler(status, message)),
        }
    }
}

impl From<Result<Value, BridgeError>> for HandlerResult {
    fn from(result: Result<Value, BridgeError>) -> Self {
        match result {
            Ok(payload) => Self::Success(payload),
            Err(err) => Self::Failure {
                status: err.status_code(),
                message: err.to_string(),
            },
        }
    }
}

/// Business logic run for an operation once its reply arrives.
///
/// Handlers are synchronous and run on the correlator task, so they should
/// not block.
pub trait EventHandler: Send + Sync {
    fn handle(&self, payload: &Value) -> HandlerResult;
}

impl<F> EventHandler for F
where
    F: Fn(&Value) -> HandlerResult + Send + Sync,
{
    fn handle(&self, payload: &Value) -> HandlerResult {
        self(payload)
    }
}

/// Mapping from operation name to handler.
#[derive(Default, Clone)]
pub struct DispatchTable {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Re-registering an operation replaces the previous handler.
    pub fn register<H>(&mut self, operation: impl Into<String>, handler: H) -> &mut Self
    where
        H: EventHandler + 'static,
    {
        let operation = operation.into();
        if self
            .handlers
            .insert(operation.clone(), Arc::new(handler))
            .is_some()
        {
            warn!(operation = %operation, "Replacing existing handler");
        } else {
            debug!(operation = %operation, "Registered handler");
        }
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_handler<H>(mut self, operation: impl Into<String>, handler: H) -> Self
    where
        H: EventHandler + 'static,
    {
        self.register(operation, handler);
        self
    }

    /// Look up the handler for an operation.
    pub fn resolve(&self, operation: &str) -> Result<Arc<dyn EventHandler>, BridgeError> {
        self.handlers
            .get(operation)
            .cloned()
            .ok_or_else(|| BridgeError::NotFoundOperation(operation.to_string()))
    }

    pub fn contains(&self, operation: &str) -> bool {
        self.handlers.contains_key(operation)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered operations, sorted.
    pub fn operations(&self) -> Vec<&str> {
        let mut ops: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ops.sort_unstable();
        ops
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("operations", &self.operations())
            .finish()
    }
}
