//! Bridge error kinds and their HTTP-equivalent status codes.

use crate::domain::correlation::RequestId;
use serde_json::json;

/// HTTP-equivalent status codes surfaced to callers.
pub mod status {
    pub const BAD_REQUEST: u16 = 400;
    pub const NOT_FOUND: u16 = 404;
    pub const GONE: u16 = 410;
    pub const INTERNAL_ERROR: u16 = 500;
    pub const SERVICE_UNAVAILABLE: u16 = 503;
    pub const GATEWAY_TIMEOUT: u16 = 504;
}

/// Every way a bridged request, or a message on its way back, can fail.
///
/// `DecodeFailure` and `UnknownOrExpiredRequest` never reach a caller: they
/// are absorbed by the correlator. All other kinds resolve a caller's
/// pending request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// Reply body could not be decoded.
    #[error("malformed reply: {0}")]
    DecodeFailure(String),

    /// Reply for an ID that is not (or no longer) pending.
    #[error("unknown or expired request {0}")]
    UnknownOrExpiredRequest(RequestId),

    /// No handler registered for the operation.
    #[error("no handler registered for operation '{0}'")]
    NotFoundOperation(String),

    /// Handler-reported failure, passed through verbatim.
    #[error("{message}")]
    HandlerError { status: u16, message: String },

    /// Request envelope could not be submitted to the queue.
    #[error("failed to publish request: {0}")]
    PublishFailed(String),

    /// Startup did not complete.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    /// Request was still pending when the bridge shut down.
    #[error("service is shutting down")]
    ServiceShuttingDown,

    /// No reply arrived before the request's deadline.
    #[error("request timed out after {0} ms")]
    RequestTimedOut(u64),

    /// Bridge is not running (not started yet, or already closed).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Completion side went away without resolving the request.
    #[error("response channel closed")]
    ResponseChannelClosed,
}

impl BridgeError {
    /// Handler failure with a chosen status.
    pub fn handler(status: u16, message: impl Into<String>) -> Self {
        Self::HandlerError {
            status,
            message: message.into(),
        }
    }

    /// HTTP-equivalent status for the original caller.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::DecodeFailure(_) => status::BAD_REQUEST,
            Self::UnknownOrExpiredRequest(_) => status::GONE,
            Self::NotFoundOperation(_) => status::NOT_FOUND,
            Self::HandlerError { status, .. } => *status,
            Self::PublishFailed(_)
            | Self::InitializationFailed(_)
            | Self::ResponseChannelClosed => status::INTERNAL_ERROR,
            Self::ServiceShuttingDown | Self::ServiceUnavailable(_) => status::SERVICE_UNAVAILABLE,
            Self::RequestTimedOut(_) => status::GATEWAY_TIMEOUT,
        }
    }

    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DecodeFailure(_) => "decode_failure",
            Self::UnknownOrExpiredRequest(_) => "unknown_or_expired_request",
            Self::NotFoundOperation(_) => "not_found_operation",
            Self::HandlerError { .. } => "handler_error",
            Self::PublishFailed(_) => "publish_failed",
            Self::InitializationFailed(_) => "initialization_failed",
            Self::ServiceShuttingDown => "service_shutting_down",
            Self::RequestTimedOut(_) => "request_timed_out",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::ResponseChannelClosed => "response_channel_closed",
        }
    }

    /// JSON body for the transport's error response.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "error": self.kind(),
            "status": self.status_code(),
            "message": self.to_string(),
        })
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_names_operation() {
        let err = BridgeError::NotFoundOperation("/unknown".into());
        assert_eq!(err.status_code(), status::NOT_FOUND);
        assert!(err.to_string().contains("/unknown"));
    }

    #[test]
    fn test_handler_error_verbatim() {
        let err = BridgeError::handler(422, "amount must be positive");
        assert_eq!(err.status_code(), 422);
        assert_eq!(err.to_string(), "amount must be positive");
    }

    #[test]
    fn test_server_side_statuses() {
        assert_eq!(BridgeError::PublishFailed("x".into()).status_code(), 500);
        assert_eq!(BridgeError::ServiceShuttingDown.status_code(), 503);
        assert_eq!(BridgeError::RequestTimedOut(10).status_code(), 504);
    }

    #[test]
    fn test_to_json() {
        let body = BridgeError::ServiceShuttingDown.to_json();
        assert_eq!(body["error"], "service_shutting_down");
        assert_eq!(body["status"], 503);
        assert_eq!(body["message"], "service is shutting down");
    }
}
