//! Error taxonomy for the detection orchestration core.
//!
//! Per-tick failures inside the stream scheduler are reported as events and
//! never stop the loop; every other failure reaches the immediate caller as
//! one of these variants.

use crate::session::SessionMode;

/// Result type alias
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Error types
#[derive(Clone, Debug, thiserror::Error)]
pub enum MonitorError {
    /// Bad input rejected before any I/O
    #[error("Validation error: {0}")]
    Validation(String),

    /// Camera permission or hardware failure, or capture outside acquisition
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Transport failure, timeout, or non-2xx response other than 401
    #[error("Network error: {0}")]
    Network(String),

    /// Credential missing, expired or rejected (HTTP 401)
    #[error("Authorization failed: {0}")]
    Auth(String),

    /// The service answered but reported a processing failure
    #[error("Detection service error: {0}")]
    Service(String),

    /// The response payload has no recognizable findings container
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// `start` called on a running scheduler
    #[error("Scheduler already running")]
    AlreadyRunning,

    /// Operation not permitted in the current session mode
    #[error("Cannot {operation} while {from:?}")]
    InvalidTransition {
        from: SessionMode,
        operation: &'static str,
    },

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),
}

impl MonitorError {
    /// Failures the streaming loop absorbs and retries at the next tick.
    ///
    /// `MalformedResponse` propagates like `Service`.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MonitorError::Network(_) | MonitorError::Service(_) | MonitorError::MalformedResponse(_)
        )
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, MonitorError::Auth(_))
    }
}
