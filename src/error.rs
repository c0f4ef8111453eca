//! Error types for MQTT session management
//!
//! Session failures never surface as `Err` from `open`, `close` or `send`.
//! They are delivered to registered callbacks and the event stream as
//! [`SessionError`] values, while the session absorbs them into its
//! reconnect state machine.

use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Failures observed by a session
#[derive(Debug, Error)]
pub enum SessionError {
    /// A connection attempt failed; the reconnect policy takes over
    #[error("Connect attempt failed: {0}")]
    TransportConnect(#[source] TransportError),

    /// An established session dropped without being asked to
    #[error("Session dropped unexpectedly: {reason}")]
    TransportDisconnect { reason: String },

    /// Reconnect retries exceeded the configured maximum
    #[error("Reconnect budget exhausted after {max_retries} retries")]
    ReconnectBudgetExhausted { max_retries: u32 },

    /// A send was issued while not connected and buffering was disabled
    #[error("Session unavailable, message to {topic} dropped")]
    SendUnavailable { topic: String },

    /// Outbound buffer is at capacity
    #[error("Outbound buffer full ({capacity} messages), message to {topic} dropped")]
    BufferFull { topic: String, capacity: usize },

    /// Mid-session transport failure (publish, subscribe, close)
    #[error("Transport error: {0}")]
    Transport(#[source] TransportError),

    /// Waiting on the session took longer than allowed
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

impl SessionError {
    /// Whether this error ends automatic reconnection
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionError::ReconnectBudgetExhausted { .. })
    }

    /// Whether the session recovers from this on its own
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SessionError::TransportConnect(_) | SessionError::TransportDisconnect { .. }
        )
    }
}

/// Result type for operations that can fail outside the session state machine
pub type SessionResult<T> = Result<T, SessionError>;
