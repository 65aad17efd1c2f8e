//! Error types for the broker session
//!
//! Fatal errors end the messaging session (and the process, via the supervisor).
//! Everything else is either logged at the hook that observed it or surfaced to
//! the immediate caller of a publish helper.

use crate::publish::EncodingError;
use std::sync::Arc;
use thiserror::Error;

type SharedSource = Arc<dyn std::error::Error + Send + Sync>;

/// Main error type for session operations
///
/// Cloneable so a fatal error can be both returned to the hook's caller and
/// reported to the supervisor.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The connect request could not even be handed to the transport
    #[error("Transport could not issue connect request: {0}")]
    TransportIssue(#[source] SharedSource),

    #[error("Reconnect attempts exhausted after {attempts} failures (max {max_retries})")]
    ReconnectExhausted { attempts: u32, max_retries: u32 },

    /// A broker operation completed with a failure status
    #[error("{operation} operation failed: {message}")]
    OperationFailure { operation: String, message: String },

    #[error("Image encoding failed: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },

    #[error("Publish failed: {0}")]
    Publish(#[source] SharedSource),
}

impl SessionError {
    /// Fatal errors terminate the session; there is no degraded mode.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::TransportIssue(_) | SessionError::ReconnectExhausted { .. }
        )
    }

    /// Create a transport issue error from the transport's own error type
    pub fn transport_issue<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::TransportIssue(Arc::new(error))
    }

    /// Create a publish error from the transport's own error type
    pub fn publish_failed<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Publish(Arc::new(error))
    }

    /// Create an operation failure error
    pub fn operation_failure<O: Into<String>, M: Into<String>>(operation: O, message: M) -> Self {
        Self::OperationFailure {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an invalid topic error
    pub fn invalid_topic<T: Into<String>, R: Into<String>>(topic: T, reason: R) -> Self {
        Self::InvalidTopic {
            topic: topic.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;
