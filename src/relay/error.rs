//! Error types for relay operations.
//!
//! This module defines error types that can occur during relay
//! communication, subscription, and publishing.

use thiserror::Error;

use crate::pool::PoolError;
use crate::ErrorKind;

/// Errors that can occur during relay operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Acquiring a circuit or connection failed.
    #[error("Failed to connect to relay: {0}")]
    Connection(String),

    /// Message publishing failed.
    #[error("Failed to publish message: {0}")]
    Publish(String),

    /// Subscription failed.
    #[error("Subscription failed: {0}")]
    Subscription(String),

    /// Timeout waiting for operation.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The caller's cancellation signal fired.
    #[error("Operation cancelled")]
    Cancelled,

    /// The client was closed.
    #[error("Relay client closed: {0}")]
    Closed(String),

    /// The relay sent a frame that is not valid JSON-RPC.
    #[error("Malformed relay frame: {0}")]
    Malformed(String),

    /// The relay answered a call with a JSON-RPC error.
    #[error("Relay returned error {code}: {message}")]
    Remote {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

impl RelayError {
    /// Classifies the error for retry decisions.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_)
            | Self::Publish(_)
            | Self::Subscription(_)
            | Self::Remote { .. } => ErrorKind::Transport,
            Self::Timeout(_) | Self::Cancelled => ErrorKind::Timeout,
            Self::Closed(_) => ErrorKind::Closed,
            Self::Malformed(_) => ErrorKind::Decode,
        }
    }
}

impl From<PoolError> for RelayError {
    fn from(error: PoolError) -> Self {
        match error {
            PoolError::Closed(reason) => Self::Closed(reason),
            PoolError::Cancelled => Self::Cancelled,
            other => Self::Connection(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_display() {
        let error = RelayError::Connection("circuit refused".to_string());
        assert_eq!(
            error.to_string(),
            "Failed to connect to relay: circuit refused"
        );
    }

    #[test]
    fn publish_error_display() {
        let error = RelayError::Publish("rate limited".to_string());
        assert_eq!(error.to_string(), "Failed to publish message: rate limited");
    }

    #[test]
    fn subscription_error_display() {
        let error = RelayError::Subscription("topic rejected".to_string());
        assert_eq!(error.to_string(), "Subscription failed: topic rejected");
    }

    #[test]
    fn timeout_error_display() {
        let error = RelayError::Timeout("resubscribe".to_string());
        assert_eq!(error.to_string(), "Operation timed out: resubscribe");
    }

    #[test]
    fn remote_error_display() {
        let error = RelayError::Remote {
            code: -32600,
            message: "invalid request".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Relay returned error -32600: invalid request"
        );
    }

    #[test]
    fn pool_closed_maps_to_closed() {
        let error: RelayError = PoolError::Closed("logout".to_string()).into();
        assert_eq!(error, RelayError::Closed("logout".to_string()));
        assert_eq!(error.kind(), ErrorKind::Closed);
    }

    #[test]
    fn pool_construction_maps_to_connection() {
        let error: RelayError = PoolError::construction(0, "no circuits").into();
        assert!(matches!(error, RelayError::Connection(_)));
        assert!(error.kind().is_retryable());
    }

    #[test]
    fn error_debug_format() {
        let error = RelayError::Cancelled;
        let debug_str = format!("{error:?}");
        assert!(debug_str.contains("Cancelled"));
    }
}
