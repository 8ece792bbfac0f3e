//! Error types for encrypted RPC sessions.

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::relay::RelayError;
use crate::ErrorKind;

/// Errors that can occur while sending or processing session messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// Publishing or subscribing failed.
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    /// An inbound message could not be decoded or decrypted.
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The decrypted payload is not a JSON-RPC request or response.
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// No response arrived within the method's ttl.
    #[error("Request {id} ({method}) timed out")]
    Timeout {
        /// Request id.
        id: u64,
        /// Request method.
        method: String,
    },

    /// The peer answered with a JSON-RPC error.
    #[error("Peer returned error {code}: {message}")]
    Remote {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },

    /// A known method arrived but no handler took it.
    #[error("Unhandled method: {0}")]
    UnhandledMethod(String),

    /// The method has no entry in the method table.
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// A response arrived with no registered waiter.
    #[error("No waiter for response {0}")]
    UnhandledResponse(u64),

    /// The caller's cancellation signal fired.
    #[error("Operation cancelled")]
    Cancelled,

    /// The session was closed.
    #[error("Session closed: {0}")]
    Closed(String),
}

/// Result type for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;

impl RpcError {
    /// Classifies the error for retry decisions.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Relay(error) => error.kind(),
            Self::Crypto(error) => error.kind(),
            Self::Malformed(_) => ErrorKind::Decode,
            Self::Timeout { .. } | Self::Cancelled => ErrorKind::Timeout,
            Self::Remote { .. }
            | Self::UnhandledMethod(_)
            | Self::UnknownMethod(_)
            | Self::UnhandledResponse(_) => ErrorKind::Protocol,
            Self::Closed(_) => ErrorKind::Closed,
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(error: serde_json::Error) -> Self {
        Self::Malformed(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_retryable() {
        let error = RpcError::Timeout {
            id: 1,
            method: "wc_sessionPing".to_string(),
        };
        assert_eq!(error.kind(), ErrorKind::Timeout);
        assert!(error.kind().is_retryable());
        assert_eq!(error.to_string(), "Request 1 (wc_sessionPing) timed out");
    }

    #[test]
    fn protocol_errors_are_not_retryable() {
        for error in [
            RpcError::UnhandledMethod("wc_sessionPing".to_string()),
            RpcError::UnhandledResponse(7),
            RpcError::Remote {
                code: 5000,
                message: "rejected".to_string(),
            },
        ] {
            assert_eq!(error.kind(), ErrorKind::Protocol);
            assert!(!error.kind().is_retryable());
        }
    }

    #[test]
    fn wrapped_errors_keep_their_kind() {
        let relay: RpcError = RelayError::Closed("logout".to_string()).into();
        assert_eq!(relay.kind(), ErrorKind::Closed);

        let crypto: RpcError = CryptoError::Decryption("bad tag".to_string()).into();
        assert_eq!(crypto.kind(), ErrorKind::Decode);
    }

    #[test]
    fn json_errors_are_malformed() {
        let error: RpcError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(error, RpcError::Malformed(_)));
    }
}
