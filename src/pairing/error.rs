//! Error types for the pairing handshake.

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::relay::RelayError;
use crate::rpc::RpcError;
use crate::ErrorKind;

/// Errors that abort a pairing handshake.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PairingError {
    /// The connection URI is not of the form `wc:<topic>@<version>?<query>`.
    #[error("Invalid pairing URI: {0}")]
    InvalidUri(String),

    /// The URI names a protocol version other than 2.
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    /// The URI or proposal names a relay protocol other than `irn`.
    #[error("Unsupported relay protocol: {0}")]
    UnsupportedRelayProtocol(String),

    /// The URI's symmetric key is not 32 bytes of hex.
    #[error("Invalid pairing key: {0}")]
    InvalidKey(String),

    /// The proposal could not be used.
    #[error("Invalid session proposal: {0}")]
    InvalidProposal(String),

    /// No proposal arrived in time.
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// The dapp did not acknowledge the settlement with `true`.
    #[error("Session settlement rejected: {0}")]
    SettleRejected(String),

    /// The caller's cancellation signal fired.
    #[error("Pairing cancelled")]
    Cancelled,

    /// Session RPC failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Key exchange failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Relay call failed.
    #[error(transparent)]
    Relay(#[from] RelayError),
}

/// Result type for pairing operations.
pub type PairingResult<T> = Result<T, PairingError>;

impl PairingError {
    /// Classifies the error for retry decisions.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUri(_)
            | Self::UnsupportedVersion(_)
            | Self::UnsupportedRelayProtocol(_)
            | Self::InvalidKey(_)
            | Self::InvalidProposal(_)
            | Self::SettleRejected(_) => ErrorKind::Protocol,
            Self::Timeout(_) | Self::Cancelled => ErrorKind::Timeout,
            Self::Rpc(error) => error.kind(),
            Self::Crypto(error) => error.kind(),
            Self::Relay(error) => error.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_errors_are_protocol_errors() {
        assert_eq!(
            PairingError::UnsupportedVersion("1".to_string()).kind(),
            ErrorKind::Protocol
        );
        assert_eq!(
            PairingError::SettleRejected("false".to_string()).kind(),
            ErrorKind::Protocol
        );
    }

    #[test]
    fn wrapped_errors_are_transparent() {
        let error: PairingError = RpcError::Closed("logout".to_string()).into();
        assert_eq!(error.to_string(), "Session closed: logout");
        assert_eq!(error.kind(), ErrorKind::Closed);

        let error: PairingError = RelayError::Connection("no circuit".to_string()).into();
        assert!(error.kind().is_retryable());
    }

    #[test]
    fn timeout_is_retryable() {
        assert!(PairingError::Timeout("wc_sessionPropose".to_string())
            .kind()
            .is_retryable());
    }
}
