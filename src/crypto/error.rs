//! Error types for cryptographic operations.

use thiserror::Error;

use crate::ErrorKind;

/// Errors that can occur while sealing, opening, or deriving keys.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Encryption operation failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Decryption operation failed (wrong key or corrupted ciphertext).
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// The envelope carries a type tag this client does not understand.
    #[error("Unknown envelope type: {0}")]
    UnknownEnvelopeType(u8),

    /// The envelope or its ciphertext fragment is too short.
    #[error("Truncated envelope: {0}")]
    Truncated(String),

    /// Base64 decoding failed.
    #[error("Base64 decode error: {0}")]
    Base64(String),

    /// Hex encoding/decoding error.
    #[error("Hex encoding error: {0}")]
    HexError(String),

    /// Key material has the wrong shape.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Key derivation failed.
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
}

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

impl CryptoError {
    /// Classifies the error for retry decisions.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidKey(_) | Self::KeyDerivation(_) => ErrorKind::Protocol,
            _ => ErrorKind::Decode,
        }
    }
}

impl From<hex::FromHexError> for CryptoError {
    fn from(e: hex::FromHexError) -> Self {
        Self::HexError(e.to_string())
    }
}

impl From<base64::DecodeError> for CryptoError {
    fn from(e: base64::DecodeError) -> Self {
        Self::Base64(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_decryption() {
        let err = CryptoError::Decryption("invalid tag".to_string());
        assert_eq!(err.to_string(), "Decryption failed: invalid tag");
    }

    #[test]
    fn error_display_unknown_type() {
        let err = CryptoError::UnknownEnvelopeType(7);
        assert_eq!(err.to_string(), "Unknown envelope type: 7");
    }

    #[test]
    fn error_from_hex() {
        let hex_err = hex::decode("not valid hex").unwrap_err();
        let err: CryptoError = hex_err.into();
        assert!(matches!(err, CryptoError::HexError(_)));
    }

    #[test]
    fn error_from_base64() {
        use base64::Engine;
        let b64_err = base64::engine::general_purpose::STANDARD
            .decode("***")
            .unwrap_err();
        let err: CryptoError = b64_err.into();
        assert!(matches!(err, CryptoError::Base64(_)));
    }

    #[test]
    fn decode_failures_are_decode_kind() {
        assert_eq!(CryptoError::Truncated(String::new()).kind(), ErrorKind::Decode);
        assert_eq!(
            CryptoError::InvalidKey(String::new()).kind(),
            ErrorKind::Protocol
        );
    }
}
