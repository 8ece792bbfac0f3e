//! Symmetric keys and the relay topics derived from them.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::{CryptoError, CryptoResult};

/// Size of a symmetric key in bytes.
pub const KEY_SIZE: usize = 32;

/// Opaque relay channel identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Wraps a topic string.
    pub fn new(topic: impl Into<String>) -> Self {
        Self(topic.into())
    }

    /// Returns the topic as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Topic {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// 32-byte secret bound to exactly one [`Topic`].
///
/// The bytes are zeroized on drop, compared in constant time, and never
/// printed by `Debug`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Wraps raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Builds a key from a byte slice that must be exactly 32 bytes long.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] on any other length.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let array: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!("expected {KEY_SIZE} bytes, got {}", bytes.len()))
        })?;
        Ok(Self(array))
    }

    /// Parses a 64-character hex key.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not hex or not 32 bytes.
    pub fn from_hex(hex_key: &str) -> CryptoResult<Self> {
        let bytes = zeroize::Zeroizing::new(hex::decode(hex_key)?);
        Self::from_slice(&bytes)
    }

    /// Generates a random key.
    #[must_use]
    pub fn generate() -> Self {
        use rand::RngCore;

        let mut bytes = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Hex encoding of the key, for the pairing URI only.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The relay topic bound to this key: hex SHA-256 of the key bytes.
    #[must_use]
    pub fn topic(&self) -> Topic {
        Topic(hex::encode(Sha256::digest(self.0)))
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for SymmetricKey {}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_hex_roundtrip() {
        let hex_key = "ab".repeat(32);
        let key = SymmetricKey::from_hex(&hex_key).unwrap();
        assert_eq!(key.to_hex(), hex_key);
        assert_eq!(key.as_bytes(), &[0xab; 32]);
    }

    #[test]
    fn from_hex_rejects_wrong_length() {
        let result = SymmetricKey::from_hex("abcd");
        assert!(matches!(result, Err(CryptoError::InvalidKey(_))));
    }

    #[test]
    fn from_hex_rejects_non_hex() {
        let result = SymmetricKey::from_hex(&"zz".repeat(32));
        assert!(matches!(result, Err(CryptoError::HexError(_))));
    }

    #[test]
    fn topic_is_sha256_of_key() {
        let key = SymmetricKey::from_bytes([0u8; 32]);
        // SHA-256 of 32 zero bytes.
        assert_eq!(
            key.topic().as_str(),
            "66687aadf862bd776c8fc18b8e9f8e20089714856ee233b3902a591d0d5f2925"
        );
    }

    #[test]
    fn debug_never_prints_key_material() {
        let key = SymmetricKey::from_bytes([0x42; 32]);
        let debug_str = format!("{key:?}");
        assert!(!debug_str.contains("42"));
        assert!(debug_str.contains("REDACTED"));
    }

    #[test]
    fn generated_keys_differ() {
        assert_ne!(SymmetricKey::generate(), SymmetricKey::generate());
    }

    #[test]
    fn topic_serializes_as_plain_string() {
        let topic = Topic::new("deadbeef");
        assert_eq!(serde_json::to_string(&topic).unwrap(), "\"deadbeef\"");
    }
}
