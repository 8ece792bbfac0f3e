//! Versioned wire envelope around sealed payloads.
//!
//! ```text
//! [type: 1 byte][fragment: nonce (12) | ciphertext | tag (16)]
//! ```
//!
//! Only type 0 is defined. The whole envelope is base64-encoded before it is
//! placed in a relay payload's `message` field.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::cipher::{NONCE_SIZE, TAG_SIZE};
use super::error::{CryptoError, CryptoResult};

/// Type tag of the only defined envelope variant.
pub const ENVELOPE_TYPE_0: u8 = 0;

/// A type-0 envelope carrying one sealed fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    fragment: Vec<u8>,
}

impl Envelope {
    /// Wraps a sealed fragment.
    #[must_use]
    pub const fn new(fragment: Vec<u8>) -> Self {
        Self { fragment }
    }

    /// The sealed fragment (nonce, ciphertext, tag).
    #[must_use]
    pub fn fragment(&self) -> &[u8] {
        &self.fragment
    }

    /// Consumes the envelope, returning the fragment.
    #[must_use]
    pub fn into_fragment(self) -> Vec<u8> {
        self.fragment
    }

    /// Serializes to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.fragment.len());
        bytes.push(ENVELOPE_TYPE_0);
        bytes.extend_from_slice(&self.fragment);
        bytes
    }

    /// Parses wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Truncated`] for empty input or a fragment too
    /// short to hold a nonce and tag, and
    /// [`CryptoError::UnknownEnvelopeType`] for any tag other than 0.
    pub fn decode(bytes: &[u8]) -> CryptoResult<Self> {
        let (&kind, fragment) = bytes
            .split_first()
            .ok_or_else(|| CryptoError::Truncated("empty envelope".to_string()))?;

        if kind != ENVELOPE_TYPE_0 {
            return Err(CryptoError::UnknownEnvelopeType(kind));
        }

        if fragment.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Truncated(format!(
                "fragment of {} bytes is shorter than nonce and tag",
                fragment.len()
            )));
        }

        Ok(Self {
            fragment: fragment.to_vec(),
        })
    }

    /// Serializes to base64 for the relay `message` field.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.encode())
    }

    /// Parses a base64 relay `message` field.
    ///
    /// # Errors
    ///
    /// Returns an error if the base64 or the envelope is malformed.
    pub fn from_base64(message: &str) -> CryptoResult<Self> {
        let bytes = STANDARD.decode(message)?;
        Self::decode(&bytes)
    }
}
