//! X25519 key exchange and session key derivation.
//!
//! Each pairing uses a fresh ephemeral keypair. The shared secret is run
//! through HKDF-SHA256 with empty salt and info to produce the session's
//! [`SymmetricKey`]; the session topic is the SHA-256 of that key.

use std::fmt;

use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use super::error::{CryptoError, CryptoResult};
use super::key::{SymmetricKey, KEY_SIZE};
use crate::logging::Redacted;

/// An ephemeral X25519 keypair for a single pairing.
///
/// The secret is zeroized on drop.
///
/// # Example
///
/// ```
/// use wcrelay_core::crypto::EphemeralKeypair;
///
/// let keypair = EphemeralKeypair::generate();
/// assert_eq!(keypair.public_key_hex().len(), 64); // 32 bytes hex-encoded
/// ```
#[derive(ZeroizeOnDrop)]
pub struct EphemeralKeypair {
    secret: StaticSecret,

    #[zeroize(skip)]
    public: PublicKey,
}

impl fmt::Debug for EphemeralKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeypair")
            .field("public", &self.public_key_hex())
            .field("secret", &Redacted(()))
            .finish()
    }
}

impl EphemeralKeypair {
    /// Generates a new random keypair from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Rebuilds a keypair from raw secret bytes.
    #[cfg(any(test, feature = "test-utils"))]
    #[must_use]
    pub fn from_bytes(secret_bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(secret_bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The public key bytes.
    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// The public key as a 64-character hex string.
    #[must_use]
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public.as_bytes())
    }

    /// Computes the X25519 shared secret with a peer's public key.
    #[must_use]
    pub fn shared_secret(&self, peer_public: &[u8; 32]) -> Zeroizing<[u8; 32]> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer_public));
        Zeroizing::new(shared.to_bytes())
    }

    /// Derives the session key shared with `peer_public`.
    ///
    /// # Errors
    ///
    /// Returns an error if key derivation fails.
    pub fn derive_session_key(&self, peer_public: &[u8; 32]) -> CryptoResult<SymmetricKey> {
        let shared = self.shared_secret(peer_public);
        derive_symmetric_key(&shared[..])
    }
}

/// HKDF-SHA256 expansion of `shared_secret` with empty salt and info.
///
/// # Errors
///
/// Returns an error if the expansion fails.
pub fn derive_symmetric_key(shared_secret: &[u8]) -> CryptoResult<SymmetricKey> {
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(&[], &mut okm[..])
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(SymmetricKey::from_bytes(*okm))
}

/// Parses a peer's hex-encoded X25519 public key.
///
/// # Errors
///
/// Returns an error if the input is not 32 bytes of hex.
pub fn parse_public_key(hex_key: &str) -> CryptoResult<[u8; 32]> {
    let bytes = hex::decode(hex_key)?;
    bytes.as_slice().try_into().map_err(|_| {
        CryptoError::InvalidKey(format!("public key must be 32 bytes, got {}", bytes.len()))
    })
}
