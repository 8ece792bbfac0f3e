//! ChaCha20-Poly1305 sealing of envelope fragments.
//!
//! Every call to [`seal`] draws a fresh random nonce, so the same plaintext
//! never produces the same fragment twice under one key.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;

use super::envelope::Envelope;
use super::error::{CryptoError, CryptoResult};
use super::key::SymmetricKey;

/// Size of the nonce prefix in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

fn cipher_for(key: &SymmetricKey) -> ChaCha20Poly1305 {
    ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()))
}

/// Seals `plaintext` into a fragment `nonce | ciphertext | tag`.
///
/// # Errors
///
/// Returns an error if encryption fails.
pub fn seal(key: &SymmetricKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let sealed = cipher_for(key)
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut fragment = Vec::with_capacity(NONCE_SIZE + sealed.len());
    fragment.extend_from_slice(&nonce);
    fragment.extend_from_slice(&sealed);
    Ok(fragment)
}

/// Opens a fragment produced by [`seal`].
///
/// # Errors
///
/// Returns [`CryptoError::Truncated`] if the fragment cannot hold a nonce and
/// tag, and [`CryptoError::Decryption`] for a wrong key or tampered bytes.
pub fn open(key: &SymmetricKey, fragment: &[u8]) -> CryptoResult<Vec<u8>> {
    if fragment.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::Truncated(format!(
            "fragment of {} bytes",
            fragment.len()
        )));
    }

    let (nonce, sealed) = fragment.split_at(NONCE_SIZE);
    cipher_for(key)
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| CryptoError::Decryption("authentication failed".to_string()))
}

/// Seals `plaintext` and wraps it in a base64 type-0 envelope.
///
/// # Errors
///
/// Returns an error if encryption fails.
pub fn encrypt_message(key: &SymmetricKey, plaintext: &[u8]) -> CryptoResult<String> {
    Ok(Envelope::new(seal(key, plaintext)?).to_base64())
}

/// Decodes a base64 envelope and opens its fragment.
///
/// # Errors
///
/// Returns a decode error for malformed base64 or envelopes, and a
/// decryption error for a wrong key or corrupted ciphertext.
pub fn decrypt_message(key: &SymmetricKey, message: &str) -> CryptoResult<Vec<u8>> {
    let envelope = Envelope::from_base64(message)?;
    open(key, envelope.fragment())
}
