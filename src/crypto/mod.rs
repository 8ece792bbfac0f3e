//! Cipher suite for relay sessions.
//!
//! # Architecture
//!
//! ```text
//! plaintext JSON ─► seal (ChaCha20-Poly1305, random nonce)
//!                        │
//!                        ▼
//!                  Envelope type 0 ─► base64 ─► relay `message`
//! ```
//!
//! Key exchange for pairing uses X25519 with HKDF-SHA256; topics are the
//! SHA-256 of their symmetric key.

mod error;
mod exchange;
mod key;

pub mod cipher;
pub mod envelope;

pub use cipher::{decrypt_message, encrypt_message};
pub use envelope::{Envelope, ENVELOPE_TYPE_0};
pub use error::{CryptoError, CryptoResult};
pub use exchange::{derive_symmetric_key, parse_public_key, EphemeralKeypair};
pub use key::{SymmetricKey, Topic, KEY_SIZE};
