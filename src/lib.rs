//! wcrelay Core Library
//!
//! Core functionality for a wallet that talks to a WalletConnect-style relay
//! network (IRN) through anonymizing circuits.
//!
//! # Architecture
//!
//! ```text
//! PairingHandshake ──► SecureRpcSession (pairing topic)
//!        │                    │
//!        └──────────────► SecureRpcSession (session topic)
//!                             │ encrypt / decrypt / correlate
//!                             ▼
//!                      CircuitRelayPool ──► circuit pool (external)
//!                             │
//!                             ▼
//!                      SocketRelayPool  ──► socket pool per circuit (external)
//!                             │
//!                             ▼
//!                         IrnClient
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![deny(unsafe_code)]

mod api;
pub mod config;
pub mod crypto;
pub mod events;
pub mod logging;
pub mod pairing;
pub mod pool;
pub mod relay;
pub mod rpc;

pub use api::WalletConnectCore;
pub use config::ClientConfig;

/// Coarse classification shared by every error type in the crate.
///
/// The application layer presents `Transport` and `Timeout` failures as
/// retryable and everything else as final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Circuit or connection acquisition, subscribe or publish failure.
    Transport,
    /// Malformed envelope, failed decryption, malformed JSON.
    Decode,
    /// Unsupported URI, unhandled method, rejected settlement.
    Protocol,
    /// A correlated wait exceeded its deadline or was cancelled.
    Timeout,
    /// The client was closed.
    Closed,
}

impl ErrorKind {
    /// Returns true if retrying the operation may succeed.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transport | Self::Timeout)
    }
}
