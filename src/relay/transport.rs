//! Collaborator seams for the relay layer.
//!
//! Circuits and the socket connections tunnelled through them are owned by
//! the embedding application (a Tor client, a test harness, ...). The relay
//! pools only borrow them through these traits.

use async_trait::async_trait;

use super::error::RelayResult;
use crate::pool::ResourcePool;

/// A bidirectional text-frame connection to a relay.
///
/// The connection belongs to the pool it was taken from; clients reading it
/// never close it.
#[async_trait]
pub trait RelaySocket: Send + Sync + 'static {
    /// Sends one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is broken.
    async fn send(&self, frame: String) -> RelayResult<()>;

    /// Receives the next text frame, or `None` once the connection closed.
    ///
    /// Only one task calls this at a time.
    async fn recv(&self) -> Option<RelayResult<String>>;
}

/// An anonymizing circuit exposing a pool of relay connections.
pub trait Circuit: Send + Sync + 'static {
    /// Connection type carried by this circuit.
    type Socket: RelaySocket;

    /// Returns a handle to the circuit's connection pool.
    fn sockets(&self) -> ResourcePool<Self::Socket>;
}
