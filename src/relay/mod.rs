//! Relay connectivity over anonymizing circuits.
//!
//! All relay traffic goes through circuits owned by the embedding
//! application. No connection is ever made outside a circuit.
//!
//! # Architecture
//!
//! ```text
//! SecureRpcSession
//!     │  RelayHandle
//!     ▼
//! CircuitRelayPool ── takes a random circuit ──► circuit pool (external)
//!     │
//!     ▼
//! SocketRelayPool ─── takes a random socket ───► circuit's socket pool
//!     │
//!     ▼
//! IrnClient (JSON-RPC: irn_subscribe / irn_publish / irn_subscription)
//! ```
//!
//! Each level is a single-slot [`ResourcePool`](crate::pool::ResourcePool):
//! when the resource below fails, the slot is rebuilt on a fresh one and
//! every subscribed topic is replayed exactly once.
//!
//! # Circuit Isolation
//!
//! A circuit's sockets should be read by one relay at a time. Sessions that
//! belong together share one [`CircuitRelayPool`] instead of building their
//! own over the same circuits.

mod circuit_pool;
mod client;
mod error;
mod handle;
mod socket_pool;
mod transport;
mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use circuit_pool::CircuitRelayPool;
pub use client::{IrnClient, DEFAULT_CALL_TIMEOUT};
pub use error::{RelayError, RelayResult};
pub use handle::{RelayHandle, RESUBSCRIBE_PING_FACTOR, RETRY_INITIAL_DELAY};
pub use socket_pool::SocketRelayPool;
pub use transport::{Circuit, RelaySocket};
pub use types::{
    payload_id, EventListener, RelayEvent, RelayEvents, RelayMessage, RelayPublishPayload,
    RequestListener, INVALID_PARAMS, METHOD_NOT_FOUND,
};
