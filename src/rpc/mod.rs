//! Encrypted JSON-RPC over relay topics.
//!
//! # Architecture
//!
//! ```text
//! relay message ─► decrypt ─► parse ─┬─ request ─► AckSet ─► handler ─► encrypted response
//!                                    └─ response ─► waiter (request / wait_pending)
//! ```
//!
//! Every publish takes its ttl, tag and prompt flag from the static method
//! table in [`methods`].

mod acks;
mod error;
mod session;
mod types;

pub mod methods;

pub use acks::AckSet;
pub use error::{RpcError, RpcResult};
pub use methods::{Direction, MethodOptions};
pub use session::{
    HandlerFuture, Inbound, RequestHandler, SecureRpcSession, SessionEvent, SessionOptions,
};
pub use types::{PendingRequest, RpcErrorObject, RpcPayload, RpcRequest, RpcResponse};
