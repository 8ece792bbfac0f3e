//! Types for relay communication.
//!
//! This module defines the IRN wire records, the events relay handles
//! expose, and the JSON-RPC framing shared with the RPC layer.

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::{RelayError, RelayResult};
use crate::crypto::Topic;
use crate::events::{ClaimRegistry, EventRegistry, Listener};

/// JSON-RPC method used to subscribe to a topic.
pub const IRN_SUBSCRIBE: &str = "irn_subscribe";

/// JSON-RPC method used to publish a message.
pub const IRN_PUBLISH: &str = "irn_publish";

/// JSON-RPC method the relay uses to deliver subscribed messages.
pub const IRN_SUBSCRIPTION: &str = "irn_subscription";

/// JSON-RPC "method not found" error code.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC "invalid params" error code.
pub const INVALID_PARAMS: i64 = -32602;

/// Generates a JSON-RPC id: milliseconds since the epoch scaled by 1000
/// plus three random digits.
#[must_use]
pub fn payload_id() -> u64 {
    let millis = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();
    millis * 1000 + rand::thread_rng().gen_range(0..1000)
}

/// Payload of an `irn_publish` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayPublishPayload {
    /// Destination topic.
    pub topic: Topic,
    /// Base64 of an envelope.
    pub message: String,
    /// Whether the relay should wake a suspended peer.
    pub prompt: bool,
    /// Message tag from the method table.
    pub tag: u32,
    /// Relay retention in seconds.
    pub ttl: u64,
}

/// A message delivered by the relay for a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayMessage {
    /// The topic the message was published on.
    pub topic: Topic,
    /// Base64 of an envelope.
    pub message: String,
    /// Relay timestamp (milliseconds), when provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<i64>,
    /// Message tag, when provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<u32>,
}

/// Parameters of an inbound `irn_subscription` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionParams {
    /// Subscription id returned by `irn_subscribe`.
    pub id: String,
    /// The delivered message.
    pub data: RelayMessage,
}

/// Lifecycle notifications of a relay handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// The handle (or its underlying connection) closed.
    Close {
        /// Close reason, when known.
        reason: Option<String>,
    },
    /// The handle hit a transport error.
    Error {
        /// Error description.
        message: String,
    },
}

/// Listener that may claim an inbound relay message.
///
/// Returning `Some(ack)` claims the message; the ack is sent back to the
/// relay as the `irn_subscription` result.
pub type RequestListener = dyn Fn(&RelayMessage) -> Option<bool> + Send + Sync;

/// Listener observing relay lifecycle events.
pub type EventListener = dyn Fn(&RelayEvent) + Send + Sync;

/// Event surface shared by every relay handle.
#[derive(Debug, Default)]
pub struct RelayEvents {
    requests: ClaimRegistry<RelayMessage, bool>,
    lifecycle: EventRegistry<RelayEvent>,
}

impl RelayEvents {
    /// Creates an empty event surface.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request listener.
    #[must_use = "dropping the guard deregisters the listener"]
    pub fn on_request(&self, listener: Arc<RequestListener>) -> Listener {
        self.requests.register(listener)
    }

    /// Registers a lifecycle listener.
    #[must_use = "dropping the guard deregisters the listener"]
    pub fn on_event(&self, listener: Arc<EventListener>) -> Listener {
        self.lifecycle.register(listener)
    }

    /// Offers an inbound message to the request listeners.
    #[must_use]
    pub fn claim(&self, message: &RelayMessage) -> Option<bool> {
        self.requests.claim(message)
    }

    /// Emits a lifecycle event.
    pub fn emit(&self, event: &RelayEvent) {
        self.lifecycle.emit(event);
    }
}

/// A decoded JSON-RPC frame received from the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A request from the relay.
    Request {
        /// Request id.
        id: u64,
        /// Method name.
        method: String,
        /// Raw parameters.
        params: Value,
    },
    /// A response to one of our calls.
    Response {
        /// Id of the call being answered.
        id: u64,
        /// The result or the relay's error.
        result: RelayResult<Value>,
    },
}

impl Frame {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Malformed`] if the frame is not JSON-RPC.
    pub fn parse(text: &str) -> RelayResult<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| RelayError::Malformed(e.to_string()))?;

        let id = value
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| RelayError::Malformed("missing numeric id".to_string()))?;

        if let Some(method) = value.get("method").and_then(Value::as_str) {
            return Ok(Self::Request {
                id,
                method: method.to_string(),
                params: value.get("params").cloned().unwrap_or(Value::Null),
            });
        }

        if let Some(error) = value.get("error") {
            return Ok(Self::Response {
                id,
                result: Err(RelayError::Remote {
                    code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                    message: error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                }),
            });
        }

        match value.get("result") {
            Some(result) => Ok(Self::Response {
                id,
                result: Ok(result.clone()),
            }),
            None => Err(RelayError::Malformed(
                "frame has neither method, result, nor error".to_string(),
            )),
        }
    }

    /// Serializes a request frame.
    #[must_use]
    pub fn request(id: u64, method: &str, params: &Value) -> String {
        json!({ "id": id, "jsonrpc": "2.0", "method": method, "params": params }).to_string()
    }

    /// Serializes a success response frame.
    #[must_use]
    pub fn result(id: u64, result: &Value) -> String {
        json!({ "id": id, "jsonrpc": "2.0", "result": result }).to_string()
    }

    /// Serializes an error response frame.
    #[must_use]
    pub fn error(id: u64, code: i64, message: &str) -> String {
        json!({
            "id": id,
            "jsonrpc": "2.0",
            "error": { "code": code, "message": message },
        })
        .to_string()
    }
}
