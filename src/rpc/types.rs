//! JSON-RPC payloads carried inside encrypted envelopes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{RpcError, RpcResult};
use crate::relay::{payload_id, METHOD_NOT_FOUND};

const JSONRPC_VERSION: &str = "2.0";

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// A JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Request id, unique per sender.
    pub id: u64,
    /// Always `"2.0"`.
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    /// Creates a request with a fresh id.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            id: payload_id(),
            jsonrpc: jsonrpc_version(),
            method: method.into(),
            params,
        }
    }
}

/// Error object of a failed JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    /// Error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

impl RpcErrorObject {
    /// Creates an error object.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The `-32601` error sent when no handler takes a request.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }
}

/// A JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Id of the answered request.
    pub id: u64,
    /// Always `"2.0"`.
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// Result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    /// A success response.
    #[must_use]
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            jsonrpc: jsonrpc_version(),
            result: Some(result),
            error: None,
        }
    }

    /// An error response.
    #[must_use]
    pub fn failure(id: u64, error: RpcErrorObject) -> Self {
        Self {
            id,
            jsonrpc: jsonrpc_version(),
            result: None,
            error: Some(error),
        }
    }

    /// Converts the response into the caller-facing result.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Remote`] if the peer answered with an error.
    pub fn into_result(self) -> RpcResult<Value> {
        match self.error {
            Some(error) => Err(RpcError::Remote {
                code: error.code,
                message: error.message,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// A decrypted inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcPayload {
    /// Carries a `method` field.
    Request(RpcRequest),
    /// Carries `result` or `error`.
    Response(RpcResponse),
}

impl RpcPayload {
    /// Parses decrypted JSON, branching on the presence of `method`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Malformed`] if the JSON does not describe a
    /// request or a response.
    pub fn parse(plaintext: &[u8]) -> RpcResult<Self> {
        let value: Value = serde_json::from_slice(plaintext)?;
        if value.get("method").is_some() {
            return Ok(Self::Request(serde_json::from_value(value)?));
        }
        if value.get("result").is_none() && value.get("error").is_none() {
            return Err(RpcError::Malformed(
                "payload has neither method, result, nor error".to_string(),
            ));
        }
        Ok(Self::Response(serde_json::from_value(value)?))
    }
}

/// Receipt of a published request whose response is awaited separately.
///
/// Serializable so the wait half can resume after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    /// Request id.
    pub id: u64,
    /// Request method.
    pub method: String,
    /// Absolute expiry in unix milliseconds.
    pub expires_at: i64,
}

impl PendingRequest {
    pub(crate) fn new(id: u64, method: &str, ttl: Duration) -> Self {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        Self {
            id,
            method: method.to_string(),
            expires_at: chrono::Utc::now().timestamp_millis().saturating_add(ttl_ms),
        }
    }

    /// Time left before expiry; zero once expired.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        let left = self.expires_at - chrono::Utc::now().timestamp_millis();
        u64::try_from(left).map_or(Duration::ZERO, Duration::from_millis)
    }

    /// Returns true once the expiry has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}
