//! Client configuration.
//!
//! Every field has a default, so a JSON document only needs to name what it
//! overrides:
//!
//! ```
//! use wcrelay_core::ClientConfig;
//!
//! let config = ClientConfig::from_json(r#"{"ping_interval_secs": 5}"#).unwrap();
//! assert_eq!(config.ping_interval().as_secs(), 5);
//! assert_eq!(config.ack_window, 10_000);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pairing::{Metadata, Namespace, Namespaces};

/// Errors from loading a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The document is not valid JSON for this schema.
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// A value is out of range.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// A chain this wallet serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

impl ChainConfig {
    /// CAIP-2 identifier, `eip155:<chain_id>`.
    #[must_use]
    pub fn caip2(&self) -> String {
        format!("eip155:{}", self.chain_id)
    }

    /// CAIP-10 account identifier for `address` on this chain.
    #[must_use]
    pub fn account(&self, address: &str) -> String {
        format!("eip155:{}:{address}", self.chain_id)
    }
}

/// Configuration of a [`WalletConnectCore`](crate::WalletConnectCore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Relay ping interval in seconds. Resubscribe calls are bounded by a
    /// multiple of it.
    pub ping_interval_secs: u64,
    /// Number of inbound request ids remembered per session.
    pub ack_window: usize,
    /// Seconds an inbound request id stays in the dedup window.
    pub ack_ttl_secs: u64,
    /// Lifetime of a settled session in seconds.
    pub session_expiry_secs: u64,
    /// This wallet's metadata.
    pub metadata: Metadata,
    /// Chains offered in settled sessions.
    pub chains: Vec<ChainConfig>,
    /// RPC methods offered in settled sessions.
    pub methods: Vec<String>,
    /// Events offered in settled sessions.
    pub events: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 10,
            ack_window: 10_000,
            ack_ttl_secs: 86_400,
            session_expiry_secs: 7 * 86_400,
            metadata: Metadata::new("wcrelay", "https://walletconnect.com")
                .with_description("WalletConnect wallet over anonymizing circuits"),
            chains: vec![ChainConfig {
                chain_id: 1,
                name: "Ethereum".to_string(),
            }],
            methods: vec![
                "eth_sendTransaction".to_string(),
                "personal_sign".to_string(),
                "eth_signTypedData_v4".to_string(),
            ],
            events: vec!["chainChanged".to_string(), "accountsChanged".to_string()],
        }
    }
}

impl ClientConfig {
    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or a value is out of range.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_interval_secs == 0 {
            return Err(ConfigError::Invalid("ping_interval_secs must be > 0".into()));
        }
        if self.ack_window == 0 {
            return Err(ConfigError::Invalid("ack_window must be > 0".into()));
        }
        if self.ack_ttl_secs == 0 {
            return Err(ConfigError::Invalid("ack_ttl_secs must be > 0".into()));
        }
        if self.chains.is_empty() {
            return Err(ConfigError::Invalid("at least one chain is required".into()));
        }
        Ok(())
    }

    /// Relay ping interval.
    #[must_use]
    pub const fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Dedup window lifetime of an inbound request id.
    #[must_use]
    pub const fn ack_ttl(&self) -> Duration {
        Duration::from_secs(self.ack_ttl_secs)
    }

    /// Lifetime of a settled session.
    #[must_use]
    pub const fn session_expiry(&self) -> Duration {
        Duration::from_secs(self.session_expiry_secs)
    }

    /// Adds a chain.
    #[must_use]
    pub fn with_chain(mut self, chain_id: u64, name: impl Into<String>) -> Self {
        self.chains.push(ChainConfig {
            chain_id,
            name: name.into(),
        });
        self
    }

    /// Adds an RPC method.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.methods.push(method.into());
        self
    }

    /// Adds an event name.
    #[must_use]
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.events.push(event.into());
        self
    }

    /// Replaces the wallet metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Builds the `eip155` namespace granted to `address`.
    #[must_use]
    pub fn namespaces(&self, address: &str) -> Namespaces {
        let namespace = Namespace {
            chains: self.chains.iter().map(ChainConfig::caip2).collect(),
            accounts: self.chains.iter().map(|c| c.account(address)).collect(),
            methods: self.methods.clone(),
            events: self.events.clone(),
        };
        Namespaces::from([("eip155".to_string(), namespace)])
    }
}
