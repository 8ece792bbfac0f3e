//! Connection URI, `wc:<topic>@2?relay-protocol=irn&symKey=<hex>`.

use std::fmt;
use std::str::FromStr;

use super::error::{PairingError, PairingResult};
use super::types::RELAY_PROTOCOL;
use crate::crypto::{SymmetricKey, Topic};

/// The only supported protocol version.
pub const PROTOCOL_VERSION: &str = "2";

const SCHEME: &str = "wc:";

/// A parsed pairing URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingUri {
    /// Pairing topic.
    pub topic: Topic,
    /// Pairing key.
    pub sym_key: SymmetricKey,
    /// Optional `expiryTimestamp` in unix seconds.
    pub expiry_timestamp: Option<i64>,
}

impl PairingUri {
    /// Creates a URI for `topic` and `sym_key`.
    #[must_use]
    pub fn new(topic: Topic, sym_key: SymmetricKey) -> Self {
        Self {
            topic,
            sym_key,
            expiry_timestamp: None,
        }
    }

    /// Sets the expiry timestamp.
    #[must_use]
    pub fn with_expiry(mut self, expiry_timestamp: i64) -> Self {
        self.expiry_timestamp = Some(expiry_timestamp);
        self
    }

    /// Parses a URI string.
    ///
    /// # Errors
    ///
    /// Fails on a malformed URI, a version other than 2, a relay protocol
    /// other than `irn`, or a key that is not 32 bytes of hex.
    pub fn parse(uri: &str) -> PairingResult<Self> {
        uri.parse()
    }

    /// Returns true if the URI carries an expiry at or before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expiry_timestamp.is_some_and(|expiry| expiry <= now)
    }
}

impl FromStr for PairingUri {
    type Err = PairingError;

    fn from_str(uri: &str) -> PairingResult<Self> {
        let rest = uri
            .strip_prefix(SCHEME)
            .ok_or_else(|| PairingError::InvalidUri("missing wc: scheme".to_string()))?;
        let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
        let (topic, version) = path
            .split_once('@')
            .ok_or_else(|| PairingError::InvalidUri("missing @version".to_string()))?;

        if topic.is_empty() {
            return Err(PairingError::InvalidUri("empty topic".to_string()));
        }
        if version != PROTOCOL_VERSION {
            return Err(PairingError::UnsupportedVersion(version.to_string()));
        }

        let mut relay_protocol = None;
        let mut sym_key = None;
        let mut expiry_timestamp = None;
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            match name {
                "relay-protocol" => relay_protocol = Some(value),
                "symKey" => sym_key = Some(value),
                "expiryTimestamp" => {
                    let expiry = value.parse().map_err(|_| {
                        PairingError::InvalidUri(format!("bad expiryTimestamp {value}"))
                    })?;
                    expiry_timestamp = Some(expiry);
                }
                _ => {}
            }
        }

        match relay_protocol {
            Some(RELAY_PROTOCOL) => {}
            Some(other) => return Err(PairingError::UnsupportedRelayProtocol(other.to_string())),
            None => return Err(PairingError::InvalidUri("missing relay-protocol".to_string())),
        }

        let sym_key = sym_key
            .ok_or_else(|| PairingError::InvalidUri("missing symKey".to_string()))?;
        let sym_key =
            SymmetricKey::from_hex(sym_key).map_err(|e| PairingError::InvalidKey(e.to_string()))?;

        Ok(Self {
            topic: Topic::new(topic),
            sym_key,
            expiry_timestamp,
        })
    }
}

impl fmt::Display for PairingUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{SCHEME}{}@{PROTOCOL_VERSION}?relay-protocol={RELAY_PROTOCOL}&symKey={}",
            self.topic,
            self.sym_key.to_hex()
        )?;
        if let Some(expiry) = self.expiry_timestamp {
            write!(f, "&expiryTimestamp={expiry}")?;
        }
        Ok(())
    }
}
