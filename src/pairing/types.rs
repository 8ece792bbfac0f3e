//! Handshake message types.
//!
//! These mirror the JSON shapes of `wc_sessionPropose` and
//! `wc_sessionSettle`. Field names are camelCase on the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crypto::Topic;

/// The only relay protocol supported.
pub const RELAY_PROTOCOL: &str = "irn";

/// Descriptive metadata of a wallet or dapp.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Display name.
    pub name: String,
    /// Short description.
    #[serde(default)]
    pub description: String,
    /// Home page URL.
    #[serde(default)]
    pub url: String,
    /// Icon URLs.
    #[serde(default)]
    pub icons: Vec<String>,
}

impl Metadata {
    /// Creates metadata with the given display name and URL.
    #[must_use]
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds an icon URL.
    #[must_use]
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icons.push(icon.into());
        self
    }
}

/// Relay protocol descriptor, `{"protocol": "irn"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayProtocol {
    /// Protocol name.
    pub protocol: String,
}

impl Default for RelayProtocol {
    fn default() -> Self {
        Self {
            protocol: RELAY_PROTOCOL.to_string(),
        }
    }
}

/// One side of a session: its public key and metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Hex-encoded X25519 public key.
    pub public_key: String,
    /// Descriptive metadata.
    pub metadata: Metadata,
}

/// Capabilities a dapp asks for in one namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalNamespace {
    /// CAIP-2 chain ids.
    #[serde(default)]
    pub chains: Vec<String>,
    /// RPC methods.
    #[serde(default)]
    pub methods: Vec<String>,
    /// Event names.
    #[serde(default)]
    pub events: Vec<String>,
}

/// Capabilities a wallet grants in one namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// CAIP-2 chain ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chains: Vec<String>,
    /// CAIP-10 account ids.
    pub accounts: Vec<String>,
    /// RPC methods.
    pub methods: Vec<String>,
    /// Event names.
    pub events: Vec<String>,
}

/// Namespace maps keyed by namespace name (`eip155`).
pub type ProposalNamespaces = BTreeMap<String, ProposalNamespace>;

/// Settled namespace map.
pub type Namespaces = BTreeMap<String, Namespace>;

/// Parameters of `wc_sessionPropose`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProposeParams {
    /// Relay protocols the proposer accepts.
    #[serde(default)]
    pub relays: Vec<RelayProtocol>,
    /// The proposing dapp.
    pub proposer: Participant,
    /// Namespaces the dapp requires.
    #[serde(default)]
    pub required_namespaces: ProposalNamespaces,
    /// Namespaces the dapp would like.
    #[serde(default)]
    pub optional_namespaces: ProposalNamespaces,
}

/// Result of `wc_sessionPropose`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProposeResponse {
    /// Relay protocol the responder uses.
    pub relay: RelayProtocol,
    /// Hex-encoded responder public key.
    pub responder_public_key: String,
}

/// Parameters of `wc_sessionSettle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettleParams {
    /// Relay protocol of the session.
    pub relay: RelayProtocol,
    /// The wallet controlling the session.
    pub controller: Participant,
    /// Granted namespaces.
    pub namespaces: Namespaces,
    /// Echo of the proposal's required namespaces.
    #[serde(default)]
    pub required_namespaces: ProposalNamespaces,
    /// Echo of the proposal's optional namespaces.
    #[serde(default)]
    pub optional_namespaces: ProposalNamespaces,
    /// Topic of the pairing that produced the session.
    pub pairing_topic: Topic,
    /// Session expiry in unix seconds.
    pub expiry: i64,
}
