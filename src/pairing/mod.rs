//! Pairing: from a scanned `wc:` URI to a settled session.
//!
//! The pairing topic and key come from the URI. The dapp proposes on the
//! pairing topic, the wallet answers with an ephemeral X25519 public key,
//! and both sides derive the session key with HKDF-SHA256. The wallet then
//! settles the session on the derived topic.

mod error;
mod handshake;
mod types;
mod uri;

pub use error::{PairingError, PairingResult};
pub use handshake::{EstablishedSession, HandshakeState, PairingHandshake};
pub use types::{
    Metadata, Namespace, Namespaces, Participant, ProposalNamespace, ProposalNamespaces,
    RelayProtocol, SessionProposeParams, SessionProposeResponse, SessionSettleParams,
    RELAY_PROTOCOL,
};
pub use uri::{PairingUri, PROTOCOL_VERSION};
