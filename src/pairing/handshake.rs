//! Wallet side of the pairing handshake.
//!
//! ```text
//! Parsed ──subscribe pairing topic──► PairedListening
//!        ──wc_sessionPropose answered, X25519 + HKDF──► KeyDerived
//!        ──subscribe session topic, wc_sessionSettle acked──► Settled
//! ```
//!
//! Nothing is retried; the first failure aborts the handshake.

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::error::{PairingError, PairingResult};
use super::types::{
    Metadata, Namespaces, Participant, RelayProtocol, SessionProposeParams,
    SessionProposeResponse, SessionSettleParams, RELAY_PROTOCOL,
};
use super::uri::PairingUri;
use crate::config::ClientConfig;
use crate::crypto::{parse_public_key, EphemeralKeypair, Topic};
use crate::events::Listener;
use crate::logging::ShortTopic;
use crate::relay::{RelayHandle, INVALID_PARAMS};
use crate::rpc::methods::{self, Direction, WC_SESSION_PROPOSE, WC_SESSION_SETTLE};
use crate::rpc::{RpcErrorObject, RpcError, SecureRpcSession, SessionOptions};

/// JSON-RPC code sent when a proposal names no supported relay.
const UNSUPPORTED_RELAYS: i64 = 5100;

/// Progress of a [`PairingHandshake`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// The URI was parsed.
    Parsed,
    /// Subscribed to the pairing topic, waiting for a proposal.
    PairedListening,
    /// The proposal was answered and the session key derived.
    KeyDerived,
    /// The dapp acknowledged the settlement.
    Settled,
}

/// A session produced by a successful handshake.
#[derive(Debug, Clone)]
pub struct EstablishedSession {
    /// Encrypted session on the derived topic.
    pub session: SecureRpcSession,
    /// The dapp's metadata.
    pub peer: Metadata,
    /// Topic of the pairing the session came from.
    pub pairing_topic: Topic,
    /// Namespaces granted to the dapp.
    pub namespaces: Namespaces,
    /// Session expiry in unix seconds.
    pub expiry: i64,
}

impl EstablishedSession {
    /// The session topic.
    #[must_use]
    pub fn topic(&self) -> &Topic {
        self.session.topic()
    }
}

type ProposalSlot = Mutex<Option<oneshot::Sender<PairingResult<SessionProposeParams>>>>;

/// Drives one pairing from a scanned URI to a settled session.
pub struct PairingHandshake {
    uri: PairingUri,
    relay: Arc<dyn RelayHandle>,
    config: ClientConfig,
    state: HandshakeState,
}

impl std::fmt::Debug for PairingHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingHandshake")
            .field("pairing_topic", &ShortTopic(&self.uri.topic))
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl PairingHandshake {
    /// Parses `uri` and prepares a handshake over `relay`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URI is malformed, unsupported or expired.
    pub fn new(uri: &str, relay: Arc<dyn RelayHandle>, config: ClientConfig) -> PairingResult<Self> {
        let uri = PairingUri::parse(uri)?;
        if uri.is_expired_at(chrono::Utc::now().timestamp()) {
            return Err(PairingError::InvalidUri("pairing expired".to_string()));
        }
        Ok(Self {
            uri,
            relay,
            config,
            state: HandshakeState::Parsed,
        })
    }

    /// How far the handshake got.
    #[must_use]
    pub const fn state(&self) -> HandshakeState {
        self.state
    }

    /// The pairing topic from the URI.
    #[must_use]
    pub const fn pairing_topic(&self) -> &Topic {
        &self.uri.topic
    }

    /// Runs the handshake, granting the dapp `address` on every configured
    /// chain.
    ///
    /// # Errors
    ///
    /// Returns the first failure of any step. No partial session is
    /// returned.
    pub async fn run(
        &mut self,
        address: &str,
        cancel: &CancellationToken,
    ) -> PairingResult<EstablishedSession> {
        let options = SessionOptions::from_config(&self.config).with_shared_relay();
        let pairing = SecureRpcSession::new(
            self.uri.topic.clone(),
            self.uri.sym_key.clone(),
            Arc::clone(&self.relay),
            options.clone(),
        );
        let keypair = EphemeralKeypair::generate();

        let (proposal_tx, proposal_rx) = oneshot::channel();
        let _propose_handler = answer_proposal(&pairing, &keypair, proposal_tx)?;

        pairing.subscribe(cancel).await?;
        self.state = HandshakeState::PairedListening;
        info!(topic = %ShortTopic(&self.uri.topic), "pairing topic subscribed, waiting for proposal");

        let proposal = wait_for_proposal(proposal_rx, cancel).await?;
        let peer_public = parse_public_key(&proposal.proposer.public_key)
            .map_err(|e| PairingError::InvalidProposal(e.to_string()))?;
        let session_key = keypair.derive_session_key(&peer_public)?;
        self.state = HandshakeState::KeyDerived;

        let session = SecureRpcSession::from_key(session_key, Arc::clone(&self.relay), options);
        debug!(topic = %ShortTopic(session.topic()), "session key derived");
        session.subscribe(cancel).await?;

        let namespaces = self.config.namespaces(address);
        let expiry = chrono::Utc::now().timestamp()
            + i64::try_from(self.config.session_expiry_secs).unwrap_or(i64::MAX / 2);
        let settle = SessionSettleParams {
            relay: RelayProtocol::default(),
            controller: Participant {
                public_key: keypair.public_key_hex(),
                metadata: self.config.metadata.clone(),
            },
            namespaces: namespaces.clone(),
            required_namespaces: proposal.required_namespaces,
            optional_namespaces: proposal.optional_namespaces,
            pairing_topic: self.uri.topic.clone(),
            expiry,
        };
        let params = serde_json::to_value(&settle).map_err(RpcError::from)?;
        let acknowledged = session.request(WC_SESSION_SETTLE, params, cancel).await?;
        if acknowledged != Value::Bool(true) {
            return Err(PairingError::SettleRejected(acknowledged.to_string()));
        }

        self.state = HandshakeState::Settled;
        info!(
            topic = %ShortTopic(session.topic()),
            peer = %proposal.proposer.metadata.name,
            "session settled"
        );
        Ok(EstablishedSession {
            session,
            peer: proposal.proposer.metadata,
            pairing_topic: self.uri.topic.clone(),
            namespaces,
            expiry,
        })
    }
}

/// Registers the proposal handler on the pairing session. The handler that
/// sees the proposal also supplies the reply carrying our public key.
fn answer_proposal(
    pairing: &SecureRpcSession,
    keypair: &EphemeralKeypair,
    proposal_tx: oneshot::Sender<PairingResult<SessionProposeParams>>,
) -> PairingResult<Listener> {
    let slot: Arc<ProposalSlot> = Arc::new(Mutex::new(Some(proposal_tx)));
    let reply = serde_json::to_value(SessionProposeResponse {
        relay: RelayProtocol::default(),
        responder_public_key: keypair.public_key_hex(),
    })
    .map_err(RpcError::from)?;

    Ok(pairing.handle(WC_SESSION_PROPOSE, move |params| {
        let forward = |outcome: PairingResult<SessionProposeParams>| {
            let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(sender) = sender {
                let _ = sender.send(outcome);
            }
        };

        let answer = match serde_json::from_value::<SessionProposeParams>(params) {
            Ok(proposal) if !supports_irn(&proposal) => {
                let names: Vec<String> = proposal.relays.into_iter().map(|r| r.protocol).collect();
                forward(Err(PairingError::UnsupportedRelayProtocol(names.join(","))));
                Err(RpcErrorObject::new(UNSUPPORTED_RELAYS, "Unsupported relays"))
            }
            Ok(proposal) => {
                forward(Ok(proposal));
                Ok(reply.clone())
            }
            Err(error) => {
                forward(Err(PairingError::InvalidProposal(error.to_string())));
                Err(RpcErrorObject::new(INVALID_PARAMS, format!("Invalid proposal: {error}")))
            }
        };
        async move { answer }
    }))
}

fn supports_irn(proposal: &SessionProposeParams) -> bool {
    proposal.relays.is_empty() || proposal.relays.iter().any(|r| r.protocol == RELAY_PROTOCOL)
}

async fn wait_for_proposal(
    proposal_rx: oneshot::Receiver<PairingResult<SessionProposeParams>>,
    cancel: &CancellationToken,
) -> PairingResult<SessionProposeParams> {
    let ttl = methods::options(WC_SESSION_PROPOSE, Direction::Request)
        .map(|options| options.ttl_duration())
        .unwrap_or_default();

    tokio::select! {
        () = cancel.cancelled() => Err(PairingError::Cancelled),
        received = tokio::time::timeout(ttl, proposal_rx) => match received {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(PairingError::InvalidProposal("proposal handler dropped".to_string())),
            Err(_) => Err(PairingError::Timeout(WC_SESSION_PROPOSE.to_string())),
        },
    }
}
