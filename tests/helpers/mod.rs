//! Reusable fixtures for relay, session and pairing integration tests.
//!
//! Everything runs against the in-memory relay from
//! `wcrelay_core::relay::memory`. Each `CircuitRelayPool` built here gets its
//! own circuits, so two pools behave like two devices on the same relay.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use wcrelay_core::crypto::{parse_public_key, EphemeralKeypair, SymmetricKey, Topic};
use wcrelay_core::events::Listener;
use wcrelay_core::pairing::{
    Metadata, Participant, PairingUri, ProposalNamespace, RelayProtocol, SessionProposeParams,
    SessionProposeResponse, SessionSettleParams,
};
use wcrelay_core::relay::memory::{circuit_pool, MemoryCircuit, MemoryRelay};
use wcrelay_core::relay::{CircuitRelayPool, IrnClient, RelayHandle};
use wcrelay_core::rpc::methods::{WC_SESSION_PROPOSE, WC_SESSION_SETTLE};
use wcrelay_core::rpc::{SecureRpcSession, SessionOptions};

/// Relay ping interval used by every pool in tests.
pub const PING: Duration = Duration::from_secs(10);

/// A relay handle over one direct connection.
pub fn direct_client(relay: &MemoryRelay) -> Arc<dyn RelayHandle> {
    Arc::new(IrnClient::new(Arc::new(relay.connect())))
}

/// A self-healing relay handle over `circuits` fresh memory circuits.
pub fn circuit_client(relay: &MemoryRelay, circuits: usize) -> Arc<CircuitRelayPool<MemoryCircuit>> {
    Arc::new(CircuitRelayPool::new(
        circuit_pool(relay, circuits),
        Vec::new(),
        PING,
    ))
}

/// A session on `key`'s topic that leaves `relay` open when closed.
pub fn session_on(relay: Arc<dyn RelayHandle>, key: &SymmetricKey) -> SecureRpcSession {
    SecureRpcSession::from_key(key.clone(), relay, SessionOptions::default().with_shared_relay())
}

/// Two subscribed sessions sharing a topic and key, each on its own
/// circuit relay.
pub async fn session_pair(relay: &MemoryRelay) -> (SymmetricKey, SecureRpcSession, SecureRpcSession) {
    let key = SymmetricKey::generate();
    let wallet = session_on(circuit_client(relay, 2), &key);
    let dapp = session_on(circuit_client(relay, 2), &key);
    let cancel = CancellationToken::new();
    wallet.subscribe(&cancel).await.expect("wallet subscribe");
    dapp.subscribe(&cancel).await.expect("dapp subscribe");
    (key, wallet, dapp)
}

/// Polls `condition` until it holds or `limit` elapses.
pub async fn eventually(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// A fresh pairing URI.
pub fn pairing_uri() -> PairingUri {
    let key = SymmetricKey::generate();
    PairingUri::new(key.topic(), key)
}

/// What the simulated dapp saw and built during a pairing.
pub struct DappSide {
    /// The dapp's session on the derived topic.
    pub session: SecureRpcSession,
    /// Settle parameters sent by the wallet.
    pub settle: SessionSettleParams,
    _settle_handler: Listener,
}

/// Plays the dapp side of a pairing over `relay`: proposes on the pairing
/// topic, derives the session key from the wallet's answer, and
/// acknowledges the settlement with `true`.
pub async fn run_dapp(relay: Arc<dyn RelayHandle>, uri: PairingUri) -> DappSide {
    let cancel = CancellationToken::new();
    let pairing = SecureRpcSession::new(
        uri.topic.clone(),
        uri.sym_key.clone(),
        Arc::clone(&relay),
        SessionOptions::default().with_shared_relay(),
    );
    pairing.subscribe(&cancel).await.expect("dapp pairing subscribe");

    let keypair = EphemeralKeypair::generate();
    let response = pairing
        .request(WC_SESSION_PROPOSE, proposal(&keypair), &cancel)
        .await
        .expect("proposal answered");
    let response: SessionProposeResponse =
        serde_json::from_value(response).expect("propose response shape");
    let wallet_public = parse_public_key(&response.responder_public_key).expect("wallet key");
    let key = keypair
        .derive_session_key(&wallet_public)
        .expect("session key");

    let session = session_on(relay, &key);
    let (tx, rx) = oneshot::channel();
    let tx = Mutex::new(Some(tx));
    let settle_handler = session.handle(WC_SESSION_SETTLE, move |params| {
        if let Some(tx) = tx.lock().unwrap().take() {
            let _ = tx.send(params);
        }
        async { Ok(Value::Bool(true)) }
    });
    session.subscribe(&cancel).await.expect("dapp session subscribe");

    let settle = serde_json::from_value(rx.await.expect("settle received")).expect("settle shape");
    DappSide {
        session,
        settle,
        _settle_handler: settle_handler,
    }
}

/// A `wc_sessionPropose` payload asking for `personal_sign` on mainnet.
pub fn proposal(keypair: &EphemeralKeypair) -> Value {
    json!(SessionProposeParams {
        relays: vec![RelayProtocol::default()],
        proposer: Participant {
            public_key: keypair.public_key_hex(),
            metadata: Metadata::new("Test Dapp", "https://dapp.test"),
        },
        required_namespaces: [(
            "eip155".to_string(),
            ProposalNamespace {
                chains: vec!["eip155:1".to_string()],
                methods: vec!["personal_sign".to_string()],
                events: vec!["accountsChanged".to_string()],
            },
        )]
        .into(),
        optional_namespaces: Default::default(),
    })
}

/// Topic of `key`, for relay assertions.
pub fn topic_of(key: &SymmetricKey) -> Topic {
    key.topic()
}
