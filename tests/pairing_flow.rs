//! Wallet pairing through the top-level core, with a simulated dapp on a
//! separate set of circuits.

mod helpers;

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wcrelay_core::pairing::PairingError;
use wcrelay_core::relay::memory::{circuit_pool, MemoryRelay};
use wcrelay_core::rpc::methods::{WC_SESSION_PROPOSE, WC_SESSION_REQUEST};
use wcrelay_core::rpc::RpcError;
use wcrelay_core::{ClientConfig, ErrorKind, WalletConnectCore};

use helpers::{circuit_client, pairing_uri, run_dapp};

#[tokio::test]
async fn wallet_pairs_and_serves_requests() {
    let relay = MemoryRelay::new();
    let config = ClientConfig::default().with_chain(137, "Polygon");
    let core = WalletConnectCore::new(circuit_pool(&relay, 2), config).unwrap();
    let uri = pairing_uri();

    let dapp = tokio::spawn(run_dapp(circuit_client(&relay, 2), uri.clone()));
    let established = tokio::time::timeout(
        Duration::from_secs(30),
        core.pair(&uri.to_string(), "0xabc", &CancellationToken::new()),
    )
    .await
    .expect("pairing finished")
    .unwrap();
    let dapp = dapp.await.unwrap();

    assert_eq!(established.pairing_topic, uri.topic);
    assert_eq!(established.peer.name, "Test Dapp");
    assert_eq!(established.topic(), dapp.session.topic());
    assert_ne!(established.topic(), &uri.topic);
    assert_eq!(dapp.settle.expiry, established.expiry);
    assert_eq!(
        dapp.settle.namespaces["eip155"].accounts,
        vec!["eip155:1:0xabc".to_string(), "eip155:137:0xabc".to_string()]
    );

    let _signer = established
        .session
        .handle(WC_SESSION_REQUEST, |params| async move {
            Ok(json!({ "signed": params["message"] }))
        });
    let signed = dapp
        .session
        .request(
            WC_SESSION_REQUEST,
            json!({ "message": "hello" }),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(signed, json!({ "signed": "hello" }));

    let topics = core.relay().topics();
    assert!(topics.contains(&uri.topic));
    assert!(topics.contains(established.topic()));
}

#[tokio::test]
async fn restored_session_reaches_the_same_peer() {
    let relay = MemoryRelay::new();
    let core = WalletConnectCore::new(circuit_pool(&relay, 2), ClientConfig::default()).unwrap();
    let uri = pairing_uri();

    let dapp = tokio::spawn(run_dapp(circuit_client(&relay, 2), uri.clone()));
    let established = core
        .pair(&uri.to_string(), "0xabc", &CancellationToken::new())
        .await
        .unwrap();
    let dapp = dapp.await.unwrap();

    // A restarted wallet rebuilds the session from its stored key.
    let stored_key = established.session.key().clone();
    established.session.close("app restart");
    let restored = core.restore_session(established.topic().clone(), stored_key);
    restored.subscribe(&CancellationToken::new()).await.unwrap();

    let _ack = restored.handle(WC_SESSION_REQUEST, |_params| async { Ok(json!(true)) });
    let answer = dapp
        .session
        .request(WC_SESSION_REQUEST, json!({}), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(answer, json!(true));
}

#[tokio::test]
async fn pairing_without_dapp_times_out_on_proposal() {
    tokio::time::pause();
    let relay = MemoryRelay::new();
    let core = WalletConnectCore::new(circuit_pool(&relay, 1), ClientConfig::default()).unwrap();
    let uri = pairing_uri();

    let error = core
        .pair(&uri.to_string(), "0xabc", &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(error, PairingError::Timeout(WC_SESSION_PROPOSE.to_string()));
    assert_eq!(error.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn closing_core_fails_pairing() {
    let relay = MemoryRelay::new();
    let core = WalletConnectCore::new(circuit_pool(&relay, 1), ClientConfig::default()).unwrap();
    core.close("logout");

    let error = core
        .pair(&pairing_uri().to_string(), "0xabc", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        PairingError::Rpc(RpcError::Relay(_)) | PairingError::Relay(_)
    ));
    assert_eq!(error.kind(), ErrorKind::Closed);
}
