//! Encrypted request/response sessions over circuit relays.

mod helpers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use wcrelay_core::crypto::{encrypt_message, SymmetricKey};
use wcrelay_core::relay::memory::MemoryRelay;
use wcrelay_core::relay::{RelayPublishPayload, METHOD_NOT_FOUND};
use wcrelay_core::rpc::methods::{WC_SESSION_DELETE, WC_SESSION_PING, WC_SESSION_REQUEST};
use wcrelay_core::rpc::{PendingRequest, RpcError, RpcErrorObject, RpcRequest};

use helpers::{circuit_client, eventually, session_on, session_pair, topic_of};

#[tokio::test]
async fn replayed_request_reaches_handler_once() {
    let relay = MemoryRelay::new();
    let key = SymmetricKey::generate();
    let wallet = session_on(circuit_client(&relay, 2), &key);
    wallet.subscribe(&CancellationToken::new()).await.unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let _handler = {
        let calls = Arc::clone(&calls);
        wallet.handle(WC_SESSION_PING, move |_params| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(Value::Bool(true)) }
        })
    };

    let request = RpcRequest::new(WC_SESSION_PING, json!({}));
    let payload = RelayPublishPayload {
        topic: topic_of(&key),
        message: encrypt_message(&key, &serde_json::to_vec(&request).unwrap()).unwrap(),
        prompt: false,
        tag: 1114,
        ttl: 30,
    };
    relay.inject(&payload);
    relay.inject(&payload);

    let watched = relay.clone();
    assert!(eventually(Duration::from_secs(5), move || watched.published().len() == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let replies: Vec<u32> = relay.published().iter().map(|p| p.tag).collect();
    assert_eq!(replies, vec![1115]);
}

#[tokio::test]
async fn handler_errors_reach_the_requester() {
    let relay = MemoryRelay::new();
    let (_key, wallet, dapp) = session_pair(&relay).await;
    let _reject = dapp.handle(WC_SESSION_REQUEST, |_params| async {
        Err(RpcErrorObject::new(5000, "User rejected"))
    });
    let cancel = CancellationToken::new();

    let rejected = wallet
        .request(WC_SESSION_REQUEST, json!({"chainId": "eip155:1"}), &cancel)
        .await
        .unwrap_err();
    assert_eq!(
        rejected,
        RpcError::Remote {
            code: 5000,
            message: "User rejected".to_string()
        }
    );

    let unhandled = wallet
        .request(WC_SESSION_DELETE, json!({"code": 6000}), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(
        unhandled,
        RpcError::Remote { code: METHOD_NOT_FOUND, .. }
    ));
}

#[tokio::test]
async fn pending_request_survives_session_restart() {
    let relay = MemoryRelay::new();
    let key = SymmetricKey::generate();
    let wallet_relay = circuit_client(&relay, 2);
    let wallet = session_on(wallet_relay.clone(), &key);
    let dapp = session_on(circuit_client(&relay, 2), &key);
    for session in [&wallet, &dapp] {
        session.subscribe(&CancellationToken::new()).await.unwrap();
    }

    let gate = Arc::new(Notify::new());
    let _signer = {
        let gate = Arc::clone(&gate);
        dapp.handle(WC_SESSION_REQUEST, move |_params| {
            let gate = Arc::clone(&gate);
            async move {
                gate.notified().await;
                Ok(json!("0xsigned"))
            }
        })
    };

    let cancel = CancellationToken::new();
    let receipt = wallet
        .request_pending(WC_SESSION_REQUEST, json!({"method": "personal_sign"}), &cancel)
        .await
        .unwrap();
    let stored = serde_json::to_string(&receipt).unwrap();
    wallet.close("app restart");

    let restored = session_on(wallet_relay, &key);
    restored.subscribe(&cancel).await.unwrap();
    let receipt: PendingRequest = serde_json::from_str(&stored).unwrap();

    let waiter = {
        let restored = restored.clone();
        tokio::spawn(async move { restored.wait_pending(&receipt, &CancellationToken::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    gate.notify_one();

    let answer = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("response delivered")
        .unwrap()
        .unwrap();
    assert_eq!(answer, json!("0xsigned"));
}

#[tokio::test]
async fn cancelled_request_fails_without_answer() {
    let relay = MemoryRelay::new();
    let key = SymmetricKey::generate();
    let wallet = session_on(circuit_client(&relay, 1), &key);
    wallet.subscribe(&CancellationToken::new()).await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let error = wallet
        .request(WC_SESSION_PING, json!({}), &cancel)
        .await
        .unwrap_err();
    assert_eq!(error, RpcError::Cancelled);
    assert!(error.kind().is_retryable());
}

#[tokio::test(start_paused = true)]
async fn request_over_silent_relay_times_out_within_ttl() {
    let relay = MemoryRelay::new();
    let key = SymmetricKey::generate();
    let wallet = session_on(circuit_client(&relay, 2), &key);
    wallet.subscribe(&CancellationToken::new()).await.unwrap();

    // The relay stops acknowledging anything, publishes included.
    relay.set_silent(true);
    let started = tokio::time::Instant::now();
    let outcome = tokio::time::timeout(
        Duration::from_secs(3600),
        wallet.request(WC_SESSION_PING, json!({}), &CancellationToken::new()),
    )
    .await
    .expect("request gives up on its own");

    assert!(
        matches!(&outcome, Err(RpcError::Timeout { method, .. }) if method == WC_SESSION_PING),
        "{outcome:?}"
    );
    assert!(started.elapsed() <= Duration::from_secs(30));
}
