//! End-to-end walkthroughs of the three reference situations: parsing a
//! pairing link, a ping between two sessions, and a pool that rides out
//! upstream restarts without surfacing errors.

mod helpers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use wcrelay_core::crypto::{SymmetricKey, Topic};
use wcrelay_core::events::Listener;
use wcrelay_core::pairing::{PairingError, PairingUri};
use wcrelay_core::pool::{PoolError, PoolEvent, Resource, ResourcePool, SlotContext};
use wcrelay_core::relay::memory::MemoryRelay;
use wcrelay_core::rpc::methods::WC_SESSION_PING;

use helpers::{eventually, session_pair};

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[test]
fn pairing_link_yields_topic_and_key() {
    let link = format!("wc:deadbeef@2?relay-protocol=irn&symKey={}", "00".repeat(32));

    let uri = PairingUri::parse(&link).unwrap();
    assert_eq!(uri.topic, Topic::new("deadbeef"));
    assert_eq!(uri.sym_key, SymmetricKey::from_bytes([0; 32]));

    let old = link.replace("@2?", "@1?");
    assert_eq!(
        PairingUri::parse(&old),
        Err(PairingError::UnsupportedVersion("1".to_string()))
    );
}

#[tokio::test]
async fn ping_between_two_sessions_resolves() {
    let relay = MemoryRelay::new();
    let (_key, wallet, dapp) = session_pair(&relay).await;

    let _pong = dapp.handle(WC_SESSION_PING, |_params| async { Ok(Value::Bool(true)) });

    let answer = tokio::time::timeout(
        Duration::from_secs(30),
        wallet.request(WC_SESSION_PING, json!({}), &CancellationToken::new()),
    )
    .await
    .expect("ping answered in time")
    .unwrap();

    assert_eq!(answer, Value::Bool(true));
    let tags: Vec<u32> = relay.published().iter().map(|p| p.tag).collect();
    assert_eq!(tags, vec![1114, 1115]);
}

/// An upstream pool counting its generations.
fn counting_upstream(generations: &Arc<AtomicUsize>) -> ResourcePool<usize> {
    let generations = Arc::clone(generations);
    ResourcePool::new("upstream", 1, move |_ctx: SlotContext<usize>| {
        let generation = generations.fetch_add(1, Ordering::SeqCst) + 1;
        async move { Ok(Resource::bare(Arc::new(generation))) }
    })
}

/// A pool whose first two attempts wait for `gate` and then fail.
fn gated_downstream(attempts: &Arc<AtomicUsize>, gate: &Arc<Notify>) -> ResourcePool<usize> {
    let attempts = Arc::clone(attempts);
    let gate = Arc::clone(gate);
    ResourcePool::new("downstream", 1, move |ctx: SlotContext<usize>| {
        let attempts = Arc::clone(&attempts);
        let gate = Arc::clone(&gate);
        async move {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                gate.notified().await;
                return Err(PoolError::construction(ctx.index, format!("attempt {n}")));
            }
            Ok(Resource::bare(Arc::new(n)))
        }
    })
}

/// Forwards upstream starts to `downstream` and collects surfaced errors.
fn wire(
    upstream: &ResourcePool<usize>,
    downstream: &ResourcePool<usize>,
) -> (Vec<Listener>, Arc<Mutex<Vec<PoolError>>>) {
    let forward = {
        let downstream = downstream.downgrade();
        upstream.on_event(move |event| {
            if let PoolEvent::Started { .. } = event {
                if let Some(downstream) = downstream.upgrade() {
                    downstream.notify_external_restart();
                }
            }
        })
    };

    let surfaced = Arc::new(Mutex::new(Vec::new()));
    let errors = {
        let surfaced = Arc::clone(&surfaced);
        downstream.on_event(move |event| {
            if let PoolEvent::Errored { error, .. } = event {
                surfaced.lock().unwrap().push(error.clone());
            }
        })
    };
    (vec![forward, errors], surfaced)
}

/// Restarts the upstream and waits for its next generation, while the
/// downstream attempt in flight is still blocked on its gate.
async fn restart_upstream(upstream: &ResourcePool<usize>, generations: &Arc<AtomicUsize>) {
    let next = generations.load(Ordering::SeqCst) + 1;
    settle().await;
    upstream.restart(0);
    let generations = Arc::clone(generations);
    assert!(
        eventually(Duration::from_secs(5), move || {
            generations.load(Ordering::SeqCst) == next
        })
        .await
    );
    settle().await;
}

#[tokio::test]
async fn restarts_upstream_hide_failures_of_interrupted_attempts() {
    // A downstream pool built on an upstream one. Its first two attempts
    // fail. Each failing attempt gets its own upstream restart while it is
    // in flight, so neither failure is surfaced. With only one restart,
    // landing during attempt 1, attempt 2 fails fresh; see
    // `single_upstream_restart_hides_only_the_interrupted_attempt`.
    let generations = Arc::new(AtomicUsize::new(0));
    let upstream = counting_upstream(&generations);
    upstream.acquire(0, &CancellationToken::new()).await.unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Notify::new());
    let downstream = gated_downstream(&attempts, &gate);
    let (_wiring, surfaced) = wire(&upstream, &downstream);

    for _ in 1..=2 {
        restart_upstream(&upstream, &generations).await;
        gate.notify_one();
    }

    let value = downstream
        .acquire(0, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(*value, 3);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(surfaced.lock().unwrap().is_empty());
}

#[tokio::test]
async fn single_upstream_restart_hides_only_the_interrupted_attempt() {
    let generations = Arc::new(AtomicUsize::new(0));
    let upstream = counting_upstream(&generations);
    upstream.acquire(0, &CancellationToken::new()).await.unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Notify::new());
    let downstream = gated_downstream(&attempts, &gate);
    let (_wiring, surfaced) = wire(&upstream, &downstream);

    // One restart lands during attempt 1; attempt 2 sees no restart.
    restart_upstream(&upstream, &generations).await;
    gate.notify_one();
    let attempts_seen = Arc::clone(&attempts);
    assert!(
        eventually(Duration::from_secs(5), move || {
            attempts_seen.load(Ordering::SeqCst) == 2
        })
        .await
    );
    settle().await;
    gate.notify_one();

    let error = downstream
        .acquire(0, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(error, PoolError::construction(0, "attempt 2"));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(*surfaced.lock().unwrap(), vec![error]);
}
