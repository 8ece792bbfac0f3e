//! Relay connection that hops to a fresh anonymizing circuit on failure.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::error::RelayResult;
use super::handle::{
    resubscribe, retry_backoff, RelayHandle, RelayShared, RESUBSCRIBE_PING_FACTOR,
};
use super::socket_pool::SocketRelayPool;
use super::transport::Circuit;
use super::types::{
    EventListener, RelayEvent, RelayMessage, RelayPublishPayload, RequestListener,
};
use crate::crypto::Topic;
use crate::events::Listener;
use crate::pool::{DisposeStack, PoolError, PoolEvent, Resource, ResourcePool, SlotContext};

type CircuitRelay<C> = SocketRelayPool<<C as Circuit>::Socket>;

/// A single hot-swapped [`SocketRelayPool`] running over a circuit taken at
/// random from an externally owned circuit pool.
///
/// Subscribed topics are replayed exactly once on each new circuit. The
/// inner socket relay starts with an empty topic set and learns the topics
/// from that replay, so a socket-level reconnect inside one circuit replays
/// them again on its own.
///
/// Whenever the circuit pool reports a freshly started circuit, every
/// errored circuit slot is restarted, and so is an errored relay slot. A
/// relay slot that fails to build is also retried with backoff.
///
/// When the relay on the current circuit reports an error, the circuit is
/// given one ping interval to heal before the slot switches to another
/// circuit. A relay that closes switches immediately.
pub struct CircuitRelayPool<C: Circuit> {
    relays: ResourcePool<CircuitRelay<C>>,
    shared: Arc<RelayShared>,
    _wiring: Vec<Listener>,
}

impl<C: Circuit> fmt::Debug for CircuitRelayPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitRelayPool")
            .field("relays", &self.relays)
            .field("topics", &self.shared.topics())
            .finish_non_exhaustive()
    }
}

impl<C: Circuit> CircuitRelayPool<C> {
    /// Starts building a relay connection over a circuit from `circuits`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        circuits: ResourcePool<C>,
        topics: impl IntoIterator<Item = Topic>,
        ping_interval: Duration,
    ) -> Self {
        let shared = Arc::new(RelayShared::with_topics(topics));

        let relays = {
            let shared = Arc::clone(&shared);
            let circuits = circuits.clone();
            ResourcePool::new(
                "circuit-relay",
                1,
                move |ctx: SlotContext<CircuitRelay<C>>| {
                    build_relay(circuits.clone(), Arc::clone(&shared), ping_interval, ctx)
                },
            )
        };

        let upstream = {
            let relays = relays.downgrade();
            let weak_circuits = circuits.downgrade();
            circuits.on_event(move |event| {
                let PoolEvent::Started { index } = event else {
                    return;
                };
                if let Some(relays) = relays.upgrade() {
                    relays.notify_external_restart();
                    relays.restart_errored(0);
                }
                if let Some(circuits) = weak_circuits.upgrade() {
                    for errored in circuits.errored_indices() {
                        info!(circuit = errored, started = index, "re-arming failed circuit");
                        circuits.restart(errored);
                    }
                }
            })
        };

        let errors = {
            let shared = Arc::clone(&shared);
            relays.on_event(move |event| {
                if let PoolEvent::Errored { error, .. } = event {
                    shared.events.emit(&RelayEvent::Error {
                        message: error.to_string(),
                    });
                }
            })
        };

        let retry = relays.retry_errored(retry_backoff(ping_interval));

        Self {
            relays,
            shared,
            _wiring: vec![upstream, errors, retry],
        }
    }

    /// Topics replayed on each new circuit.
    #[must_use]
    pub fn topics(&self) -> Vec<Topic> {
        self.shared.topics()
    }

    /// The underlying single-slot pool of per-circuit relays.
    #[must_use]
    pub const fn relays(&self) -> &ResourcePool<CircuitRelay<C>> {
        &self.relays
    }

    /// Subscribes over the current circuit, then records `topic` for replay.
    ///
    /// # Errors
    ///
    /// Returns an error if no circuit relay can be acquired or the call
    /// fails.
    pub async fn subscribe(&self, topic: &Topic, cancel: &CancellationToken) -> RelayResult<String> {
        self.shared.ensure_open()?;
        let relay = self.relays.acquire(0, cancel).await?;
        let id = relay.subscribe(topic, cancel).await?;
        self.shared.remember(topic.clone());
        Ok(id)
    }

    /// Publishes over the current circuit.
    ///
    /// # Errors
    ///
    /// Returns an error if no circuit relay can be acquired or the call
    /// fails.
    pub async fn publish(
        &self,
        payload: &RelayPublishPayload,
        cancel: &CancellationToken,
    ) -> RelayResult<()> {
        self.shared.ensure_open()?;
        let relay = self.relays.acquire(0, cancel).await?;
        relay.publish(payload, cancel).await
    }

    /// Registers a listener for messages delivered to any replayed topic.
    #[must_use = "dropping the guard deregisters the listener"]
    pub fn on_request(&self, listener: Arc<RequestListener>) -> Listener {
        self.shared.events.on_request(listener)
    }

    /// Registers a listener for close and error events.
    #[must_use = "dropping the guard deregisters the listener"]
    pub fn on_event(&self, listener: Arc<EventListener>) -> Listener {
        self.shared.events.on_event(listener)
    }

    /// Closes the pool and the relay on the current circuit.
    pub fn close(&self, reason: &str) {
        if !self.shared.mark_closed(reason) {
            return;
        }
        debug!(reason, "closing circuit relay");
        self.shared.events.emit(&RelayEvent::Close {
            reason: Some(reason.to_string()),
        });
        self.relays.close(reason);
    }
}

async fn build_relay<C: Circuit>(
    circuits: ResourcePool<C>,
    shared: Arc<RelayShared>,
    ping_interval: Duration,
    ctx: SlotContext<CircuitRelay<C>>,
) -> Result<Resource<CircuitRelay<C>>, PoolError> {
    if let Some(reason) = shared.closed_reason() {
        return Err(PoolError::Closed(reason));
    }

    let (circuit_index, circuit) = circuits.take_random(&ctx.cancel).await?;
    debug!(circuit = circuit_index, "building relay over circuit");

    let mut stack = DisposeStack::new();
    let relay = Arc::new(SocketRelayPool::new(
        circuit.sockets(),
        std::iter::empty(),
        ping_interval,
    ));
    {
        let relay = Arc::clone(&relay);
        stack.defer(move || relay.close("circuit slot disposed"));
    }

    let timeout = ping_interval * RESUBSCRIBE_PING_FACTOR;
    for topic in shared.topics() {
        resubscribe(&*relay, &topic, timeout, ctx.index, &ctx.cancel).await?;
    }

    let forward = Arc::clone(&shared);
    stack.hold(relay.on_request(Arc::new(move |message: &RelayMessage| {
        forward.events.claim(message)
    })));

    let handle = ctx.handle.clone();
    let watched = Arc::downgrade(&relay);
    let lifetime = ctx.cancel.clone();
    let switch_pending = Arc::new(AtomicBool::new(false));
    stack.hold(relay.on_event(Arc::new(move |event: &RelayEvent| match event {
        RelayEvent::Close { .. } => {
            debug!(?event, circuit = circuit_index, "circuit relay closed, switching circuit");
            handle.restart();
        }
        RelayEvent::Error { message } => {
            if switch_pending.swap(true, Ordering::SeqCst) {
                return;
            }
            debug!(
                circuit = circuit_index,
                error = %message,
                grace = ?ping_interval,
                "circuit relay failing"
            );
            let handle = handle.clone();
            let watched = watched.clone();
            let lifetime = lifetime.clone();
            let switch_pending = Arc::clone(&switch_pending);
            tokio::spawn(async move {
                tokio::select! {
                    () = lifetime.cancelled() => {}
                    () = tokio::time::sleep(ping_interval) => {
                        switch_pending.store(false, Ordering::SeqCst);
                        if watched.upgrade().is_some_and(|relay| relay.is_failing()) {
                            info!(circuit = circuit_index, "relay did not heal, switching circuit");
                            handle.restart();
                        }
                    }
                }
            });
        }
    })));

    // The relay must not outlive the circuit it runs over.
    let handle = ctx.handle.clone();
    stack.hold(circuits.on_event(move |event| match event {
        PoolEvent::Restarting { index } if *index == circuit_index => {
            debug!(circuit = circuit_index, "circuit replaced, switching circuit");
            handle.restart();
        }
        PoolEvent::Closed { .. } => handle.restart(),
        _ => {}
    }));

    Ok(Resource::new(relay, stack))
}

#[async_trait]
impl<C: Circuit> RelayHandle for CircuitRelayPool<C> {
    async fn subscribe(&self, topic: &Topic, cancel: &CancellationToken) -> RelayResult<String> {
        Self::subscribe(self, topic, cancel).await
    }

    async fn publish(
        &self,
        payload: RelayPublishPayload,
        cancel: &CancellationToken,
    ) -> RelayResult<()> {
        Self::publish(self, &payload, cancel).await
    }

    fn on_request(&self, listener: Arc<RequestListener>) -> Listener {
        Self::on_request(self, listener)
    }

    fn on_event(&self, listener: Arc<EventListener>) -> Listener {
        Self::on_event(self, listener)
    }

    fn close(&self, reason: &str) {
        Self::close(self, reason);
    }
}
