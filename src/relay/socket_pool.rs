//! Self-healing relay connection over a pool of sockets.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::client::IrnClient;
use super::error::RelayResult;
use super::handle::{
    resubscribe, retry_backoff, RelayHandle, RelayShared, RESUBSCRIBE_PING_FACTOR,
};
use super::transport::RelaySocket;
use super::types::{
    EventListener, RelayEvent, RelayMessage, RelayPublishPayload, RequestListener,
};
use crate::crypto::Topic;
use crate::events::Listener;
use crate::pool::{DisposeStack, PoolError, PoolEvent, Resource, ResourcePool, SlotContext};

/// A single hot-swapped [`IrnClient`] built on a socket taken from an
/// externally owned socket pool.
///
/// Every topic subscribed through this handle is replayed on each new
/// client. When the client closes or errors, the slot is rebuilt on another
/// socket. A failed rebuild is retried with backoff, and immediately when
/// the socket pool reports a fresh socket.
pub struct SocketRelayPool<S: RelaySocket> {
    clients: ResourcePool<IrnClient<S>>,
    shared: Arc<RelayShared>,
    _wiring: Vec<Listener>,
}

impl<S: RelaySocket> fmt::Debug for SocketRelayPool<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketRelayPool")
            .field("clients", &self.clients)
            .field("topics", &self.shared.topics())
            .finish_non_exhaustive()
    }
}

impl<S: RelaySocket> SocketRelayPool<S> {
    /// Starts building a client on a socket from `sockets`.
    ///
    /// `topics` are subscribed on every client this pool builds. Each relay
    /// call is bounded by [`RESUBSCRIBE_PING_FACTOR`] times
    /// `ping_interval`. Must be called from within a tokio runtime.
    pub fn new(
        sockets: ResourcePool<S>,
        topics: impl IntoIterator<Item = Topic>,
        ping_interval: Duration,
    ) -> Self {
        let shared = Arc::new(RelayShared::with_topics(topics));
        let timeout = ping_interval * RESUBSCRIBE_PING_FACTOR;

        let clients = {
            let shared = Arc::clone(&shared);
            let sockets = sockets.clone();
            ResourcePool::new("socket-relay", 1, move |ctx: SlotContext<IrnClient<S>>| {
                build_client(sockets.clone(), Arc::clone(&shared), timeout, ctx)
            })
        };

        let upstream = {
            let clients = clients.downgrade();
            sockets.on_event(move |event| {
                if let PoolEvent::Started { .. } = event {
                    if let Some(clients) = clients.upgrade() {
                        clients.notify_external_restart();
                        clients.restart_errored(0);
                    }
                }
            })
        };

        let errors = {
            let shared = Arc::clone(&shared);
            clients.on_event(move |event| {
                if let PoolEvent::Errored { error, .. } = event {
                    shared.events.emit(&RelayEvent::Error {
                        message: error.to_string(),
                    });
                }
            })
        };

        let retry = clients.retry_errored(retry_backoff(ping_interval));

        Self {
            clients,
            shared,
            _wiring: vec![upstream, errors, retry],
        }
    }

    /// Topics replayed on reconnection.
    #[must_use]
    pub fn topics(&self) -> Vec<Topic> {
        self.shared.topics()
    }

    /// The underlying single-slot client pool.
    #[must_use]
    pub const fn clients(&self) -> &ResourcePool<IrnClient<S>> {
        &self.clients
    }

    /// Subscribes on the current client, then records `topic` for replay.
    ///
    /// # Errors
    ///
    /// Returns an error if no client can be acquired or the call fails.
    pub async fn subscribe(&self, topic: &Topic, cancel: &CancellationToken) -> RelayResult<String> {
        self.shared.ensure_open()?;
        let client = self.clients.acquire(0, cancel).await?;
        let id = client.subscribe(topic, cancel).await?;
        self.shared.remember(topic.clone());
        Ok(id)
    }

    /// Publishes on the current client.
    ///
    /// # Errors
    ///
    /// Returns an error if no client can be acquired or the call fails.
    pub async fn publish(
        &self,
        payload: &RelayPublishPayload,
        cancel: &CancellationToken,
    ) -> RelayResult<()> {
        self.shared.ensure_open()?;
        let client = self.clients.acquire(0, cancel).await?;
        client.publish(payload, cancel).await
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

    /// True while the pool is open but has no working client.
    pub(crate) fn is_failing(&self) -> bool {
        self.shared.closed_reason().is_none() && !self.clients.errored_indices().is_empty()
    }

    /// Closes the pool and its current client.
    pub fn close(&self, reason: &str) {
        if !self.shared.mark_closed(reason) {
            return;
        }
        debug!(reason, "closing socket relay");
        self.shared.events.emit(&RelayEvent::Close {
            reason: Some(reason.to_string()),
        });
        self.clients.close(reason);
    }
}

async fn build_client<S: RelaySocket>(
    sockets: ResourcePool<S>,
    shared: Arc<RelayShared>,
    timeout: Duration,
    ctx: SlotContext<IrnClient<S>>,
) -> Result<Resource<IrnClient<S>>, PoolError> {
    if let Some(reason) = shared.closed_reason() {
        return Err(PoolError::Closed(reason));
    }

    let (socket_index, socket) = sockets.take_random(&ctx.cancel).await?;
    debug!(socket = socket_index, "connecting relay client");

    let mut stack = DisposeStack::new();
    let client = Arc::new(IrnClient::with_call_timeout(socket, timeout));
    {
        let client = Arc::clone(&client);
        stack.defer(move || client.close("relay slot disposed"));
    }

    for topic in shared.topics() {
        resubscribe(&*client, &topic, timeout, ctx.index, &ctx.cancel).await?;
    }

    let forward = Arc::clone(&shared);
    stack.hold(client.on_request(Arc::new(move |message: &RelayMessage| {
        forward.events.claim(message)
    })));

    let handle = ctx.handle.clone();
    stack.hold(client.on_event(Arc::new(move |event: &RelayEvent| {
        debug!(?event, "relay client lost, restarting slot");
        handle.restart();
    })));

    // The socket may have dropped before the listener was in place.
    if let Some(reason) = client.closed_reason() {
        return Err(PoolError::construction(ctx.index, reason));
    }

    Ok(Resource::new(client, stack))
}

#[async_trait]
impl<S: RelaySocket> RelayHandle for SocketRelayPool<S> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::memory::{MemoryCircuit, MemoryRelay};
    use crate::relay::transport::Circuit;
    use crate::relay::types::IRN_SUBSCRIBE;
    use crate::relay::RelayError;

    const PING: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn subscribe_records_topic_after_success() {
        let relay = MemoryRelay::new();
        let circuit = MemoryCircuit::new(&relay);
        let pool = SocketRelayPool::new(circuit.sockets(), [], PING);
        let cancel = CancellationToken::new();

        pool.subscribe(&Topic::new("t1"), &cancel).await.unwrap();
        assert_eq!(pool.topics(), vec![Topic::new("t1")]);
    }

    #[tokio::test]
    async fn failed_subscribe_is_not_recorded() {
        let relay = MemoryRelay::new();
        relay.set_reject_subscriptions(true);
        let circuit = MemoryCircuit::new(&relay);
        let pool = SocketRelayPool::new(circuit.sockets(), [], PING);

        let result = pool
            .subscribe(&Topic::new("t1"), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(RelayError::Remote { .. })));
        assert!(pool.topics().is_empty());
    }

    #[tokio::test]
    async fn initial_topics_are_subscribed_on_construction() {
        let relay = MemoryRelay::new();
        let circuit = MemoryCircuit::new(&relay);
        let pool = SocketRelayPool::new(circuit.sockets(), [Topic::new("a"), Topic::new("b")], PING);

        pool.clients()
            .acquire(0, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(relay.subscribe_count(&Topic::new("a")), 1);
        assert_eq!(relay.subscribe_count(&Topic::new("b")), 1);
    }

    #[tokio::test]
    async fn restart_replays_each_topic_once() {
        let relay = MemoryRelay::new();
        let circuit = MemoryCircuit::new(&relay);
        let pool = SocketRelayPool::new(circuit.sockets(), [], PING);
        let cancel = CancellationToken::new();

        pool.subscribe(&Topic::new("t1"), &cancel).await.unwrap();
        pool.clients().restart(0);
        pool.clients().acquire(0, &cancel).await.unwrap();

        assert_eq!(relay.subscribe_count(&Topic::new("t1")), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_replay_is_retried_once_relay_accepts_again() {
        let relay = MemoryRelay::new();
        let circuit = MemoryCircuit::new(&relay);
        let pool = SocketRelayPool::new(circuit.sockets(), [], PING);
        let cancel = CancellationToken::new();
        let topic = Topic::new("t1");
        pool.subscribe(&topic, &cancel).await.unwrap();

        relay.set_reject_subscriptions(true);
        relay.disconnect_all();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(pool.clients().errored_indices(), vec![0]);
        assert!(pool.is_failing());

        relay.set_reject_subscriptions(false);
        tokio::time::sleep(Duration::from_secs(2)).await;
        pool.clients().acquire(0, &cancel).await.unwrap();
        assert_eq!(relay.subscribe_count(&topic), 2);
        assert!(!pool.is_failing());
    }

    #[tokio::test(start_paused = true)]
    async fn relay_calls_are_bounded_by_ping_multiple() {
        let relay = MemoryRelay::new();
        let circuit = MemoryCircuit::new(&relay);
        let pool = SocketRelayPool::new(circuit.sockets(), [], PING);
        let cancel = CancellationToken::new();
        pool.clients().acquire(0, &cancel).await.unwrap();

        relay.set_silent(true);
        let result = pool.subscribe(&Topic::new("t1"), &cancel).await;
        assert_eq!(result, Err(RelayError::Timeout(IRN_SUBSCRIBE.to_string())));
    }

    #[tokio::test]
    async fn close_fails_fast_and_emits_close() {
        let relay = MemoryRelay::new();
        let circuit = MemoryCircuit::new(&relay);
        let pool = SocketRelayPool::new(circuit.sockets(), [], PING);

        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        let _listener = pool.on_event(Arc::new(move |event: &RelayEvent| {
            events_clone.lock().unwrap().push(event.clone());
        }));

        pool.close("bye");
        let result = pool
            .subscribe(&Topic::new("t1"), &CancellationToken::new())
            .await;

        assert_eq!(result, Err(RelayError::Closed("bye".to_string())));
        assert_eq!(
            *events.lock().unwrap(),
            vec![RelayEvent::Close {
                reason: Some("bye".to_string())
            }]
        );
    }
}
