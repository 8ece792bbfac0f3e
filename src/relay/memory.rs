//! In-memory relay network for tests.
//!
//! [`MemoryRelay`] behaves like an IRN relay: it answers `irn_subscribe` and
//! `irn_publish`, and delivers published messages to every *other*
//! connection subscribed to the topic. A message nobody else was subscribed
//! to is held and handed to the next subscriber. [`MemoryCircuit`] wraps it in the
//! circuit/socket-pool shape the relay pools expect.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::{RelayError, RelayResult};
use super::transport::{Circuit, RelaySocket};
use super::types::{
    payload_id, Frame, RelayMessage, RelayPublishPayload, IRN_PUBLISH, IRN_SUBSCRIBE,
    IRN_SUBSCRIPTION, METHOD_NOT_FOUND,
};
use crate::crypto::Topic;
use crate::events::Listener;
use crate::pool::{Backoff, DisposeStack, PoolError, Resource, ResourcePool, SlotContext};

struct Connection {
    tx: mpsc::UnboundedSender<String>,
    closed: CancellationToken,
}

#[derive(Default)]
struct BrokerState {
    next_connection: u64,
    connections: HashMap<u64, Connection>,
    subscriptions: HashMap<Topic, BTreeSet<u64>>,
    subscribe_counts: HashMap<Topic, usize>,
    published: Vec<RelayPublishPayload>,
    mailbox: HashMap<Topic, Vec<(Option<u64>, RelayPublishPayload)>>,
    silent: bool,
    offline: bool,
    reject_subscriptions: bool,
    reject_publishes: bool,
}

#[derive(Default)]
struct Broker {
    state: Mutex<BrokerState>,
}

/// A shared in-memory relay.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    broker: Arc<Broker>,
}

impl MemoryRelay {
    /// Creates an empty relay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new connection.
    #[must_use]
    pub fn connect(&self) -> MemorySocket {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        let id = {
            let mut state = self.broker.lock();
            let id = state.next_connection;
            state.next_connection += 1;
            state.connections.insert(
                id,
                Connection {
                    tx,
                    closed: closed.clone(),
                },
            );
            id
        };

        MemorySocket {
            id,
            broker: Arc::clone(&self.broker),
            rx: tokio::sync::Mutex::new(rx),
            closed,
        }
    }

    /// Number of `irn_subscribe` calls seen for `topic`.
    #[must_use]
    pub fn subscribe_count(&self, topic: &Topic) -> usize {
        self.broker
            .lock()
            .subscribe_counts
            .get(topic)
            .copied()
            .unwrap_or_default()
    }

    /// Every payload published so far.
    #[must_use]
    pub fn published(&self) -> Vec<RelayPublishPayload> {
        self.broker.lock().published.clone()
    }

    /// Number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.broker.lock().connections.len()
    }

    /// Drops every connection, as a relay restart would.
    pub fn disconnect_all(&self) {
        let connections = std::mem::take(&mut self.broker.lock().connections);
        for connection in connections.into_values() {
            connection.closed.cancel();
        }
    }

    /// Stops answering calls when `silent` is set.
    pub fn set_silent(&self, silent: bool) {
        self.broker.lock().silent = silent;
    }

    /// Makes [`MemoryCircuit`] socket construction fail while set.
    pub fn set_offline(&self, offline: bool) {
        self.broker.lock().offline = offline;
    }

    /// Whether the relay currently refuses circuit connections.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.broker.lock().offline
    }

    /// Answers `irn_subscribe` with an error while set.
    pub fn set_reject_subscriptions(&self, reject: bool) {
        self.broker.lock().reject_subscriptions = reject;
    }

    /// Answers `irn_publish` with an error while set.
    pub fn set_reject_publishes(&self, reject: bool) {
        self.broker.lock().reject_publishes = reject;
    }

    /// Delivers a payload to every subscriber, as if a third party had
    /// published it. Returns the number of deliveries.
    pub fn inject(&self, payload: &RelayPublishPayload) -> usize {
        self.broker.lock().deliver(None, payload)
    }
}

impl Broker {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self, connection: u64, frame: &str) -> RelayResult<()> {
        let mut state = self.lock();
        let (id, method, params) = match Frame::parse(frame)? {
            Frame::Request { id, method, params } => (id, method, params),
            Frame::Response { .. } => return Ok(()),
        };
        if state.silent {
            return Ok(());
        }

        let reply = match method.as_str() {
            IRN_SUBSCRIBE => state.subscribe(connection, id, &params),
            IRN_PUBLISH => state.publish(connection, id, params.clone()),
            other => Frame::error(id, METHOD_NOT_FOUND, &format!("unknown method {other}")),
        };
        state.send(connection, reply);
        if method == IRN_SUBSCRIBE {
            state.flush_mailbox(connection, &params);
        }
        Ok(())
    }
}

impl BrokerState {
    fn send(&self, connection: u64, frame: String) {
        if let Some(connection) = self.connections.get(&connection) {
            let _ = connection.tx.send(frame);
        }
    }

    fn subscribe(&mut self, connection: u64, id: u64, params: &Value) -> String {
        if self.reject_subscriptions {
            return Frame::error(id, -32000, "subscriptions rejected");
        }
        let Some(topic) = params.get("topic").and_then(Value::as_str) else {
            return Frame::error(id, -32602, "missing topic");
        };

        let topic = Topic::new(topic);
        *self.subscribe_counts.entry(topic.clone()).or_default() += 1;
        self.subscriptions
            .entry(topic.clone())
            .or_default()
            .insert(connection);
        Frame::result(id, &json!(format!("sub-{connection}-{topic}")))
    }

    fn publish(&mut self, connection: u64, id: u64, params: Value) -> String {
        if self.reject_publishes {
            return Frame::error(id, -32000, "publish rejected");
        }
        let payload: RelayPublishPayload = match serde_json::from_value(params) {
            Ok(payload) => payload,
            Err(error) => return Frame::error(id, -32602, &error.to_string()),
        };

        if self.deliver(Some(connection), &payload) == 0 {
            self.mailbox
                .entry(payload.topic.clone())
                .or_default()
                .push((Some(connection), payload.clone()));
        }
        self.published.push(payload);
        Frame::result(id, &Value::Bool(true))
    }

    fn deliver(&self, from: Option<u64>, payload: &RelayPublishPayload) -> usize {
        let Some(subscribers) = self.subscriptions.get(&payload.topic) else {
            return 0;
        };

        let mut delivered = 0;
        for &subscriber in subscribers {
            if Some(subscriber) == from || !self.connections.contains_key(&subscriber) {
                continue;
            }
            self.deliver_to(subscriber, payload);
            delivered += 1;
        }
        delivered
    }

    fn deliver_to(&self, subscriber: u64, payload: &RelayPublishPayload) {
        let params = json!({
            "id": format!("sub-{subscriber}-{}", payload.topic),
            "data": RelayMessage {
                topic: payload.topic.clone(),
                message: payload.message.clone(),
                published_at: Some(chrono::Utc::now().timestamp_millis()),
                tag: Some(payload.tag),
            },
        });
        self.send(
            subscriber,
            Frame::request(payload_id(), IRN_SUBSCRIPTION, &params),
        );
    }

    /// Hands messages nobody received yet to a new subscriber.
    fn flush_mailbox(&mut self, connection: u64, params: &Value) {
        let Some(topic) = params.get("topic").and_then(Value::as_str) else {
            return;
        };
        let topic = Topic::new(topic);
        if !self
            .subscriptions
            .get(&topic)
            .is_some_and(|s| s.contains(&connection))
        {
            return;
        }
        let Some(held) = self.mailbox.remove(&topic) else {
            return;
        };

        let (own, others): (Vec<_>, Vec<_>) =
            held.into_iter().partition(|(from, _)| *from == Some(connection));
        for (_, payload) in &others {
            self.deliver_to(connection, payload);
        }
        if !own.is_empty() {
            self.mailbox.insert(topic, own);
        }
    }

    fn remove(&mut self, connection: u64) {
        if let Some(removed) = self.connections.remove(&connection) {
            removed.closed.cancel();
        }
        for subscribers in self.subscriptions.values_mut() {
            subscribers.remove(&connection);
        }
    }
}

/// One connection to a [`MemoryRelay`].
pub struct MemorySocket {
    id: u64,
    broker: Arc<Broker>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    closed: CancellationToken,
}

impl MemorySocket {
    /// Fires once the connection is closed from either side.
    #[must_use]
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Closes the connection without waiting.
    pub fn shutdown(&self) {
        self.closed.cancel();
        self.broker.lock().remove(self.id);
    }
}

#[async_trait]
impl RelaySocket for MemorySocket {
    async fn send(&self, frame: String) -> RelayResult<()> {
        if self.closed.is_cancelled() {
            return Err(RelayError::Closed("socket closed".to_string()));
        }
        self.broker.handle(self.id, &frame)
    }

    async fn recv(&self) -> Option<RelayResult<String>> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            () = self.closed.cancelled() => None,
            frame = rx.recv() => frame.map(Ok),
        }
    }
}

/// A circuit whose single socket slot connects to a [`MemoryRelay`].
///
/// The socket slot restarts itself when its connection drops, and retries
/// with backoff while the relay is offline.
pub struct MemoryCircuit {
    sockets: ResourcePool<MemorySocket>,
    _retry: Listener,
}

impl MemoryCircuit {
    /// Creates the circuit and starts connecting.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(relay: &MemoryRelay) -> Self {
        let relay = relay.clone();
        let sockets = ResourcePool::new("memory-sockets", 1, move |ctx: SlotContext<MemorySocket>| {
            let relay = relay.clone();
            async move {
                if relay.is_offline() {
                    return Err(PoolError::construction(ctx.index, "relay offline"));
                }

                let socket = Arc::new(relay.connect());
                let mut stack = DisposeStack::new();
                {
                    let socket = Arc::clone(&socket);
                    stack.defer(move || socket.shutdown());
                }

                let closed = socket.closed_token();
                let handle = ctx.handle.clone();
                let watcher = tokio::spawn(async move {
                    closed.cancelled().await;
                    handle.restart();
                });
                stack.defer(move || watcher.abort());

                Ok(Resource::new(socket, stack))
            }
        });
        let retry = sockets.retry_errored(Backoff::new(
            Duration::from_millis(50),
            Duration::from_secs(1),
        ));
        Self {
            sockets,
            _retry: retry,
        }
    }
}

impl Circuit for MemoryCircuit {
    type Socket = MemorySocket;

    fn sockets(&self) -> ResourcePool<MemorySocket> {
        self.sockets.clone()
    }
}

/// Builds a pool of `capacity` circuits over `relay`.
///
/// Must be called from within a tokio runtime.
#[must_use]
pub fn circuit_pool(relay: &MemoryRelay, capacity: usize) -> ResourcePool<MemoryCircuit> {
    let relay = relay.clone();
    ResourcePool::new("memory-circuits", capacity, move |_ctx: SlotContext<MemoryCircuit>| {
        let relay = relay.clone();
        async move { Ok(Resource::bare(Arc::new(MemoryCircuit::new(&relay)))) }
    })
}
