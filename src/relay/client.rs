//! IRN JSON-RPC client over a single relay connection.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use super::error::{RelayError, RelayResult};
use super::handle::RelayHandle;
use super::transport::RelaySocket;
use super::types::{
    payload_id, EventListener, Frame, RelayEvent, RelayEvents, RelayPublishPayload,
    RequestListener, SubscriptionParams, INVALID_PARAMS, IRN_PUBLISH, IRN_SUBSCRIBE,
    IRN_SUBSCRIPTION, METHOD_NOT_FOUND,
};
use crate::crypto::Topic;
use crate::events::Listener;
use crate::logging::ShortTopic;

type Waiter = oneshot::Sender<RelayResult<Value>>;

/// Bound on a single relay call when the owner does not pick one.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Default)]
struct CallState {
    pending: HashMap<u64, Waiter>,
    closed: Option<String>,
}

struct ClientInner<S> {
    socket: Arc<S>,
    state: Mutex<CallState>,
    events: RelayEvents,
    stop: CancellationToken,
    call_timeout: Duration,
}

/// A relay-protocol client bound to one [`RelaySocket`].
///
/// Calls are correlated with their responses by JSON-RPC id. Inbound
/// `irn_subscription` deliveries are offered to the request listeners and
/// acknowledged with the claiming listener's answer.
///
/// The client never reconnects. When the socket closes or fails it emits
/// [`RelayEvent::Close`] or [`RelayEvent::Error`], fails every pending call,
/// and stays closed; the owning pool replaces it.
///
/// A call the relay never answers fails with [`RelayError::Timeout`] once
/// the client's call timeout elapses.
pub struct IrnClient<S: RelaySocket> {
    inner: Arc<ClientInner<S>>,
    _reader: DropGuard,
}

impl<S: RelaySocket> fmt::Debug for IrnClient<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("IrnClient")
            .field("pending", &state.pending.len())
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

impl<S: RelaySocket> IrnClient<S> {
    /// Wraps `socket` and starts reading from it, bounding calls by
    /// [`DEFAULT_CALL_TIMEOUT`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(socket: Arc<S>) -> Self {
        Self::with_call_timeout(socket, DEFAULT_CALL_TIMEOUT)
    }

    /// Wraps `socket` with calls bounded by `call_timeout`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_call_timeout(socket: Arc<S>, call_timeout: Duration) -> Self {
        let stop = CancellationToken::new();
        let inner = Arc::new(ClientInner {
            socket,
            state: Mutex::new(CallState::default()),
            events: RelayEvents::new(),
            stop: stop.clone(),
            call_timeout,
        });
        tokio::spawn(ClientInner::read_loop(Arc::clone(&inner)));
        Self {
            inner,
            _reader: stop.drop_guard(),
        }
    }

    /// Subscribes to `topic`, returning the relay's subscription id.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails, is cancelled, or the relay
    /// answers with something other than a subscription id.
    pub async fn subscribe(&self, topic: &Topic, cancel: &CancellationToken) -> RelayResult<String> {
        let result = self
            .inner
            .call(IRN_SUBSCRIBE, json!({ "topic": topic }), cancel)
            .await?;
        match result {
            Value::String(id) => {
                debug!(topic = %ShortTopic(topic), "subscribed");
                Ok(id)
            }
            other => Err(RelayError::Subscription(format!(
                "expected subscription id, got {other}"
            ))),
        }
    }

    /// Publishes a payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails, is cancelled, or the relay does
    /// not acknowledge with `true`.
    pub async fn publish(
        &self,
        payload: &RelayPublishPayload,
        cancel: &CancellationToken,
    ) -> RelayResult<()> {
        let params =
            serde_json::to_value(payload).map_err(|e| RelayError::Publish(e.to_string()))?;
        match self.inner.call(IRN_PUBLISH, params, cancel).await? {
            Value::Bool(true) => Ok(()),
            other => Err(RelayError::Publish(format!("relay answered {other}"))),
        }
    }

    /// Registers a listener for inbound subscription deliveries.
    #[must_use = "dropping the guard deregisters the listener"]
    pub fn on_request(&self, listener: Arc<RequestListener>) -> Listener {
        self.inner.events.on_request(listener)
    }

    /// Registers a listener for close and error events.
    #[must_use = "dropping the guard deregisters the listener"]
    pub fn on_event(&self, listener: Arc<EventListener>) -> Listener {
        self.inner.events.on_event(listener)
    }

    /// Returns the close reason once the client has closed.
    #[must_use]
    pub fn closed_reason(&self) -> Option<String> {
        self.inner.lock().closed.clone()
    }

    /// Stops reading the socket. Pending calls fail with
    /// [`RelayError::Closed`]; the socket itself stays open for its pool.
    pub fn close(&self, reason: &str) {
        if !self.inner.shut_down(reason) {
            return;
        }
        self.inner.events.emit(&RelayEvent::Close {
            reason: Some(reason.to_string()),
        });
    }
}

impl<S> ClientInner<S> {
    fn lock(&self) -> MutexGuard<'_, CallState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks the client closed and fails pending calls. Returns false if it
    /// was already closed.
    fn shut_down(&self, reason: &str) -> bool {
        let pending = {
            let mut state = self.lock();
            if state.closed.is_some() {
                return false;
            }
            state.closed = Some(reason.to_string());
            std::mem::take(&mut state.pending)
        };
        self.stop.cancel();

        for (_, waiter) in pending {
            let _ = waiter.send(Err(RelayError::Closed(reason.to_string())));
        }
        true
    }
}

impl<S: RelaySocket> ClientInner<S> {
    async fn call(
        &self,
        method: &str,
        params: Value,
        cancel: &CancellationToken,
    ) -> RelayResult<Value> {
        let id = payload_id();
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.lock();
            if let Some(reason) = &state.closed {
                return Err(RelayError::Closed(reason.clone()));
            }
            state.pending.insert(id, tx);
        }

        let deadline = Instant::now() + self.call_timeout;
        let exchange = async {
            self.socket.send(Frame::request(id, method, &params)).await?;
            tokio::select! {
                () = cancel.cancelled() => Err(RelayError::Cancelled),
                reply = rx => reply.unwrap_or_else(|_| {
                    Err(RelayError::Closed("client dropped".to_string()))
                }),
            }
        };

        let result = tokio::time::timeout_at(deadline, exchange)
            .await
            .unwrap_or_else(|_| {
                warn!(method, timeout = ?self.call_timeout, "relay call timed out");
                Err(RelayError::Timeout(method.to_string()))
            });
        if result.is_err() {
            self.lock().pending.remove(&id);
        }
        result
    }

    async fn read_loop(self: Arc<Self>) {
        loop {
            let next = tokio::select! {
                () = self.stop.cancelled() => return,
                next = self.socket.recv() => next,
            };

            match next {
                Some(Ok(text)) => self.handle_frame(&text).await,
                Some(Err(error)) => {
                    warn!(error = %error, "relay connection failed");
                    if self.shut_down(&error.to_string()) {
                        self.events.emit(&RelayEvent::Error {
                            message: error.to_string(),
                        });
                    }
                    return;
                }
                None => {
                    debug!("relay connection closed by peer");
                    if self.shut_down("connection closed") {
                        self.events.emit(&RelayEvent::Close { reason: None });
                    }
                    return;
                }
            }
        }
    }

    async fn handle_frame(&self, text: &str) {
        match Frame::parse(text) {
            Ok(Frame::Response { id, result }) => {
                let waiter = self.lock().pending.remove(&id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(result);
                    }
                    None => debug!(id, "response for unknown call"),
                }
            }
            Ok(Frame::Request { id, method, params }) => {
                let reply = self.answer(id, &method, params);
                if let Err(error) = self.socket.send(reply).await {
                    warn!(id, error = %error, "failed to acknowledge relay request");
                }
            }
            Err(error) => warn!(error = %error, "dropping relay frame"),
        }
    }

    fn answer(&self, id: u64, method: &str, params: Value) -> String {
        if method != IRN_SUBSCRIPTION {
            return Frame::error(id, METHOD_NOT_FOUND, &format!("unsupported method {method}"));
        }

        let params: SubscriptionParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(error) => return Frame::error(id, INVALID_PARAMS, &error.to_string()),
        };

        match self.events.claim(&params.data) {
            Some(ack) => Frame::result(id, &Value::Bool(ack)),
            None => {
                debug!(
                    topic = %ShortTopic(&params.data.topic),
                    "no listener claimed relay message"
                );
                Frame::error(
                    id,
                    METHOD_NOT_FOUND,
                    &format!("no handler for topic {}", params.data.topic),
                )
            }
        }
    }
}

#[async_trait]
impl<S: RelaySocket> RelayHandle for IrnClient<S> {
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
    use crate::relay::memory::MemoryRelay;
    use crate::relay::types::RelayMessage;

    fn payload(topic: &str, message: &str) -> RelayPublishPayload {
        RelayPublishPayload {
            topic: Topic::new(topic),
            message: message.to_string(),
            prompt: false,
            tag: 1114,
            ttl: 30,
        }
    }

    #[tokio::test]
    async fn subscribe_returns_subscription_id() {
        let relay = MemoryRelay::new();
        let client = IrnClient::new(Arc::new(relay.connect()));

        let id = client
            .subscribe(&Topic::new("t1"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!id.is_empty());
        assert_eq!(relay.subscribe_count(&Topic::new("t1")), 1);
    }

    #[tokio::test]
    async fn published_message_reaches_other_subscriber() {
        let relay = MemoryRelay::new();
        let alice = IrnClient::new(Arc::new(relay.connect()));
        let bob = IrnClient::new(Arc::new(relay.connect()));
        let cancel = CancellationToken::new();

        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let _listener = bob.on_request(Arc::new(move |message: &RelayMessage| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(message.clone());
            }
            Some(true)
        }));

        bob.subscribe(&Topic::new("t1"), &cancel).await.unwrap();
        alice.publish(&payload("t1", "hello"), &cancel).await.unwrap();

        let delivered = rx.await.unwrap();
        assert_eq!(delivered.topic, Topic::new("t1"));
        assert_eq!(delivered.message, "hello");
    }

    #[tokio::test]
    async fn publisher_does_not_receive_its_own_message() {
        let relay = MemoryRelay::new();
        let alice = IrnClient::new(Arc::new(relay.connect()));
        let cancel = CancellationToken::new();

        let seen = Arc::new(Mutex::new(0));
        let seen_clone = Arc::clone(&seen);
        let _listener = alice.on_request(Arc::new(move |_: &RelayMessage| {
            *seen_clone.lock().unwrap() += 1;
            Some(true)
        }));

        alice.subscribe(&Topic::new("t1"), &cancel).await.unwrap();
        alice.publish(&payload("t1", "echo?"), &cancel).await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(*seen.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn peer_close_fails_calls_and_emits_close() {
        let relay = MemoryRelay::new();
        let client = IrnClient::new(Arc::new(relay.connect()));

        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let _listener = client.on_event(Arc::new(move |event: &RelayEvent| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(event.clone());
            }
        }));

        relay.disconnect_all();
        assert_eq!(rx.await.unwrap(), RelayEvent::Close { reason: None });

        let result = client
            .subscribe(&Topic::new("t1"), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(RelayError::Closed(_))));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let relay = MemoryRelay::new();
        let client = IrnClient::new(Arc::new(relay.connect()));

        let closes = Arc::new(Mutex::new(Vec::new()));
        let closes_clone = Arc::clone(&closes);
        let _listener = client.on_event(Arc::new(move |event: &RelayEvent| {
            closes_clone.lock().unwrap().push(event.clone());
        }));

        client.close("done");
        client.close("again");

        assert_eq!(client.closed_reason().as_deref(), Some("done"));
        assert_eq!(closes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_call_fails_fast() {
        let relay = MemoryRelay::new();
        relay.set_silent(true);
        let client = IrnClient::new(Arc::new(relay.connect()));

        let cancel = CancellationToken::new();
        let topic = Topic::new("t1");
        let call = client.subscribe(&topic, &cancel);
        cancel.cancel();
        assert_eq!(call.await, Err(RelayError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_call_times_out() {
        let relay = MemoryRelay::new();
        relay.set_silent(true);
        let client =
            IrnClient::with_call_timeout(Arc::new(relay.connect()), Duration::from_secs(5));

        let started = Instant::now();
        let result = client
            .publish(&payload("t1", "lost"), &CancellationToken::new())
            .await;

        assert_eq!(result, Err(RelayError::Timeout(IRN_PUBLISH.to_string())));
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(client.inner.lock().pending.len(), 0);
    }

    #[tokio::test]
    async fn rejected_subscription_surfaces_remote_error() {
        let relay = MemoryRelay::new();
        relay.set_reject_subscriptions(true);
        let client = IrnClient::new(Arc::new(relay.connect()));

        let result = client
            .subscribe(&Topic::new("t1"), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(RelayError::Remote { .. })));
    }
}
