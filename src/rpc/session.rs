//! Encrypted JSON-RPC session bound to one relay topic and key.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::acks::AckSet;
use super::error::{RpcError, RpcResult};
use super::methods::{self, Direction, MethodOptions};
use super::types::{PendingRequest, RpcErrorObject, RpcPayload, RpcRequest, RpcResponse};
use crate::config::ClientConfig;
use crate::crypto::{decrypt_message, encrypt_message, SymmetricKey, Topic};
use crate::events::{ClaimRegistry, EventRegistry, Listener};
use crate::logging::ShortTopic;
use crate::relay::{RelayHandle, RelayMessage, RelayPublishPayload};

/// Future produced by a request handler.
pub type HandlerFuture = BoxFuture<'static, Result<Value, RpcErrorObject>>;

/// Handler offered every inbound request; returning `Some` takes it.
pub type RequestHandler = dyn Fn(&RpcRequest) -> Option<HandlerFuture> + Send + Sync;

/// Notifications emitted by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new inbound request is being dispatched.
    Request {
        /// Request id.
        id: u64,
        /// Method name.
        method: String,
    },
    /// A response was delivered to its waiter.
    Response {
        /// Id of the answered request.
        id: u64,
    },
    /// The session was closed.
    Close {
        /// Close reason.
        reason: String,
    },
}

/// Outcome of processing one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A request was dispatched and answered.
    Request {
        /// Request id.
        id: u64,
        /// Method name.
        method: String,
    },
    /// A request id already seen was suppressed.
    Duplicate(u64),
    /// A response was delivered to its waiter.
    Response(u64),
}

/// Session tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Number of inbound request ids remembered.
    pub ack_window: usize,
    /// How long an inbound request id is remembered.
    pub ack_ttl: Duration,
    /// Whether [`SecureRpcSession::close`] also closes the relay handle.
    pub owns_relay: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

impl SessionOptions {
    /// Takes the dedup window from a client config.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            ack_window: config.ack_window,
            ack_ttl: config.ack_ttl(),
            owns_relay: true,
        }
    }

    /// Leaves the relay handle open when the session closes.
    #[must_use]
    pub const fn with_shared_relay(mut self) -> Self {
        self.owns_relay = false;
        self
    }
}

struct Inner {
    topic: Topic,
    key: SymmetricKey,
    relay: Arc<dyn RelayHandle>,
    owns_relay: bool,
    acks: Mutex<AckSet>,
    waiters: Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>,
    parked: Mutex<HashMap<u64, oneshot::Receiver<RpcResponse>>>,
    handlers: ClaimRegistry<RpcRequest, HandlerFuture>,
    events: EventRegistry<SessionEvent>,
    closed: Mutex<Option<String>>,
    stop: CancellationToken,
    inbound: Mutex<Option<Listener>>,
}

fn request_options(method: &str) -> RpcResult<MethodOptions> {
    methods::options(method, Direction::Request)
        .ok_or_else(|| RpcError::UnknownMethod(method.to_string()))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Encrypts, publishes, decrypts, deduplicates and correlates JSON-RPC
/// traffic on one topic.
///
/// Inbound messages for the topic are claimed from the relay handle as soon
/// as the session is built and processed on their own task. Cloning is
/// cheap; clones share all state.
#[derive(Clone)]
pub struct SecureRpcSession {
    inner: Arc<Inner>,
}

impl fmt::Debug for SecureRpcSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureRpcSession")
            .field("topic", &ShortTopic(&self.inner.topic))
            .field("closed", &self.closed_reason())
            .finish_non_exhaustive()
    }
}

impl SecureRpcSession {
    /// Creates a session on `topic` encrypted with `key`.
    #[must_use]
    pub fn new(
        topic: Topic,
        key: SymmetricKey,
        relay: Arc<dyn RelayHandle>,
        options: SessionOptions,
    ) -> Self {
        let inner = Arc::new(Inner {
            topic,
            key,
            relay,
            owns_relay: options.owns_relay,
            acks: Mutex::new(AckSet::new(options.ack_window, options.ack_ttl)),
            waiters: Mutex::new(HashMap::new()),
            parked: Mutex::new(HashMap::new()),
            handlers: ClaimRegistry::new(),
            events: EventRegistry::new(),
            closed: Mutex::new(None),
            stop: CancellationToken::new(),
            inbound: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let listener = inner.relay.on_request(Arc::new(move |message: &RelayMessage| {
            let inner = weak.upgrade()?;
            if message.topic != inner.topic {
                return None;
            }
            let session = Self { inner };
            let text = message.message.clone();
            tokio::spawn(async move {
                if let Err(error) = session.on_message(&text).await {
                    warn!(topic = %ShortTopic(session.topic()), %error, "discarded inbound message");
                }
            });
            Some(true)
        }));
        *lock(&inner.inbound) = Some(listener);

        Self { inner }
    }

    /// Creates a session on the topic derived from `key`.
    #[must_use]
    pub fn from_key(key: SymmetricKey, relay: Arc<dyn RelayHandle>, options: SessionOptions) -> Self {
        Self::new(key.topic(), key, relay, options)
    }

    /// The session topic.
    #[must_use]
    pub fn topic(&self) -> &Topic {
        &self.inner.topic
    }

    /// The session key. Persist it to rebuild the session after a restart.
    #[must_use]
    pub fn key(&self) -> &SymmetricKey {
        &self.inner.key
    }

    /// The reason the session was closed, if it was.
    #[must_use]
    pub fn closed_reason(&self) -> Option<String> {
        lock(&self.inner.closed).clone()
    }

    /// Subscribes the relay to the session topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or the relay rejects the
    /// subscription.
    pub async fn subscribe(&self, cancel: &CancellationToken) -> RpcResult<String> {
        self.ensure_open()?;
        let id = self.inner.relay.subscribe(&self.inner.topic, cancel).await?;
        debug!(topic = %ShortTopic(&self.inner.topic), "session subscribed");
        Ok(id)
    }

    /// Registers a request handler.
    #[must_use = "dropping the guard deregisters the handler"]
    pub fn on_request(&self, handler: Arc<RequestHandler>) -> Listener {
        self.inner.handlers.register(handler)
    }

    /// Registers an async handler for one method.
    #[must_use = "dropping the guard deregisters the handler"]
    pub fn handle<F, Fut>(&self, method: impl Into<String>, handler: F) -> Listener
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcErrorObject>> + Send + 'static,
    {
        let method = method.into();
        self.on_request(Arc::new(move |request: &RpcRequest| {
            (request.method == method).then(|| handler(request.params.clone()).boxed())
        }))
    }

    /// Registers a session event listener.
    #[must_use = "dropping the guard deregisters the listener"]
    pub fn on_event(&self, f: impl Fn(&SessionEvent) + Send + Sync + 'static) -> Listener {
        self.inner.events.on(f)
    }

    /// Processes one relay `message` (base64 envelope) for this topic.
    ///
    /// # Errors
    ///
    /// Returns a decode error for undecryptable or malformed payloads,
    /// [`RpcError::UnknownMethod`] or [`RpcError::UnhandledMethod`] for
    /// requests nobody takes, and [`RpcError::UnhandledResponse`] for
    /// responses nobody waits for.
    pub async fn on_message(&self, message: &str) -> RpcResult<Inbound> {
        self.ensure_open()?;
        let plaintext = decrypt_message(&self.inner.key, message)?;
        match RpcPayload::parse(&plaintext)? {
            RpcPayload::Request(request) => self.handle_request(request).await,
            RpcPayload::Response(response) => self.handle_response(response),
        }
    }

    async fn handle_request(&self, request: RpcRequest) -> RpcResult<Inbound> {
        let id = request.id;
        // Recorded before dispatch so a redelivery during the handler is also suppressed.
        let fresh = lock(&self.inner.acks).insert(id);
        if !fresh {
            debug!(topic = %ShortTopic(&self.inner.topic), id, "suppressed duplicate request");
            return Ok(Inbound::Duplicate(id));
        }

        let Some(options) = methods::options(&request.method, Direction::Response) else {
            return Err(RpcError::UnknownMethod(request.method));
        };

        self.inner.events.emit(&SessionEvent::Request {
            id,
            method: request.method.clone(),
        });

        let Some(reply) = self.inner.handlers.claim(&request) else {
            let response = RpcResponse::failure(id, RpcErrorObject::method_not_found(&request.method));
            self.respond(&response, &request.method, options).await?;
            return Err(RpcError::UnhandledMethod(request.method));
        };

        let response = match reply.await {
            Ok(result) => RpcResponse::success(id, result),
            Err(error) => RpcResponse::failure(id, error),
        };
        self.respond(&response, &request.method, options).await?;
        Ok(Inbound::Request {
            id,
            method: request.method,
        })
    }

    fn handle_response(&self, response: RpcResponse) -> RpcResult<Inbound> {
        let id = response.id;
        let waiter = lock(&self.inner.waiters).remove(&id);
        let Some(waiter) = waiter else {
            return Err(RpcError::UnhandledResponse(id));
        };
        if waiter.send(response).is_err() {
            debug!(id, "response waiter already gone");
        }
        self.inner.events.emit(&SessionEvent::Response { id });
        Ok(Inbound::Response(id))
    }

    /// Publishes a request and waits for its response, at most the
    /// method's ttl counted from the call, publishing included.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Timeout`] if no response arrives in time,
    /// [`RpcError::Remote`] if the peer answers with an error, and relay or
    /// close errors otherwise.
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        cancel: &CancellationToken,
    ) -> RpcResult<Value> {
        let options = request_options(method)?;
        let deadline = Instant::now() + options.ttl_duration();
        let (id, receiver) = self
            .send_request(method, params, options, deadline, cancel)
            .await?;
        self.wait(id, method, receiver, deadline, cancel).await
    }

    /// Publishes a request and returns its receipt without waiting.
    ///
    /// A response arriving before [`wait_pending`](Self::wait_pending) is
    /// kept until the request expires.
    ///
    /// # Errors
    ///
    /// Returns an error if the method is unknown or publishing fails.
    pub async fn request_pending(
        &self,
        method: &str,
        params: Value,
        cancel: &CancellationToken,
    ) -> RpcResult<PendingRequest> {
        let options = request_options(method)?;
        let deadline = Instant::now() + options.ttl_duration();
        let (id, receiver) = self
            .send_request(method, params, options, deadline, cancel)
            .await?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let pending = PendingRequest::new(id, method, remaining);
        lock(&self.inner.parked).insert(id, receiver);

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let expired = lock(&inner.parked).remove(&id).is_some();
            if expired {
                lock(&inner.waiters).remove(&id);
                debug!(id, "dropped expired parked request");
            }
        });

        Ok(pending)
    }

    /// Waits for the response to a request published with
    /// [`request_pending`](Self::request_pending), possibly by an earlier
    /// process.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Timeout`] if the receipt has expired or expires
    /// while waiting.
    pub async fn wait_pending(
        &self,
        pending: &PendingRequest,
        cancel: &CancellationToken,
    ) -> RpcResult<Value> {
        self.ensure_open()?;
        let parked = lock(&self.inner.parked).remove(&pending.id);
        let receiver = if let Some(receiver) = parked {
            receiver
        } else {
            let (sender, receiver) = oneshot::channel();
            lock(&self.inner.waiters).insert(pending.id, sender);
            receiver
        };

        if pending.is_expired() {
            lock(&self.inner.waiters).remove(&pending.id);
            return Err(RpcError::Timeout {
                id: pending.id,
                method: pending.method.clone(),
            });
        }

        let deadline = Instant::now() + pending.remaining();
        self.wait(pending.id, &pending.method, receiver, deadline, cancel)
            .await
    }

    /// Publishes a request before `deadline`, returning its id and the
    /// receiver of its response.
    async fn send_request(
        &self,
        method: &str,
        params: Value,
        options: MethodOptions,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> RpcResult<(u64, oneshot::Receiver<RpcResponse>)> {
        self.ensure_open()?;
        let request = RpcRequest::new(method, params);
        let id = request.id;
        let plaintext = serde_json::to_vec(&request)?;

        // Registered before publishing so a fast response finds its waiter.
        let (sender, receiver) = oneshot::channel();
        lock(&self.inner.waiters).insert(id, sender);

        let publish = self.publish(&plaintext, options, cancel);
        let published = tokio::time::timeout_at(deadline, publish)
            .await
            .unwrap_or_else(|_| {
                warn!(
                    topic = %ShortTopic(&self.inner.topic),
                    id,
                    method,
                    "request publish timed out"
                );
                Err(RpcError::Timeout {
                    id,
                    method: method.to_string(),
                })
            });
        if let Err(error) = published {
            lock(&self.inner.waiters).remove(&id);
            return Err(self.closed_reason().map_or(error, RpcError::Closed));
        }
        debug!(topic = %ShortTopic(&self.inner.topic), id, method, "request published");
        Ok((id, receiver))
    }

    async fn wait(
        &self,
        id: u64,
        method: &str,
        receiver: oneshot::Receiver<RpcResponse>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> RpcResult<Value> {
        let outcome = tokio::select! {
            () = cancel.cancelled() => Err(RpcError::Cancelled),
            () = self.inner.stop.cancelled() => Err(self.closed_error()),
            received = tokio::time::timeout_at(deadline, receiver) => match received {
                Ok(Ok(response)) => response.into_result(),
                Ok(Err(_)) => Err(self.closed_error()),
                Err(_) => {
                    warn!(topic = %ShortTopic(&self.inner.topic), id, method, "request timed out");
                    Err(RpcError::Timeout {
                        id,
                        method: method.to_string(),
                    })
                }
            },
        };
        lock(&self.inner.waiters).remove(&id);
        outcome
    }

    /// Publishes `response`, giving up after the response ttl.
    async fn respond(
        &self,
        response: &RpcResponse,
        method: &str,
        options: MethodOptions,
    ) -> RpcResult<()> {
        let plaintext = serde_json::to_vec(response)?;
        let publish = self.publish(&plaintext, options, &self.inner.stop);
        tokio::time::timeout(options.ttl_duration(), publish)
            .await
            .unwrap_or_else(|_| {
                warn!(
                    topic = %ShortTopic(&self.inner.topic),
                    id = response.id,
                    method,
                    "response publish timed out"
                );
                Err(RpcError::Timeout {
                    id: response.id,
                    method: method.to_string(),
                })
            })
    }

    async fn publish(
        &self,
        plaintext: &[u8],
        options: MethodOptions,
        cancel: &CancellationToken,
    ) -> RpcResult<()> {
        let payload = RelayPublishPayload {
            topic: self.inner.topic.clone(),
            message: encrypt_message(&self.inner.key, plaintext)?,
            prompt: options.prompt,
            tag: options.tag,
            ttl: options.ttl,
        };
        self.inner.relay.publish(payload, cancel).await?;
        Ok(())
    }

    /// Closes the session: pending waits fail with [`RpcError::Closed`],
    /// inbound messages are no longer claimed, and the relay handle is
    /// closed if the session owns it. Idempotent.
    pub fn close(&self, reason: &str) {
        {
            let mut closed = lock(&self.inner.closed);
            if closed.is_some() {
                return;
            }
            *closed = Some(reason.to_string());
        }
        info!(topic = %ShortTopic(&self.inner.topic), reason, "closing session");

        self.inner.stop.cancel();
        lock(&self.inner.waiters).clear();
        lock(&self.inner.parked).clear();
        let inbound = lock(&self.inner.inbound).take();
        drop(inbound);

        self.inner.events.emit(&SessionEvent::Close {
            reason: reason.to_string(),
        });
        if self.inner.owns_relay {
            self.inner.relay.close(reason);
        }
    }

    fn ensure_open(&self) -> RpcResult<()> {
        match self.closed_reason() {
            Some(reason) => Err(RpcError::Closed(reason)),
            None => Ok(()),
        }
    }

    fn closed_error(&self) -> RpcError {
        RpcError::Closed(self.closed_reason().unwrap_or_else(|| "session closed".to_string()))
    }
}
