//! The relay surface consumed by RPC sessions.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::error::{RelayError, RelayResult};
use super::types::{EventListener, RelayEvents, RelayPublishPayload, RequestListener};
use crate::crypto::Topic;
use crate::events::Listener;
use crate::pool::{Backoff, PoolError, PoolResult};

/// Resubscribe calls during construction, and every relay call, are bounded
/// by this many ping intervals.
pub const RESUBSCRIBE_PING_FACTOR: u32 = 6;

/// First delay before an errored relay slot is rebuilt.
pub const RETRY_INITIAL_DELAY: Duration = Duration::from_millis(250);

/// Restart schedule of errored relay slots: doubling from
/// [`RETRY_INITIAL_DELAY`] up to one ping interval.
pub(crate) fn retry_backoff(ping_interval: Duration) -> Backoff {
    Backoff::new(RETRY_INITIAL_DELAY, ping_interval)
}

/// A subscribe/publish endpoint on the relay network.
///
/// Implemented by a single [`IrnClient`](super::IrnClient) connection and by
/// the self-healing [`SocketRelayPool`](super::SocketRelayPool) and
/// [`CircuitRelayPool`](super::CircuitRelayPool).
#[async_trait]
pub trait RelayHandle: Send + Sync {
    /// Subscribes to `topic`, returning the relay's subscription id.
    async fn subscribe(&self, topic: &Topic, cancel: &CancellationToken) -> RelayResult<String>;

    /// Publishes a payload. Failures are not retried.
    async fn publish(
        &self,
        payload: RelayPublishPayload,
        cancel: &CancellationToken,
    ) -> RelayResult<()>;

    /// Registers a listener for inbound messages.
    fn on_request(&self, listener: Arc<RequestListener>) -> Listener;

    /// Registers a listener for close and error events.
    fn on_event(&self, listener: Arc<EventListener>) -> Listener;

    /// Closes the handle. Later calls fail with [`RelayError::Closed`].
    fn close(&self, reason: &str);
}

/// State shared between a relay pool handle and its slot constructor.
#[derive(Debug, Default)]
pub(crate) struct RelayShared {
    topics: Mutex<BTreeSet<Topic>>,
    pub(crate) events: RelayEvents,
    closed: Mutex<Option<String>>,
}

impl RelayShared {
    pub(crate) fn with_topics(topics: impl IntoIterator<Item = Topic>) -> Self {
        Self {
            topics: Mutex::new(topics.into_iter().collect()),
            ..Self::default()
        }
    }

    pub(crate) fn topics(&self) -> Vec<Topic> {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub(crate) fn remember(&self, topic: Topic) {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic);
    }

    pub(crate) fn closed_reason(&self) -> Option<String> {
        self.closed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn ensure_open(&self) -> RelayResult<()> {
        self.closed_reason()
            .map_or(Ok(()), |reason| Err(RelayError::Closed(reason)))
    }

    /// Records the close reason; returns false if already closed.
    pub(crate) fn mark_closed(&self, reason: &str) -> bool {
        let mut closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
        if closed.is_some() {
            return false;
        }
        *closed = Some(reason.to_string());
        true
    }
}

/// Replays one subscription while a slot is being constructed.
pub(crate) async fn resubscribe<H: RelayHandle + ?Sized>(
    relay: &H,
    topic: &Topic,
    timeout: Duration,
    index: usize,
    cancel: &CancellationToken,
) -> PoolResult<()> {
    match tokio::time::timeout(timeout, relay.subscribe(topic, cancel)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(RelayError::Cancelled)) => Err(PoolError::Cancelled),
        Ok(Err(error)) => Err(PoolError::construction(index, error)),
        Err(_) => Err(PoolError::construction(
            index,
            RelayError::Timeout(format!("resubscribing to {topic}")),
        )),
    }
}
