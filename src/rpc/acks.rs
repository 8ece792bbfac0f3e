//! Bounded, expiring window of processed inbound request ids.

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use tokio::time::Instant;

/// Request ids already processed by one session.
///
/// Relay delivery is at-least-once, so the same request may arrive twice.
/// The window keeps at most `capacity` ids; an id is forgotten when it is
/// evicted as least recently seen or once `ttl` has passed since it was
/// recorded.
#[derive(Debug)]
pub struct AckSet {
    seen: LruCache<u64, Instant>,
    ttl: Duration,
}

impl AckSet {
    /// Creates an empty window. A zero capacity is treated as one.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            seen: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            ttl,
        }
    }

    /// Records `id`. Returns false if it was already recorded and has not
    /// expired.
    pub fn insert(&mut self, id: u64) -> bool {
        let now = Instant::now();
        if let Some(recorded) = self.seen.get(&id) {
            if now.duration_since(*recorded) < self.ttl {
                return false;
            }
        }
        self.seen.put(id, now);
        true
    }

    /// Returns true if `id` is recorded and not expired.
    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        self.seen
            .peek(&id)
            .is_some_and(|recorded| recorded.elapsed() < self.ttl)
    }

    /// Number of recorded ids, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
