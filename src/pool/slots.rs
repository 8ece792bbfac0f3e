//! Generic pool of lazily constructed, independently restartable slots.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::future::BoxFuture;
use rand::Rng;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use super::backoff::Backoff;
use super::disposer::DisposeStack;
use super::error::{PoolError, PoolResult};
use super::types::{PoolEvent, Resource, SlotContext, SlotHandle, SlotState};
use crate::events::{EventRegistry, Listener};

type Constructor<T> =
    Arc<dyn Fn(SlotContext<T>) -> BoxFuture<'static, PoolResult<Resource<T>>> + Send + Sync>;

/// Mutable ownership record of one slot.
struct SlotGuard {
    /// Token of the current construction and resource lifetime.
    token: CancellationToken,
    /// Cleanup stack of the live resource.
    disposer: Option<DisposeStack>,
}

struct Slot<T> {
    state: watch::Sender<SlotState<T>>,
    guard: Mutex<SlotGuard>,
}

impl<T> Slot<T> {
    fn lock(&self) -> MutexGuard<'_, SlotGuard> {
        self.guard
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

pub(crate) struct Inner<T> {
    label: &'static str,
    slots: Vec<Slot<T>>,
    constructor: Constructor<T>,
    /// Bumped by every external restart signal.
    epoch: AtomicU64,
    last_update: Mutex<Option<Instant>>,
    closed: Mutex<Option<String>>,
    shutdown: CancellationToken,
    revision: watch::Sender<u64>,
    events: EventRegistry<PoolEvent>,
}

/// A bounded set of lazily constructed, independently restartable resources.
///
/// Each slot runs its own construction loop. A failed attempt is retried
/// transparently when an external restart signal arrived while it was in
/// flight (the failure is stale: a dependency was being rebuilt anyway);
/// otherwise the error is parked in the slot and surfaced to
/// [`acquire`](Self::acquire) until someone calls [`restart`](Self::restart).
///
/// Cloning the handle is cheap. The pool shuts down when the last handle is
/// dropped or when [`close`](Self::close) is called; either way every live
/// resource's [`DisposeStack`] runs exactly once.
pub struct ResourcePool<T> {
    inner: Arc<Inner<T>>,
    _shutdown: Arc<DropGuard>,
}

impl<T> Clone for ResourcePool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _shutdown: Arc::clone(&self._shutdown),
        }
    }
}

impl<T> fmt::Debug for ResourcePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let states: Vec<_> = self
            .inner
            .slots
            .iter()
            .map(|slot| format!("{:?}", *slot.state.borrow()))
            .collect();
        f.debug_struct("ResourcePool")
            .field("label", &self.inner.label)
            .field("slots", &states)
            .finish_non_exhaustive()
    }
}

/// Non-owning handle to a [`ResourcePool`].
///
/// Event wiring between pools holds this instead of a full handle so that a
/// listener registered on one pool never keeps another pool alive.
pub struct WeakResourcePool<T> {
    inner: Weak<Inner<T>>,
    shutdown: Weak<DropGuard>,
}

impl<T> Clone for WeakResourcePool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
            shutdown: Weak::clone(&self.shutdown),
        }
    }
}

impl<T> fmt::Debug for WeakResourcePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakResourcePool")
            .field("alive", &(self.shutdown.strong_count() > 0))
            .finish()
    }
}

impl<T> WeakResourcePool<T> {
    /// Returns a full handle if some other handle still keeps the pool alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<ResourcePool<T>> {
        Some(ResourcePool {
            inner: self.inner.upgrade()?,
            _shutdown: self.shutdown.upgrade()?,
        })
    }
}

impl<T: Send + Sync + 'static> ResourcePool<T> {
    /// Creates a pool of `capacity` slots and starts constructing all of them.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<F, Fut>(label: &'static str, capacity: usize, constructor: F) -> Self
    where
        F: Fn(SlotContext<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PoolResult<Resource<T>>> + Send + 'static,
    {
        let shutdown = CancellationToken::new();
        let slots = (0..capacity)
            .map(|_| Slot {
                state: watch::Sender::new(SlotState::Building),
                guard: Mutex::new(SlotGuard {
                    token: shutdown.child_token(),
                    disposer: None,
                }),
            })
            .collect();

        let constructor: Constructor<T> = Arc::new(move |ctx| Box::pin(constructor(ctx)));

        let inner = Arc::new(Inner {
            label,
            slots,
            constructor,
            epoch: AtomicU64::new(0),
            last_update: Mutex::new(None),
            closed: Mutex::new(None),
            shutdown: shutdown.clone(),
            revision: watch::Sender::new(0),
            events: EventRegistry::new(),
        });

        for (index, slot) in inner.slots.iter().enumerate() {
            let token = slot.lock().token.clone();
            tokio::spawn(Inner::construct(Arc::clone(&inner), index, token));
        }

        Self {
            inner,
            _shutdown: Arc::new(shutdown.drop_guard()),
        }
    }

    /// Creates a non-owning handle to this pool.
    #[must_use]
    pub fn downgrade(&self) -> WeakResourcePool<T> {
        WeakResourcePool {
            inner: Arc::downgrade(&self.inner),
            shutdown: Arc::downgrade(&self._shutdown),
        }
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }

    /// Returns the resource of slot `index`, waiting while it is being built.
    ///
    /// # Errors
    ///
    /// Fails with the slot's parked error, with [`PoolError::Cancelled`] when
    /// `cancel` fires first, or with [`PoolError::Closed`] after shutdown.
    pub async fn acquire(&self, index: usize, cancel: &CancellationToken) -> PoolResult<Arc<T>> {
        let slot = self
            .inner
            .slots
            .get(index)
            .ok_or(PoolError::OutOfRange(index))?;
        let mut state = slot.state.subscribe();

        loop {
            if let Some(reason) = self.inner.closed_reason() {
                return Err(PoolError::Closed(reason));
            }

            let current = state.borrow_and_update().clone();
            match current {
                SlotState::Ready(value) => return Ok(value),
                SlotState::Errored(error) => return Err(error),
                SlotState::Building => {}
            }

            tokio::select! {
                () = cancel.cancelled() => return Err(PoolError::Cancelled),
                changed = state.changed() => {
                    if changed.is_err() {
                        return Err(PoolError::Closed("pool dropped".to_string()));
                    }
                }
            }
        }
    }

    /// Returns a uniformly random ready resource with its slot index.
    ///
    /// Waits while no slot is ready yet but some are still building.
    ///
    /// # Errors
    ///
    /// Fails with [`PoolError::Exhausted`] when every slot is errored, with
    /// [`PoolError::Cancelled`] when `cancel` fires, or with
    /// [`PoolError::Closed`] after shutdown.
    pub async fn take_random(&self, cancel: &CancellationToken) -> PoolResult<(usize, Arc<T>)> {
        let mut revision = self.inner.revision.subscribe();

        loop {
            if let Some(reason) = self.inner.closed_reason() {
                return Err(PoolError::Closed(reason));
            }

            let mut ready = Vec::new();
            let mut errored = 0;
            for (index, slot) in self.inner.slots.iter().enumerate() {
                match &*slot.state.borrow() {
                    SlotState::Ready(value) => ready.push((index, Arc::clone(value))),
                    SlotState::Errored(_) => errored += 1,
                    SlotState::Building => {}
                }
            }

            if !ready.is_empty() {
                let pick = rand::thread_rng().gen_range(0..ready.len());
                return Ok(ready.swap_remove(pick));
            }
            if errored == self.inner.slots.len() {
                return Err(PoolError::Exhausted);
            }

            tokio::select! {
                () = cancel.cancelled() => return Err(PoolError::Cancelled),
                changed = revision.changed() => {
                    if changed.is_err() {
                        return Err(PoolError::Closed("pool dropped".to_string()));
                    }
                }
            }
        }
    }

    /// Returns the resource of slot `index` without waiting.
    #[must_use]
    pub fn try_get(&self, index: usize) -> Option<Arc<T>> {
        let slot = self.inner.slots.get(index)?;
        let state = slot.state.borrow();
        match &*state {
            SlotState::Ready(value) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    /// Returns a snapshot of slot `index`.
    #[must_use]
    pub fn state(&self, index: usize) -> Option<SlotState<T>> {
        self.inner
            .slots
            .get(index)
            .map(|slot| slot.state.borrow().clone())
    }

    /// Indices of slots parked in an error state.
    #[must_use]
    pub fn errored_indices(&self) -> Vec<usize> {
        self.inner
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state.borrow().is_errored())
            .map(|(index, _)| index)
            .collect()
    }

    /// Discards slot `index`'s resource (if any) and schedules reconstruction.
    pub fn restart(&self, index: usize) {
        Inner::restart(&self.inner, index);
    }

    /// Restarts slot `index` only if it is parked in an error state.
    pub fn restart_errored(&self, index: usize) {
        let errored = self
            .inner
            .slots
            .get(index)
            .is_some_and(|slot| slot.state.borrow().is_errored());
        if errored {
            Inner::restart(&self.inner, index);
        }
    }

    /// Restarts slots that park a fresh error after a delay from `backoff`.
    ///
    /// Consecutive failures lengthen the delay; any successful start resets
    /// it. A slot that recovered some other way before its delay elapsed is
    /// left alone. Dropping the guard stops scheduling retries.
    #[must_use = "dropping the guard stops the retries"]
    pub fn retry_errored(&self, backoff: Backoff) -> Listener {
        let pool = self.downgrade();
        let failures = Arc::new(AtomicU32::new(0));
        let label = self.inner.label;
        let stop = CancellationToken::new();
        // Cancelled when the registry drops the closure.
        let stop_guard = stop.clone().drop_guard();
        self.on_event(move |event| {
            let _ = &stop_guard;
            match event {
                PoolEvent::Started { .. } => failures.store(0, Ordering::SeqCst),
                PoolEvent::Errored { index, .. } => {
                    let delay = backoff.delay(failures.fetch_add(1, Ordering::SeqCst));
                    let pool = pool.clone();
                    let stop = stop.clone();
                    let index = *index;
                    debug!(pool = label, index, ?delay, "scheduling slot retry");
                    tokio::spawn(async move {
                        tokio::select! {
                            () = stop.cancelled() => {}
                            () = tokio::time::sleep(delay) => {
                                if let Some(pool) = pool.upgrade() {
                                    pool.restart_errored(index);
                                }
                            }
                        }
                    });
                }
                _ => {}
            }
        })
    }

    /// Records that a dependency was restarted.
    ///
    /// Construction attempts that started before this call and then fail
    /// are retried immediately instead of surfacing their error.
    pub fn notify_external_restart(&self) {
        self.inner.notify_external_restart();
    }

    /// Time of the most recent external restart signal.
    #[must_use]
    pub fn last_external_restart(&self) -> Option<Instant> {
        *self
            .inner
            .last_update
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Registers a lifecycle listener.
    #[must_use = "dropping the guard deregisters the listener"]
    pub fn on_event(&self, f: impl Fn(&PoolEvent) + Send + Sync + 'static) -> Listener {
        self.inner.events.on(f)
    }

    /// Returns the close reason once the pool has been closed.
    #[must_use]
    pub fn closed_reason(&self) -> Option<String> {
        self.inner.closed_reason()
    }

    /// Closes the pool, releasing every resource.
    ///
    /// In-flight and future constructions fail fast with
    /// [`PoolError::Closed`]. Closing twice keeps the first reason.
    pub fn close(&self, reason: &str) {
        self.inner.close(reason);
    }
}

impl<T: Send + Sync + 'static> Inner<T> {
    fn closed_reason(&self) -> Option<String> {
        self.closed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    fn notify_external_restart(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *self
            .last_update
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Instant::now());
        debug!(pool = self.label, "external restart signal");
    }

    pub(crate) fn restart(this: &Arc<Self>, index: usize) {
        let Some(slot) = this.slots.get(index) else {
            return;
        };
        if this.closed_reason().is_some() {
            return;
        }

        let (token, previous) = {
            let mut guard = slot.lock();
            guard.token.cancel();
            guard.token = this.shutdown.child_token();
            slot.state.send_replace(SlotState::Building);
            (guard.token.clone(), guard.disposer.take())
        };

        debug!(pool = this.label, index, "restarting slot");
        if let Some(disposer) = previous {
            disposer.dispose();
        }
        this.bump_revision();
        this.events.emit(&PoolEvent::Restarting { index });

        tokio::spawn(Self::construct(Arc::clone(this), index, token));
    }

    fn close(&self, reason: &str) {
        {
            let mut closed = self
                .closed
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if closed.is_some() {
                return;
            }
            *closed = Some(reason.to_string());
        }

        debug!(pool = self.label, reason, "closing pool");
        self.shutdown.cancel();

        for slot in &self.slots {
            let previous = {
                let mut guard = slot.lock();
                guard.token.cancel();
                slot.state
                    .send_replace(SlotState::Errored(PoolError::Closed(reason.to_string())));
                guard.disposer.take()
            };
            if let Some(disposer) = previous {
                disposer.dispose();
            }
        }

        self.bump_revision();
        self.events.emit(&PoolEvent::Closed {
            reason: reason.to_string(),
        });
    }

    /// Construction loop of one slot; exits on success, fresh failure, or
    /// when `token` is cancelled.
    async fn construct(this: Arc<Self>, index: usize, token: CancellationToken) {
        let slot = &this.slots[index];

        loop {
            if let Some(reason) = this.closed_reason() {
                this.park_error(slot, index, &token, PoolError::Closed(reason));
                return;
            }

            let started = this.epoch.load(Ordering::SeqCst);
            let ctx = SlotContext {
                index,
                cancel: token.clone(),
                handle: SlotHandle {
                    pool: Arc::downgrade(&this),
                    index,
                },
            };

            let attempt = (this.constructor)(ctx);
            let result = tokio::select! {
                () = token.cancelled() => return,
                result = attempt => result,
            };

            match result {
                Ok(Resource { value, disposer }) => {
                    {
                        let mut guard = slot.lock();
                        if token.is_cancelled() {
                            drop(guard);
                            disposer.dispose();
                            return;
                        }
                        guard.disposer = Some(disposer);
                        slot.state.send_replace(SlotState::Ready(value));
                    }
                    debug!(pool = this.label, index, "slot started");
                    this.bump_revision();
                    this.events.emit(&PoolEvent::Started { index });
                    return;
                }
                Err(error) if this.epoch.load(Ordering::SeqCst) > started => {
                    debug!(
                        pool = this.label,
                        index,
                        error = %error,
                        "stale construction failure, retrying"
                    );
                }
                Err(error) => {
                    warn!(pool = this.label, index, error = %error, "slot construction failed");
                    this.park_error(slot, index, &token, error);
                    return;
                }
            }
        }
    }

    fn park_error(&self, slot: &Slot<T>, index: usize, token: &CancellationToken, error: PoolError) {
        {
            let _guard = slot.lock();
            if token.is_cancelled() && !matches!(error, PoolError::Closed(_)) {
                return;
            }
            slot.state.send_replace(SlotState::Errored(error.clone()));
        }
        self.bump_revision();
        if !matches!(error, PoolError::Closed(_)) {
            self.events.emit(&PoolEvent::Errored { index, error });
        }
    }
}
