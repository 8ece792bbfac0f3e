//! Typed per-instance listener registries.
//!
//! Every component that exposes events (pools, relay clients, RPC sessions)
//! owns its own [`Registry`]. Registering a listener returns a [`Listener`]
//! guard; dropping the guard deregisters the listener, which lets a
//! [`DisposeStack`](crate::pool::DisposeStack) release event wiring the same
//! way it releases any other sub-resource.
//!
//! Listeners are invoked outside the registry lock, so a listener may
//! register or deregister listeners (including itself) while being called.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type Entries<L> = Mutex<Vec<(u64, Arc<L>)>>;

/// An ordered set of listeners of type `L`.
///
/// `L` is usually a trait object such as `dyn Fn(&E) + Send + Sync`.
pub struct Registry<L: ?Sized> {
    entries: Arc<Entries<L>>,
    next_id: AtomicU64,
}

impl<L: ?Sized> Default for Registry<L> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<L: ?Sized + Send + Sync + 'static> fmt::Debug for Registry<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("listeners", &self.len())
            .finish()
    }
}

impl<L: ?Sized + Send + Sync + 'static> Registry<L> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener, returning its deregistration guard.
    #[must_use = "dropping the guard deregisters the listener"]
    pub fn register(&self, listener: Arc<L>) -> Listener {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((id, listener));
        }

        let weak: Weak<Entries<L>> = Arc::downgrade(&self.entries);
        Listener::new(move || {
            if let Some(entries) = weak.upgrade() {
                if let Ok(mut entries) = entries.lock() {
                    entries.retain(|(entry_id, _)| *entry_id != id);
                }
            }
        })
    }

    /// Returns the listeners in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.entries
            .lock()
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or_default()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registry of plain event observers.
pub type EventRegistry<E> = Registry<dyn Fn(&E) + Send + Sync>;

impl<E: 'static> Registry<dyn Fn(&E) + Send + Sync> {
    /// Registers a closure observing every emitted event.
    #[must_use = "dropping the guard deregisters the listener"]
    pub fn on(&self, f: impl Fn(&E) + Send + Sync + 'static) -> Listener {
        self.register(Arc::new(f))
    }

    /// Calls every listener with `event`.
    pub fn emit(&self, event: &E) {
        for listener in self.snapshot() {
            listener(event);
        }
    }
}

/// Registry of claimable requests: the first listener returning `Some` wins.
pub type ClaimRegistry<Q, R> = Registry<dyn Fn(&Q) -> Option<R> + Send + Sync>;

impl<Q: 'static, R: 'static> Registry<dyn Fn(&Q) -> Option<R> + Send + Sync> {
    /// Registers a closure that may claim a request.
    #[must_use = "dropping the guard deregisters the listener"]
    pub fn on_claim(&self, f: impl Fn(&Q) -> Option<R> + Send + Sync + 'static) -> Listener {
        self.register(Arc::new(f))
    }

    /// Offers `request` to each listener in order, returning the first claim.
    pub fn claim(&self, request: &Q) -> Option<R> {
        self.snapshot().into_iter().find_map(|listener| listener(request))
    }
}

/// Deregistration guard returned by [`Registry::register`].
///
/// The listener stays registered for as long as this guard is alive.
pub struct Listener {
    off: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Listener {
    fn new(off: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            off: Some(Box::new(off)),
        }
    }

    /// Deregisters the listener now.
    pub fn off(mut self) {
        if let Some(off) = self.off.take() {
            off();
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("active", &self.off.is_some())
            .finish()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(off) = self.off.take() {
            off();
        }
    }
}
