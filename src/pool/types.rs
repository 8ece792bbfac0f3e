//! Types shared by resource pool slots and their constructors.

use std::fmt;
use std::sync::{Arc, Weak};

use tokio_util::sync::CancellationToken;

use super::disposer::DisposeStack;
use super::error::PoolError;
use super::slots::Inner;

/// Lifecycle notifications emitted by a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// A slot finished constructing a fresh resource.
    Started {
        /// The slot index.
        index: usize,
    },

    /// A slot's construction failed with a fresh (non-stale) error.
    Errored {
        /// The slot index.
        index: usize,
        /// The surfaced error.
        error: PoolError,
    },

    /// A slot discarded its resource and began reconstruction.
    Restarting {
        /// The slot index.
        index: usize,
    },

    /// The pool was closed.
    Closed {
        /// The close reason.
        reason: String,
    },
}

/// A freshly built resource together with everything that must be released
/// when the slot discards it.
pub struct Resource<T> {
    pub(crate) value: Arc<T>,
    pub(crate) disposer: DisposeStack,
}

impl<T> Resource<T> {
    /// Wraps a resource and takes ownership of its cleanup stack.
    pub fn new(value: Arc<T>, disposer: DisposeStack) -> Self {
        Self { value, disposer }
    }

    /// Wraps a resource that needs no cleanup.
    #[must_use]
    pub fn bare(value: Arc<T>) -> Self {
        Self::new(value, DisposeStack::new())
    }

    /// Returns the wrapped resource.
    #[must_use]
    pub const fn value(&self) -> &Arc<T> {
        &self.value
    }
}

impl<T> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("disposer", &self.disposer)
            .finish_non_exhaustive()
    }
}

/// Observable state of one slot.
pub enum SlotState<T> {
    /// A construction attempt is in flight.
    Building,
    /// The slot holds a live resource.
    Ready(Arc<T>),
    /// The last construction attempt failed; the slot waits for a restart.
    Errored(PoolError),
}

impl<T> Clone for SlotState<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Building => Self::Building,
            Self::Ready(value) => Self::Ready(Arc::clone(value)),
            Self::Errored(error) => Self::Errored(error.clone()),
        }
    }
}

impl<T> fmt::Debug for SlotState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Building => f.write_str("Building"),
            Self::Ready(_) => f.write_str("Ready"),
            Self::Errored(error) => f.debug_tuple("Errored").field(error).finish(),
        }
    }
}

impl<T> SlotState<T> {
    /// Returns true if the slot holds a live resource.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Returns true if the slot is parked in an error state.
    #[must_use]
    pub const fn is_errored(&self) -> bool {
        matches!(self, Self::Errored(_))
    }
}

/// Weak handle letting a resource restart the slot that owns it.
///
/// Event wiring set up during construction (for example "restart on close")
/// captures this handle instead of the pool itself, so a resource never keeps
/// its owning pool alive.
pub struct SlotHandle<T> {
    pub(crate) pool: Weak<Inner<T>>,
    pub(crate) index: usize,
}

impl<T> Clone for SlotHandle<T> {
    fn clone(&self) -> Self {
        Self {
            pool: Weak::clone(&self.pool),
            index: self.index,
        }
    }
}

impl<T> fmt::Debug for SlotHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotHandle")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> SlotHandle<T> {
    /// The slot index this handle refers to.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Restarts the slot if the pool is still alive.
    pub fn restart(&self) {
        if let Some(pool) = self.pool.upgrade() {
            Inner::restart(&pool, self.index);
        }
    }
}

/// Everything a constructor receives for one attempt.
pub struct SlotContext<T> {
    /// The slot being constructed.
    pub index: usize,
    /// Fires when the attempt is superseded by a restart or the pool closes.
    pub cancel: CancellationToken,
    /// Handle to restart this slot later, from event wiring.
    pub handle: SlotHandle<T>,
}

impl<T> fmt::Debug for SlotContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotContext")
            .field("index", &self.index)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
