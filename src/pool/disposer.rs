//! Scoped acquisition for multi-step resource setup.
//!
//! A [`DisposeStack`] records one cleanup closure per acquired sub-resource.
//! Cleanups run in reverse acquisition order, exactly once:
//!
//! - on an early return (`?`) during setup, dropping the stack releases
//!   everything acquired so far;
//! - on success the stack moves into the pool slot, which disposes it on
//!   restart or shutdown.

use std::fmt;

use crate::events::Listener;

/// Ordered list of cleanup closures executed in reverse order.
#[derive(Default)]
pub struct DisposeStack {
    cleanups: Vec<Box<dyn FnOnce() + Send + Sync>>,
}

impl DisposeStack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a cleanup closure.
    pub fn defer(&mut self, cleanup: impl FnOnce() + Send + Sync + 'static) {
        self.cleanups.push(Box::new(cleanup));
    }

    /// Keeps a listener registered until the stack is disposed.
    pub fn hold(&mut self, listener: Listener) {
        self.defer(move || listener.off());
    }

    /// Number of pending cleanups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cleanups.len()
    }

    /// Returns true if there is nothing to release.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cleanups.is_empty()
    }

    /// Runs every cleanup, most recent first.
    pub fn dispose(mut self) {
        self.run();
    }

    fn run(&mut self) {
        while let Some(cleanup) = self.cleanups.pop() {
            cleanup();
        }
    }
}

impl fmt::Debug for DisposeStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposeStack")
            .field("pending", &self.cleanups.len())
            .finish()
    }
}

impl Drop for DisposeStack {
    fn drop(&mut self) {
        self.run();
    }
}
