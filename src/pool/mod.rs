//! Self-healing resource pools.
//!
//! A [`ResourcePool`] owns a fixed number of slots. Each slot lazily builds
//! one resource, keeps it until it is told to restart, and rebuilds it in
//! the background. Relay plumbing nests two pools: a pool of relay clients
//! per circuit inside a pool of circuits.
//!
//! # Staleness
//!
//! ```text
//! attempt k starts (epoch e) ──► fails
//!                                  │
//!               epoch now > e ? ───┤── yes ─► retry immediately (stale)
//!                                  └── no ──► park error, surface to acquire
//! ```
//!
//! The epoch is bumped by [`ResourcePool::notify_external_restart`], which a
//! downstream pool calls whenever its upstream pool reports a fresh resource.
//! Epochs are counters, so clock adjustments cannot misclassify a failure.
//!
//! # Recovery
//!
//! A parked error stays until something restarts the slot. Owners that
//! must heal on their own call [`ResourcePool::retry_errored`], which
//! restarts errored slots on a [`Backoff`] schedule.
//!
//! # Ownership
//!
//! Setup steps push their cleanups on a [`DisposeStack`]. A failed setup
//! drops the stack, releasing everything acquired so far; a successful one
//! hands the stack to the slot inside a [`Resource`], and the slot disposes
//! it exactly once on restart or shutdown.

mod backoff;
mod disposer;
mod error;
mod slots;
mod types;

pub use backoff::Backoff;
pub use disposer::DisposeStack;
pub use error::{PoolError, PoolResult};
pub use slots::{ResourcePool, WeakResourcePool};
pub use types::{PoolEvent, Resource, SlotContext, SlotHandle, SlotState};
