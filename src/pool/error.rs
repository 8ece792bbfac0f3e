//! Error types for resource pools.

use thiserror::Error;

use crate::ErrorKind;

/// Errors that can occur while acquiring or constructing pooled resources.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Building the slot's resource failed.
    #[error("Failed to construct resource for slot {index}: {reason}")]
    Construction {
        /// The slot that failed.
        index: usize,
        /// The reason for the failure.
        reason: String,
    },

    /// The requested slot does not exist.
    #[error("Slot {0} is out of range")]
    OutOfRange(usize),

    /// Every slot of the pool is parked in an error state.
    #[error("All pool slots are errored")]
    Exhausted,

    /// The caller's cancellation signal fired.
    #[error("Operation cancelled")]
    Cancelled,

    /// The pool was closed.
    #[error("Pool closed: {0}")]
    Closed(String),
}

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

impl PoolError {
    /// Classifies the error for retry decisions.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Construction { .. } | Self::Exhausted => ErrorKind::Transport,
            Self::OutOfRange(_) => ErrorKind::Protocol,
            Self::Cancelled => ErrorKind::Timeout,
            Self::Closed(_) => ErrorKind::Closed,
        }
    }

    /// Builds a construction error for `index` from any displayable cause.
    pub fn construction(index: usize, reason: impl std::fmt::Display) -> Self {
        Self::Construction {
            index,
            reason: reason.to_string(),
        }
    }
}
