//! Error types for engine lifecycle operations.
//!
//! Allocation failure is deliberately absent here: a full buffer is a counted
//! drop, not an error, and the allocation API returns `Option` instead.

use std::time::Duration;

use thiserror::Error;

use crate::session::EngineState;

/// Errors returned by engine lifecycle operations.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// A lifecycle method was called in a state that does not permit it.
    #[error("cannot {operation} while the engine is {state}")]
    BadState {
        /// The operation that was attempted.
        operation: &'static str,
        /// The engine state at the time of the call.
        state: EngineState,
    },

    /// Hard shutdown timed out before producers released their references.
    #[error("shutdown timed out after {timeout:?} with trace references still outstanding")]
    Cancelled {
        /// How long the shutdown waited before giving up.
        timeout: Duration,
    },

    /// The session configuration cannot be used to lay out a buffer.
    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Create a bad-state error.
    #[must_use]
    pub fn bad_state(operation: &'static str, state: EngineState) -> Self {
        Self::BadState { operation, state }
    }

    /// Create a cancelled error.
    #[must_use]
    pub fn cancelled(timeout: Duration) -> Self {
        Self::Cancelled { timeout }
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }
}

/// A specialized `Result` type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
