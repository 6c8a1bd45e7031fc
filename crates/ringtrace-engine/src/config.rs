//! Session configuration.

use ringtrace_buffer::{BufferLayout, BufferingMode};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Default buffer capacity when none is chosen explicitly.
pub const DEFAULT_BUFFER_CAPACITY: u64 = 4 * 1024 * 1024;

/// Configuration for one trace session.
///
/// # Example
///
/// ```rust
/// use ringtrace_engine::{BufferingMode, SessionConfig};
///
/// let config = SessionConfig::new(BufferingMode::Streaming, 64 * 1024)
///     .with_durable_capacity(8 * 1024);
/// assert!(config.validated_layout().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    buffering_mode: BufferingMode,
    buffer_capacity: u64,
    #[serde(default)]
    durable_capacity: Option<u64>,
}

impl SessionConfig {
    /// Create a configuration with a derived durable region size.
    #[must_use]
    pub fn new(buffering_mode: BufferingMode, buffer_capacity: u64) -> Self {
        Self {
            buffering_mode,
            buffer_capacity,
            durable_capacity: None,
        }
    }

    /// Pin the durable region to an exact size instead of deriving it.
    ///
    /// Only meaningful for modes with a durable region; one-shot sessions
    /// reject an explicit durable size at validation time.
    #[must_use]
    pub fn with_durable_capacity(mut self, bytes: u64) -> Self {
        self.durable_capacity = Some(bytes);
        self
    }

    /// The buffering mode sessions built from this configuration run in.
    #[must_use]
    pub fn buffering_mode(&self) -> BufferingMode {
        self.buffering_mode
    }

    /// Total buffer capacity in bytes.
    #[must_use]
    pub fn buffer_capacity(&self) -> u64 {
        self.buffer_capacity
    }

    /// The pinned durable region size, if any.
    #[must_use]
    pub fn durable_capacity(&self) -> Option<u64> {
        self.durable_capacity
    }

    /// Validate the configuration and compute the buffer layout it describes.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] if the capacity is out of range,
    /// cannot be addressed on this platform, or cannot be partitioned for the
    /// chosen mode.
    pub fn validated_layout(&self) -> EngineResult<BufferLayout> {
        if usize::try_from(self.buffer_capacity).is_err() {
            return Err(EngineError::invalid_config(format!(
                "buffer capacity {} exceeds the platform address space",
                self.buffer_capacity
            )));
        }
        BufferLayout::compute(self.buffering_mode, self.buffer_capacity, self.durable_capacity)
            .map_err(|error| EngineError::invalid_config(error.to_string()))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(BufferingMode::Circular, DEFAULT_BUFFER_CAPACITY)
    }
}
