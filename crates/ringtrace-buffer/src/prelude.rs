//! Prelude for ringtrace-buffer.
//!
//! This module re-exports the most commonly used types for convenient importing.
//!
//! # Example
//!
//! ```rust
//! use ringtrace_buffer::prelude::*;
//!
//! let layout = BufferLayout::compute(BufferingMode::OneShot, 4096, None)?;
//! let arena = RecordArena::new(layout.rolling_len() as usize);
//! let cursor = RollingCursor::new();
//!
//! let prev = cursor.advance(16);
//! assert!(arena.reserve(prev.offset(), 16).is_some());
//! # Ok::<(), LayoutError>(())
//! ```

pub use crate::arena::{RecordArena, Reservation};
pub use crate::counters::{CounterSnapshot, SessionCounters};
pub use crate::cursor::{
    FullMark, MAX_RECORD_BYTES, MAX_REGION_BYTES, MAX_WRAPPED_COUNT, PackedCursor, RollingCursor,
};
pub use crate::header::{BufferHeader, ENCODED_HEADER_LEN, HeaderError};
pub use crate::layout::{BufferLayout, BufferingMode, LayoutError};
