//! # ringtrace-buffer
//!
//! Lock-free record buffer primitives for the `ringtrace` engine.
//!
//! This crate holds everything the allocation hot path touches: the packed
//! cursor that reserves byte ranges with a single `fetch_add`, the full marks
//! that record where a region stopped filling, the drop counters, the region
//! layout arithmetic, the byte arena the regions live in, and the inspectable
//! buffer header external readers use.
//!
//! ## Safety Guarantees
//!
//! - **No heap allocations** after a buffer is created
//! - **No blocking operations** - reservation is one atomic instruction
//! - **No syscalls** on the reservation path
//! - **No `unsafe`** - regions are atomic byte cells, not raw pointers
//!
//! ## Architecture
//!
//! - [`cursor`] - packed offset/wrapped-count cursor and full marks
//! - [`counters`] - per-session drop and throughput counters
//! - [`layout`] - buffering modes and region partitioning
//! - [`arena`] - atomic byte slabs and bounds-checked reservations
//! - [`header`] - the 80-byte inspectable buffer header codec
//!
//! ## Usage
//!
//! ```rust
//! use ringtrace_buffer::{PackedCursor, RollingCursor};
//!
//! let cursor = RollingCursor::new();
//!
//! // Hot path: one fetch_add reserves a range and names its buffer.
//! let prev = cursor.advance(64);
//! assert_eq!(prev.offset(), 0);
//! assert_eq!(prev.buffer_index(), 0);
//!
//! // Switching buffers is one release store.
//! cursor.publish(PackedCursor::new(0, prev.wrapped_count() + 1));
//! assert_eq!(cursor.load().buffer_index(), 1);
//! ```

#![no_std]
#![deny(
    unsafe_op_in_unsafe_fn,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::panic,
    missing_docs,
    missing_debug_implementations
)]
#![warn(clippy::pedantic)]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

pub mod arena;
pub mod counters;
pub mod cursor;
pub mod header;
pub mod layout;

pub mod prelude;

pub use arena::{RecordArena, Reservation};
pub use counters::{CounterSnapshot, SessionCounters};
pub use cursor::{
    FullMark, MAX_RECORD_BYTES, MAX_REGION_BYTES, MAX_WRAPPED_COUNT, PackedCursor, RollingCursor,
};
pub use header::{BUFFER_MAGIC, BufferHeader, ENCODED_HEADER_LEN, HEADER_FORMAT_VERSION, HeaderError};
pub use layout::{BufferLayout, BufferingMode, LayoutError};
