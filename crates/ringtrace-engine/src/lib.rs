//! # ringtrace-engine
//!
//! Session lifecycle and record allocation for in-process tracing.
//!
//! The engine hosts at most one trace session at a time. A session owns a
//! [`TraceContext`]: the buffers, the lock-free allocation cursor, and the
//! session's counters. Producer threads call [`TraceEngine::acquire_context`]
//! (never blocks) and reserve record space straight from the returned handle;
//! dropped records are absorbed into counters rather than surfaced as errors.
//! A [`TraceHandler`] supplied at start observes the session's life: category
//! filtering on the producer side, buffer-full notifications, and start/stop
//! callbacks on the engine's service thread.
//!
//! ## Buffering Modes
//!
//! - **One-shot**: a single buffer; when it fills, the session keeps running
//!   but every later record is dropped.
//! - **Circular**: two rolling buffers reused alternately; old records are
//!   overwritten, nothing stops.
//! - **Streaming**: two rolling buffers drained by the handler; a buffer is
//!   reused only after the handler has saved it.
//!
//! ## Architecture
//!
//! - [`engine`] - lifecycle state machine, service thread, and observers
//! - [`context`] - per-session buffers and the allocation fast path
//! - [`cache`] - per-thread caching of string and thread registrations
//! - [`records`] - the durable-region registration record codec
//! - [`config`] - session configuration and validation
//! - [`handler`] - the [`TraceHandler`] callback trait
//! - [`observer`] - coalescing state-change signals
//! - [`session`] - state, disposition, and statistics types
//! - [`error`] - the engine error type
//!
//! ## Usage
//!
//! ```rust
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use ringtrace_engine::{
//!     BufferingMode, Disposition, NopHandler, SessionConfig, TraceEngine,
//! };
//!
//! let engine = TraceEngine::new();
//! engine.start(
//!     Arc::new(NopHandler),
//!     &SessionConfig::new(BufferingMode::Circular, 1 << 20),
//! )?;
//!
//! // Producers take a handle and reserve record space from it.
//! let context = engine.acquire_context().ok_or("no active session")?;
//! if let Some(reservation) = context.alloc_record(48) {
//!     assert!(reservation.write_bytes(&[7u8; 48]));
//! }
//! drop(context);
//!
//! engine.stop(Disposition::Completed)?;
//! engine.terminate(Duration::from_secs(1))?;
//! # Ok(())
//! # }
//! ```

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

pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod handler;
pub mod observer;
pub mod records;
pub mod session;

pub mod prelude;

pub use cache::{
    MAX_STRING_LEN, STRING_CACHE_CAPACITY, StringRef, ThreadRef, current_thread_serial,
    register_current_thread, register_string,
};
pub use config::{DEFAULT_BUFFER_CAPACITY, SessionConfig};
pub use context::{ContextHandle, MAX_STRING_INDEX, MAX_THREAD_INDEX, TraceContext};
pub use engine::{DEFAULT_TERMINATE_TIMEOUT, TraceEngine};
pub use error::{EngineError, EngineResult};
pub use handler::{NopHandler, TraceHandler};
pub use observer::{ObserverId, ObserverSignal, ObserverWaiter};
pub use records::{
    DurableRecord, DurableRecords, STRING_RECORD_TAG, THREAD_RECORD_TAG, encoded_record_len,
    write_string_record, write_thread_record,
};
pub use session::{Disposition, EngineState, SessionStats};

// The buffer types that appear in this crate's public signatures.
pub use ringtrace_buffer::{
    BufferHeader, BufferLayout, BufferingMode, MAX_RECORD_BYTES, Reservation,
};
