//! The handler contract between the engine and the embedding application.

use crate::session::Disposition;

/// Callbacks supplied by the embedding application.
///
/// The handler decides category filtering, persists filled buffers in
/// streaming mode, and receives session lifecycle notifications. All
/// callbacks except [`is_category_enabled`](TraceHandler::is_category_enabled)
/// run on the engine's service thread, never on an allocating producer
/// thread; `is_category_enabled` runs on the producer thread that first
/// registers a string, at most once per (thread, literal, session) on the
/// cached path.
pub trait TraceHandler: Send + Sync {
    /// Whether records in `category` should be emitted at all.
    fn is_category_enabled(&self, category: &str) -> bool {
        let _ = category;
        true
    }

    /// A rolling buffer filled in streaming mode and is ready to be saved.
    ///
    /// The handler is expected to copy out `[0, durable_data_end)` of the
    /// durable region plus the filled rolling buffer's contents, then call
    /// [`crate::TraceEngine::mark_rolling_buffer_saved`] with the same
    /// arguments to release the buffer for reuse.
    fn notify_buffer_full(&self, wrapped_count: u32, durable_data_end: u64) {
        let _ = (wrapped_count, durable_data_end);
    }

    /// The session is fully started: all observers have acknowledged.
    fn trace_started(&self) {}

    /// The session ended. `bytes_written` is the total bytes granted to
    /// producers over the session's lifetime.
    fn trace_stopped(&self, disposition: Disposition, bytes_written: u64) {
        let _ = (disposition, bytes_written);
    }
}

/// A handler that enables every category and ignores every callback.
///
/// Useful as a default collaborator in tests and benchmarks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopHandler;

impl TraceHandler for NopHandler {}
