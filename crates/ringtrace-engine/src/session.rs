//! Session-level vocabulary: engine states, dispositions, and statistics.

use core::fmt;

use ringtrace_buffer::BufferingMode;
use serde::Serialize;

/// Lifecycle state of the trace engine.
///
/// Transitions are `Stopped -> Started` (via `start`), `Started -> Stopping`
/// (via `stop` or `terminate`), and `Stopping -> Stopped` once the last
/// outstanding context reference is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// No session is active; `start` may be called.
    Stopped,
    /// A session is running and producers may allocate.
    Started,
    /// `stop` has been called; waiting for producer references to drain.
    Stopping,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::Started => f.write_str("started"),
            Self::Stopping => f.write_str("stopping"),
        }
    }
}

/// Outcome classification reported to the handler when a session ends.
///
/// Ordered from best to worst; [`Disposition::merge`] keeps the worst
/// outcome seen, so a session that both filled its buffer and was aborted
/// reports `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// The session ended without losing records.
    Completed,
    /// Records were dropped because a buffer filled.
    BufferFull,
    /// The session was torn down before producers finished.
    Aborted,
}

impl Disposition {
    /// Combine two dispositions, keeping the worse of the two.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        self.max(other)
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::BufferFull => f.write_str("buffer full"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

/// Point-in-time summary of the active session.
///
/// Counter fields are sampled with relaxed loads; values read while producers
/// are running are approximate but each field is individually monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Generation of the session the stats describe.
    pub generation: u32,
    /// Buffering mode the session runs in.
    pub buffering_mode: BufferingMode,
    /// Total records dropped so far.
    pub records_dropped: u64,
    /// Records dropped after a successful buffer switch (both buffers filled
    /// within one allocation).
    pub dropped_after_switch: u64,
    /// Total bytes granted to producers so far.
    pub bytes_allocated: u64,
    /// Number of rolling-buffer switches so far.
    pub wrapped_count: u32,
    /// Extent of valid registration data in the durable region.
    pub durable_data_end: u64,
    /// Durable extent the streaming consumer has confirmed saved; trailing
    /// `durable_data_end` by the bytes still unsaved.
    pub durable_saved_end: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_the_worse_disposition() {
        assert_eq!(
            Disposition::Completed.merge(Disposition::BufferFull),
            Disposition::BufferFull
        );
        assert_eq!(
            Disposition::Aborted.merge(Disposition::BufferFull),
            Disposition::Aborted
        );
        assert_eq!(
            Disposition::Completed.merge(Disposition::Completed),
            Disposition::Completed
        );
    }

    #[test]
    fn test_merge_is_commutative() {
        let all = [
            Disposition::Completed,
            Disposition::BufferFull,
            Disposition::Aborted,
        ];
        for a in all {
            for b in all {
                assert_eq!(a.merge(b), b.merge(a));
            }
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(EngineState::Stopped.to_string(), "stopped");
        assert_eq!(EngineState::Started.to_string(), "started");
        assert_eq!(EngineState::Stopping.to_string(), "stopping");
    }
}
