//! Per-session drop and throughput counters.
//!
//! Allocation failures on the hot path are *absorbed*: the caller gets `None`
//! and one of these counters is bumped. The counters are the only record of
//! the loss, so they are monotonic for the lifetime of a session and never
//! reset while it runs.
//!
//! # RT Safety
//!
//! All increments are single relaxed `fetch_add`s: no allocation, no
//! blocking, no syscalls.

use core::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of [`SessionCounters`].
///
/// Values are read one atomic at a time, so a snapshot taken while producers
/// run is eventually consistent rather than a cross-counter atomic cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    /// Records that could not be written and were discarded.
    pub records_dropped: u64,
    /// Subset of `records_dropped` lost immediately after a buffer switch,
    /// i.e. records too large for a freshly emptied rolling buffer or lost
    /// to a burst that refilled it within one rotation.
    pub dropped_after_switch: u64,
    /// Total payload bytes successfully reserved.
    pub bytes_allocated: u64,
}

/// Atomic counters shared by every producer of one trace session.
///
/// # Example
///
/// ```rust
/// use ringtrace_buffer::SessionCounters;
///
/// let counters = SessionCounters::new();
/// counters.add_bytes_allocated(512);
/// counters.inc_dropped();
///
/// let snapshot = counters.snapshot();
/// assert_eq!(snapshot.bytes_allocated, 512);
/// assert_eq!(snapshot.records_dropped, 1);
/// ```
#[derive(Debug)]
pub struct SessionCounters {
    records_dropped: AtomicU64,
    dropped_after_switch: AtomicU64,
    bytes_allocated: AtomicU64,
}

impl Default for SessionCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCounters {
    /// Create counters initialized to zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            records_dropped: AtomicU64::new(0),
            dropped_after_switch: AtomicU64::new(0),
            bytes_allocated: AtomicU64::new(0),
        }
    }

    /// Count one discarded record.
    #[inline]
    pub fn inc_dropped(&self) {
        self.records_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one record discarded right after a buffer switch.
    ///
    /// Callers bump this *in addition to* [`inc_dropped`](Self::inc_dropped):
    /// the secondary counter is a diagnostic refinement, not a separate
    /// population.
    #[inline]
    pub fn inc_dropped_after_switch(&self) {
        self.dropped_after_switch.fetch_add(1, Ordering::Relaxed);
    }

    /// Add successfully reserved payload bytes.
    #[inline]
    pub fn add_bytes_allocated(&self, num_bytes: u64) {
        self.bytes_allocated.fetch_add(num_bytes, Ordering::Relaxed);
    }

    /// Current dropped-record count.
    #[inline]
    #[must_use]
    pub fn records_dropped(&self) -> u64 {
        self.records_dropped.load(Ordering::Relaxed)
    }

    /// Current dropped-after-switch count.
    #[inline]
    #[must_use]
    pub fn dropped_after_switch(&self) -> u64 {
        self.dropped_after_switch.load(Ordering::Relaxed)
    }

    /// Current total of successfully reserved bytes.
    #[inline]
    #[must_use]
    pub fn bytes_allocated(&self) -> u64 {
        self.bytes_allocated.load(Ordering::Relaxed)
    }

    /// Read all counters.
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            dropped_after_switch: self.dropped_after_switch.load(Ordering::Relaxed),
            bytes_allocated: self.bytes_allocated.load(Ordering::Relaxed),
        }
    }
}
