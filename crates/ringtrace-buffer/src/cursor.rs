//! Packed rolling-buffer cursor and full-mark atomics.
//!
//! The allocation hot path reserves byte ranges with a single `fetch_add` on
//! one `AtomicU64` that packs two fields:
//!
//! - bits `0..40`: the byte offset within the active rolling buffer
//!   (39 usable bits plus one overflow guard bit), and
//! - bits `40..64`: the wrapped count, whose parity selects which of the two
//!   rolling buffers is active.
//!
//! Packing both fields into one word means a reservation and the identity of
//! the buffer it was made in are obtained atomically, with no lock and no
//! retry loop. [`PackedCursor`] is the decoded value type; [`RollingCursor`]
//! is the atomic cell.
//!
//! # RT Safety
//!
//! All methods in this module are RT-safe: single atomic instructions, no
//! allocation, no blocking, no syscalls.

use core::sync::atomic::{AtomicU64, Ordering};

/// Number of bits in the offset field (39 usable offset bits + 1 guard bit).
pub const OFFSET_FIELD_BITS: u32 = 40;

/// Number of bits in the wrapped-count field.
pub const WRAPPED_COUNT_BITS: u32 = 64 - OFFSET_FIELD_BITS;

/// Largest rolling or durable region a cursor can address.
///
/// One bit of the offset field is reserved as a guard: offsets in
/// `MAX_REGION_BYTES..2 * MAX_REGION_BYTES` are representable but never valid,
/// so overshoot from racing `fetch_add`s is detectable instead of silently
/// carrying into the wrapped-count bits.
pub const MAX_REGION_BYTES: u64 = 1 << (OFFSET_FIELD_BITS - 1);

/// Largest representable wrapped count.
pub const MAX_WRAPPED_COUNT: u32 = (1 << WRAPPED_COUNT_BITS) - 1;

/// Largest single record reservation the allocator will attempt.
///
/// Bounding individual reservations keeps the guard bit sound: even with
/// every failed reservation advancing the offset field, the field cannot
/// reach the wrapped-count bits between two restrain points.
pub const MAX_RECORD_BYTES: u64 = 32 * 1024;

const OFFSET_MASK: u64 = (1 << OFFSET_FIELD_BITS) - 1;

/// Decoded snapshot of a rolling cursor: a byte offset plus the wrapped count
/// of the buffer the offset belongs to.
///
/// This is a plain value type. It is produced by [`RollingCursor::advance`]
/// and [`RollingCursor::load`], and consumed by the switch and restrain
/// operations, which use it to detect whether the cursor they observed is
/// still current.
///
/// # Example
///
/// ```rust
/// use ringtrace_buffer::cursor::PackedCursor;
///
/// let cursor = PackedCursor::new(4096, 3);
/// assert_eq!(cursor.offset(), 4096);
/// assert_eq!(cursor.wrapped_count(), 3);
/// assert_eq!(cursor.buffer_index(), 1);
/// assert_eq!(PackedCursor::unpack(cursor.pack()), cursor);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedCursor {
    offset: u64,
    wrapped_count: u32,
}

impl PackedCursor {
    /// Create a cursor value. Both fields are masked to their bit widths.
    #[must_use]
    pub const fn new(offset: u64, wrapped_count: u32) -> Self {
        Self {
            offset: offset & OFFSET_MASK,
            wrapped_count: wrapped_count & MAX_WRAPPED_COUNT,
        }
    }

    /// The cursor at offset zero of buffer zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            offset: 0,
            wrapped_count: 0,
        }
    }

    /// Byte offset within the active rolling buffer.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of times allocation has switched rolling buffers.
    #[must_use]
    pub const fn wrapped_count(&self) -> u32 {
        self.wrapped_count
    }

    /// Index of the active rolling buffer (`wrapped_count` parity).
    #[must_use]
    pub const fn buffer_index(&self) -> usize {
        (self.wrapped_count & 1) as usize
    }

    /// Whether the offset field has entered the guard range.
    ///
    /// A guarded offset can only be produced by `fetch_add`s that lost the
    /// capacity check; it never denotes a granted reservation.
    #[must_use]
    pub const fn overflowed(&self) -> bool {
        self.offset >= MAX_REGION_BYTES
    }

    /// Pack into the raw `u64` representation.
    #[must_use]
    pub const fn pack(self) -> u64 {
        ((self.wrapped_count as u64) << OFFSET_FIELD_BITS) | self.offset
    }

    /// Decode from the raw `u64` representation.
    #[must_use]
    pub const fn unpack(raw: u64) -> Self {
        Self {
            offset: raw & OFFSET_MASK,
            wrapped_count: (raw >> OFFSET_FIELD_BITS) as u32,
        }
    }
}

/// The atomic rolling cursor.
///
/// Reservation is one `fetch_add`; switching buffers is one release store of
/// a [`PackedCursor`] with offset zero and an incremented wrapped count. The
/// store is the single step that makes the destination buffer live: any
/// `fetch_add` that lands after it allocates from the new buffer.
///
/// # RT Safety
///
/// Every method is a single atomic instruction.
#[derive(Debug)]
pub struct RollingCursor(AtomicU64);

impl Default for RollingCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl RollingCursor {
    /// Create a cursor at offset zero of buffer zero.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Read the current cursor.
    #[inline]
    #[must_use]
    pub fn load(&self) -> PackedCursor {
        PackedCursor::unpack(self.0.load(Ordering::Acquire))
    }

    /// Reserve `num_bytes` and return the cursor *before* the reservation.
    ///
    /// The caller owns `[prev.offset(), prev.offset() + num_bytes)` of the
    /// buffer selected by `prev.buffer_index()` if and only if the end of
    /// that range is within the region; otherwise the reservation failed and
    /// the caller follows its buffering policy. The acquire half of the RMW
    /// orders the read after the release store that made the buffer live, so
    /// a granted reservation always sees its region's cleared full mark.
    #[inline]
    pub fn advance(&self, num_bytes: u64) -> PackedCursor {
        PackedCursor::unpack(self.0.fetch_add(num_bytes, Ordering::AcqRel))
    }

    /// Publish a new cursor, making its buffer live.
    #[inline]
    pub fn publish(&self, cursor: PackedCursor) {
        self.0.store(cursor.pack(), Ordering::Release);
    }

    /// Snap the cursor to the end of the region, keeping the wrapped count.
    ///
    /// Used when a one-shot buffer fills: all later reservations observe an
    /// exhausted region immediately. Any reservation granted before the snap
    /// ends at or below `region_len`, so the store never un-grants one.
    #[inline]
    pub fn snap_to_end(&self, region_len: u64, wrapped_count: u32) {
        self.publish(PackedCursor::new(region_len, wrapped_count));
    }

    /// Try to pull a failed reservation's overshoot back to the region end.
    ///
    /// `observed` is the cursor [`advance`](Self::advance) returned for the
    /// failed reservation of `num_bytes`. The compare-exchange only succeeds
    /// while the cursor still holds exactly that failed value, so it can
    /// never clip a reservation granted in between. Returns whether the
    /// cursor was restrained.
    #[inline]
    pub fn restrain(&self, observed: PackedCursor, num_bytes: u64, region_len: u64) -> bool {
        let expected = observed.pack().wrapping_add(num_bytes);
        let target = PackedCursor::new(region_len, observed.wrapped_count()).pack();
        self.0
            .compare_exchange(expected, target, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }
}

/// Full mark for one buffer region.
///
/// `0` means not full. A full region stores `data_end + 1`, where `data_end`
/// is the offset at which allocation stopped, so a region that filled at
/// offset zero is still distinguishable from a region that never filled.
/// The first thread to mark wins; everyone else observes the winner's
/// `data_end`.
#[derive(Debug)]
pub struct FullMark(AtomicU64);

impl Default for FullMark {
    fn default() -> Self {
        Self::new()
    }
}

impl FullMark {
    /// Create a cleared (not full) mark.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Mark the region full at `data_end`.
    ///
    /// Returns `true` only for the single caller that performed the
    /// transition. Later calls (and concurrent losers) return `false` and
    /// leave the winner's `data_end` in place.
    #[inline]
    pub fn mark(&self, data_end: u64) -> bool {
        self.0
            .compare_exchange(0, data_end + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// The recorded `data_end`, or `None` if the region is not full.
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<u64> {
        match self.0.load(Ordering::Acquire) {
            0 => None,
            stored => Some(stored - 1),
        }
    }

    /// Whether the region is currently marked full.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.0.load(Ordering::Acquire) != 0
    }

    /// Re-arm the mark so the region can fill again.
    #[inline]
    pub fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }
}
