//! Byte arena backing the buffer regions.
//!
//! A [`RecordArena`] owns a fixed slab of atomic byte cells. The allocator
//! hands out [`Reservation`]s, which are bounds-checked windows into the
//! slab; producers fill their reservation through shared references while
//! other producers fill theirs. Reservations with disjoint ranges never
//! observe each other, and because every cell is atomic, even an overlapping
//! misuse is well-defined (last store wins) rather than undefined behavior.
//!
//! Payload visibility across threads is *not* established here: cell stores
//! are relaxed, and a consumer must receive the range it reads through a
//! synchronizing edge (the switch lock, a channel send, or a full-mark
//! acquire) that happens after the producer finished writing.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU8, Ordering};

/// Fixed-size slab of atomic byte cells.
#[derive(Debug)]
pub struct RecordArena {
    cells: alloc::boxed::Box<[AtomicU8]>,
}

impl RecordArena {
    /// Allocate a zero-filled arena of `len` bytes.
    ///
    /// This is the only allocating operation; everything else operates on
    /// the slab in place.
    #[must_use]
    pub fn new(len: usize) -> Self {
        let cells: Vec<AtomicU8> = (0..len).map(|_| AtomicU8::new(0)).collect();
        Self {
            cells: cells.into_boxed_slice(),
        }
    }

    /// An arena with no cells, for regions a mode never activates.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(0)
    }

    /// Arena length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the arena has no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Carve out `[offset, offset + len)` as a writable reservation.
    ///
    /// Returns `None` if the range does not lie within the arena. The caller
    /// is responsible for range disjointness between concurrent
    /// reservations; the cursor arithmetic upstream guarantees it.
    #[inline]
    pub fn reserve(&self, offset: u64, len: usize) -> Option<Reservation<'_>> {
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(len)?;
        let cells = self.cells.get(start..end)?;
        Some(Reservation { cells, offset })
    }

    /// Copy `[offset, offset + dst.len())` into `dst`.
    ///
    /// Returns `false` without touching `dst` if the range is out of bounds.
    pub fn read_into(&self, offset: u64, dst: &mut [u8]) -> bool {
        let Ok(start) = usize::try_from(offset) else {
            return false;
        };
        let Some(end) = start.checked_add(dst.len()) else {
            return false;
        };
        let Some(cells) = self.cells.get(start..end) else {
            return false;
        };
        for (byte, cell) in dst.iter_mut().zip(cells) {
            *byte = cell.load(Ordering::Relaxed);
        }
        true
    }

    /// Copy `[start, end)` out into a fresh `Vec`.
    ///
    /// Returns `None` if the range is out of bounds or inverted.
    #[must_use]
    pub fn snapshot_range(&self, start: u64, end: u64) -> Option<Vec<u8>> {
        let start = usize::try_from(start).ok()?;
        let end = usize::try_from(end).ok()?;
        let cells = self.cells.get(start..end)?;
        Some(cells.iter().map(|cell| cell.load(Ordering::Relaxed)).collect())
    }
}

/// A granted byte range inside a [`RecordArena`].
///
/// The reservation borrows the arena, so it cannot outlive the session
/// buffer it points into. Writes go through shared references and relaxed
/// atomic stores; a reservation is cheap to hold and carries no drop logic.
#[derive(Debug)]
pub struct Reservation<'a> {
    cells: &'a [AtomicU8],
    offset: u64,
}

impl Reservation<'_> {
    /// Offset of this reservation within its region.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reserved length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the reservation is zero-length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Copy `src` into the reservation starting at its first byte.
    ///
    /// Returns `false` if `src` is longer than the reservation.
    #[inline]
    pub fn write_bytes(&self, src: &[u8]) -> bool {
        self.write_at(0, src)
    }

    /// Copy `src` into the reservation starting `at` bytes in.
    ///
    /// Returns `false` if the copy would run past the reservation end.
    pub fn write_at(&self, at: usize, src: &[u8]) -> bool {
        let Some(cells) = at
            .checked_add(src.len())
            .and_then(|end| self.cells.get(at..end))
        else {
            return false;
        };
        for (cell, byte) in cells.iter().zip(src) {
            cell.store(*byte, Ordering::Relaxed);
        }
        true
    }

    /// Set every byte of the reservation to `value`.
    pub fn fill(&self, value: u8) {
        for cell in self.cells {
            cell.store(value, Ordering::Relaxed);
        }
    }
}
