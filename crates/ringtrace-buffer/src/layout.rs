//! Buffering modes and buffer region partitioning.
//!
//! A trace session owns one fixed memory region. Depending on the buffering
//! mode it is either used whole (one-shot) or partitioned into a small
//! *durable* region for registration records plus two equally sized *rolling*
//! regions that take the record stream in turns. [`BufferLayout::compute`]
//! performs the partitioning and validates the arithmetic once, at session
//! start; nothing here is touched on the allocation path.

use core::fmt;

use crate::cursor::MAX_REGION_BYTES;

/// Smallest total capacity a session may be configured with.
pub const MIN_CAPACITY_BYTES: u64 = 1024;

/// Bounds for the durable region when its size is derived from the capacity.
pub const MIN_DURABLE_BYTES: u64 = 512;
/// Upper clamp for the derived durable region size.
pub const MAX_DURABLE_BYTES: u64 = 16 * 1024;

/// Smallest usable rolling region.
pub const MIN_ROLLING_BYTES: u64 = 256;

/// How records are laid down once the buffer fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum BufferingMode {
    /// Fill the whole buffer once; every later record is dropped.
    OneShot,
    /// Rotate between the two rolling buffers, discarding the older one.
    Circular,
    /// Rotate only after the outgoing buffer has been saved by the handler.
    Streaming,
}

impl BufferingMode {
    /// Wire discriminant used by the encoded buffer header.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::OneShot => 0,
            Self::Circular => 1,
            Self::Streaming => 2,
        }
    }

    /// Decode a wire discriminant.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::OneShot),
            1 => Some(Self::Circular),
            2 => Some(Self::Streaming),
            _ => None,
        }
    }

    /// Whether this mode partitions off a distinct durable region.
    #[must_use]
    pub const fn has_durable_region(self) -> bool {
        !matches!(self, Self::OneShot)
    }
}

impl fmt::Display for BufferingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneShot => f.write_str("oneshot"),
            Self::Circular => f.write_str("circular"),
            Self::Streaming => f.write_str("streaming"),
        }
    }
}

/// Reasons a capacity cannot be partitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    /// Total capacity below [`MIN_CAPACITY_BYTES`].
    CapacityTooSmall(u64),
    /// Total capacity above what a packed cursor can address.
    CapacityTooLarge(u64),
    /// An explicit durable size was below [`MIN_DURABLE_BYTES`].
    DurableTooSmall(u64),
    /// An explicit durable size left less than two minimum rolling regions.
    DurableTooLarge(u64),
    /// One-shot buffers have no separate durable region to size.
    DurableNotApplicable,
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityTooSmall(capacity) => write!(
                f,
                "buffer capacity {capacity} is below the minimum of {MIN_CAPACITY_BYTES} bytes"
            ),
            Self::CapacityTooLarge(capacity) => write!(
                f,
                "buffer capacity {capacity} exceeds the addressable maximum of {MAX_REGION_BYTES} bytes"
            ),
            Self::DurableTooSmall(durable) => write!(
                f,
                "durable region of {durable} bytes is below the minimum of {MIN_DURABLE_BYTES} bytes"
            ),
            Self::DurableTooLarge(durable) => write!(
                f,
                "durable region of {durable} bytes leaves no room for two rolling regions"
            ),
            Self::DurableNotApplicable => {
                f.write_str("one-shot buffers do not take an explicit durable size")
            }
        }
    }
}

impl core::error::Error for LayoutError {}

/// Region sizes for one session buffer.
///
/// In one-shot mode the durable length is zero and rolling region 0 spans the
/// whole buffer; rolling region 1 has length zero and is never activated
/// because one-shot allocation never switches.
///
/// # Example
///
/// ```rust
/// use ringtrace_buffer::{BufferLayout, BufferingMode};
///
/// let layout = BufferLayout::compute(BufferingMode::Circular, 64 * 1024, None)?;
/// assert!(layout.durable_len() >= 512);
/// assert_eq!(layout.rolling_len() % 8, 0);
/// assert!(layout.total_len() <= 64 * 1024);
/// # Ok::<(), ringtrace_buffer::LayoutError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    mode: BufferingMode,
    durable_len: u64,
    rolling_len: u64,
}

impl BufferLayout {
    /// Partition `capacity` bytes for `mode`.
    ///
    /// `durable_override` pins the durable region to an exact size (rounded
    /// down to a multiple of 8) instead of deriving it as a clamped fraction
    /// of the capacity. Rolling regions are always rounded down to a multiple
    /// of 8; up to 15 bytes of the capacity may go unused.
    ///
    /// # Errors
    ///
    /// Returns a [`LayoutError`] if the capacity is out of range, if an
    /// override is supplied for a mode without a durable region, or if the
    /// override leaves the rolling regions undersized.
    pub fn compute(
        mode: BufferingMode,
        capacity: u64,
        durable_override: Option<u64>,
    ) -> Result<Self, LayoutError> {
        if capacity < MIN_CAPACITY_BYTES {
            return Err(LayoutError::CapacityTooSmall(capacity));
        }
        if capacity > MAX_REGION_BYTES {
            return Err(LayoutError::CapacityTooLarge(capacity));
        }

        if !mode.has_durable_region() {
            if durable_override.is_some() {
                return Err(LayoutError::DurableNotApplicable);
            }
            return Ok(Self {
                mode,
                durable_len: 0,
                rolling_len: capacity,
            });
        }

        let durable_len = match durable_override {
            Some(requested) => {
                let rounded = requested & !7;
                if rounded < MIN_DURABLE_BYTES {
                    return Err(LayoutError::DurableTooSmall(requested));
                }
                rounded
            }
            None => (capacity / 16).clamp(MIN_DURABLE_BYTES, MAX_DURABLE_BYTES) & !7,
        };

        let remaining = capacity
            .checked_sub(durable_len)
            .ok_or(LayoutError::DurableTooLarge(durable_len))?;
        let rolling_len = (remaining / 2) & !7;
        if rolling_len < MIN_ROLLING_BYTES {
            return Err(LayoutError::DurableTooLarge(durable_len));
        }

        Ok(Self {
            mode,
            durable_len,
            rolling_len,
        })
    }

    /// The buffering mode this layout was computed for.
    #[must_use]
    pub const fn mode(&self) -> BufferingMode {
        self.mode
    }

    /// Length of the durable region (zero in one-shot mode).
    #[must_use]
    pub const fn durable_len(&self) -> u64 {
        self.durable_len
    }

    /// Length of each rolling region.
    #[must_use]
    pub const fn rolling_len(&self) -> u64 {
        self.rolling_len
    }

    /// Number of rolling regions that can become active.
    #[must_use]
    pub const fn rolling_region_count(&self) -> usize {
        match self.mode {
            BufferingMode::OneShot => 1,
            BufferingMode::Circular | BufferingMode::Streaming => 2,
        }
    }

    /// Total bytes covered by the computed regions.
    ///
    /// At most 15 bytes less than the configured capacity due to rounding.
    #[must_use]
    pub const fn total_len(&self) -> u64 {
        match self.mode {
            BufferingMode::OneShot => self.rolling_len,
            BufferingMode::Circular | BufferingMode::Streaming => {
                self.durable_len + 2 * self.rolling_len
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oneshot_spans_whole_buffer() -> Result<(), LayoutError> {
        let layout = BufferLayout::compute(BufferingMode::OneShot, 4096, None)?;
        assert_eq!(layout.durable_len(), 0);
        assert_eq!(layout.rolling_len(), 4096);
        assert_eq!(layout.rolling_region_count(), 1);
        assert_eq!(layout.total_len(), 4096);
        Ok(())
    }

    #[test]
    fn test_oneshot_rejects_durable_override() {
        let result = BufferLayout::compute(BufferingMode::OneShot, 4096, Some(512));
        assert_eq!(result, Err(LayoutError::DurableNotApplicable));
    }

    #[test]
    fn test_circular_derives_clamped_durable() -> Result<(), LayoutError> {
        // Small capacity: fraction clamps up to the minimum.
        let layout = BufferLayout::compute(BufferingMode::Circular, 4096, None)?;
        assert_eq!(layout.durable_len(), MIN_DURABLE_BYTES);

        // Large capacity: fraction clamps down to the maximum.
        let layout = BufferLayout::compute(BufferingMode::Circular, 1 << 20, None)?;
        assert_eq!(layout.durable_len(), MAX_DURABLE_BYTES);
        Ok(())
    }

    #[test]
    fn test_circular_override_yields_exact_regions() -> Result<(), LayoutError> {
        let layout = BufferLayout::compute(BufferingMode::Circular, 2512, Some(512))?;
        assert_eq!(layout.durable_len(), 512);
        assert_eq!(layout.rolling_len(), 1000);
        assert_eq!(layout.total_len(), 2512);
        Ok(())
    }

    #[test]
    fn test_rolling_regions_are_eight_byte_multiples() -> Result<(), LayoutError> {
        for capacity in [1024, 4097, 9999, 65_535] {
            let layout = BufferLayout::compute(BufferingMode::Streaming, capacity, None)?;
            assert_eq!(layout.durable_len() % 8, 0);
            assert_eq!(layout.rolling_len() % 8, 0);
            assert!(layout.total_len() <= capacity);
            assert!(capacity - layout.total_len() < 16);
        }
        Ok(())
    }

    #[test]
    fn test_capacity_bounds() {
        assert_eq!(
            BufferLayout::compute(BufferingMode::Circular, 512, None),
            Err(LayoutError::CapacityTooSmall(512))
        );
        assert_eq!(
            BufferLayout::compute(BufferingMode::OneShot, MAX_REGION_BYTES + 1, None),
            Err(LayoutError::CapacityTooLarge(MAX_REGION_BYTES + 1))
        );
    }

    #[test]
    fn test_oversized_durable_override_is_rejected() {
        let result = BufferLayout::compute(BufferingMode::Streaming, 1024, Some(1024));
        assert_eq!(result, Err(LayoutError::DurableTooLarge(1024)));

        let result = BufferLayout::compute(BufferingMode::Streaming, 2048, Some(8));
        assert_eq!(result, Err(LayoutError::DurableTooSmall(8)));
    }

    #[test]
    fn test_mode_discriminant_round_trip() {
        for mode in [
            BufferingMode::OneShot,
            BufferingMode::Circular,
            BufferingMode::Streaming,
        ] {
            assert_eq!(BufferingMode::from_u8(mode.as_u8()), Some(mode));
        }
        assert_eq!(BufferingMode::from_u8(3), None);
    }
}
