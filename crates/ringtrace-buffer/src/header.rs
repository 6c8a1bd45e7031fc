//! Inspectable buffer header.
//!
//! External consumers (a handler saving buffers, or an out-of-process reader
//! handed the raw bytes) need enough metadata to interpret a session buffer
//! without the engine: region sizes, how far valid data extends in each
//! region, the wrapped count, and the drop total. [`BufferHeader`] is that
//! metadata as a plain struct, with a fixed 80-byte little-endian encoding.
//!
//! The engine materializes a header on demand from the live session atomics;
//! the encoded form exists for transport and for dumps.

use core::fmt;

use crate::layout::BufferingMode;

/// Magic value identifying an encoded trace buffer header (`"RNGTRACE"`).
pub const BUFFER_MAGIC: u64 = u64::from_le_bytes(*b"RNGTRACE");

/// Version of the encoded header layout.
pub const HEADER_FORMAT_VERSION: u32 = 1;

/// Size of the encoded header in bytes.
pub const ENCODED_HEADER_LEN: usize = 80;

/// Decode/encode failures for [`BufferHeader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    /// The byte buffer is shorter than [`ENCODED_HEADER_LEN`].
    Truncated,
    /// The magic field did not match [`BUFFER_MAGIC`].
    BadMagic(u64),
    /// The version field names a layout this build does not know.
    UnsupportedVersion(u32),
    /// The mode byte is not a known [`BufferingMode`] discriminant.
    InvalidMode(u8),
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "buffer shorter than {ENCODED_HEADER_LEN} header bytes"),
            Self::BadMagic(found) => write!(f, "bad header magic {found:#018x}"),
            Self::UnsupportedVersion(version) => write!(f, "unsupported header version {version}"),
            Self::InvalidMode(mode) => write!(f, "invalid buffering mode byte {mode}"),
        }
    }
}

impl core::error::Error for HeaderError {}

/// Session buffer metadata in decoded form.
///
/// `rolling_data_end[i]` is how far valid data extends in rolling region `i`:
/// the live cursor offset for the active region, the recorded full-mark
/// `data_end` for a filled region, and zero for a region never written. In
/// one-shot mode `durable_size` is zero and only `rolling_data_end[0]` is
/// meaningful.
///
/// # Example
///
/// ```rust
/// use ringtrace_buffer::{BufferHeader, BufferingMode};
///
/// let header = BufferHeader {
///     buffering_mode: BufferingMode::Circular,
///     total_size: 2512,
///     durable_size: 512,
///     rolling_size: 1000,
///     durable_data_end: 48,
///     rolling_data_end: [1000, 256],
///     wrapped_count: 1,
///     records_dropped: 0,
/// };
/// let bytes = header.encode();
/// assert_eq!(BufferHeader::decode(&bytes)?, header);
/// # Ok::<(), ringtrace_buffer::HeaderError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferHeader {
    /// Buffering mode the session runs in.
    pub buffering_mode: BufferingMode,
    /// Total bytes covered by the buffer regions.
    pub total_size: u64,
    /// Durable region length (zero in one-shot mode).
    pub durable_size: u64,
    /// Length of each rolling region.
    pub rolling_size: u64,
    /// Extent of valid registration data in the durable region.
    pub durable_data_end: u64,
    /// Extent of valid data in each rolling region.
    pub rolling_data_end: [u64; 2],
    /// Number of rolling-buffer switches so far.
    pub wrapped_count: u64,
    /// Records dropped by the session so far.
    pub records_dropped: u64,
}

impl BufferHeader {
    /// Encode into a fixed-size array.
    #[must_use]
    pub fn encode(&self) -> [u8; ENCODED_HEADER_LEN] {
        let mut out = [0u8; ENCODED_HEADER_LEN];
        let mut writer = FieldWriter {
            buf: &mut out,
            at: 0,
        };
        writer.put_u64(BUFFER_MAGIC);
        writer.put_u32(HEADER_FORMAT_VERSION);
        writer.put_u8(self.buffering_mode.as_u8());
        writer.put_bytes(&[0u8; 3]);
        writer.put_u64(self.total_size);
        writer.put_u64(self.durable_size);
        writer.put_u64(self.rolling_size);
        writer.put_u64(self.durable_data_end);
        writer.put_u64(self.rolling_data_end[0]);
        writer.put_u64(self.rolling_data_end[1]);
        writer.put_u64(self.wrapped_count);
        writer.put_u64(self.records_dropped);
        out
    }

    /// Encode into the first [`ENCODED_HEADER_LEN`] bytes of `out`.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError::Truncated`] if `out` is too short; `out` is
    /// left untouched in that case.
    pub fn encode_to(&self, out: &mut [u8]) -> Result<(), HeaderError> {
        let slot = out
            .get_mut(..ENCODED_HEADER_LEN)
            .ok_or(HeaderError::Truncated)?;
        slot.copy_from_slice(&self.encode());
        Ok(())
    }

    /// Decode from the first [`ENCODED_HEADER_LEN`] bytes of `buf`.
    ///
    /// # Errors
    ///
    /// Returns a [`HeaderError`] if the buffer is too short, the magic or
    /// version do not match, or the mode byte is unknown.
    pub fn decode(buf: &[u8]) -> Result<Self, HeaderError> {
        let mut reader = FieldReader { buf, at: 0 };

        let magic = reader.take_u64()?;
        if magic != BUFFER_MAGIC {
            return Err(HeaderError::BadMagic(magic));
        }
        let version = reader.take_u32()?;
        if version != HEADER_FORMAT_VERSION {
            return Err(HeaderError::UnsupportedVersion(version));
        }
        let mode_byte = reader.take_u8()?;
        let buffering_mode =
            BufferingMode::from_u8(mode_byte).ok_or(HeaderError::InvalidMode(mode_byte))?;
        reader.skip(3)?;

        Ok(Self {
            buffering_mode,
            total_size: reader.take_u64()?,
            durable_size: reader.take_u64()?,
            rolling_size: reader.take_u64()?,
            durable_data_end: reader.take_u64()?,
            rolling_data_end: [reader.take_u64()?, reader.take_u64()?],
            wrapped_count: reader.take_u64()?,
            records_dropped: reader.take_u64()?,
        })
    }
}

struct FieldWriter<'a> {
    buf: &'a mut [u8],
    at: usize,
}

impl FieldWriter<'_> {
    fn put_bytes(&mut self, bytes: &[u8]) {
        // Writers are only constructed over exactly sized buffers; a short
        // window drops the write rather than panicking.
        if let Some(end) = self.at.checked_add(bytes.len())
            && let Some(slot) = self.buf.get_mut(self.at..end)
        {
            slot.copy_from_slice(bytes);
            self.at = end;
        }
    }

    fn put_u8(&mut self, value: u8) {
        self.put_bytes(&[value]);
    }

    fn put_u32(&mut self, value: u32) {
        self.put_bytes(&value.to_le_bytes());
    }

    fn put_u64(&mut self, value: u64) {
        self.put_bytes(&value.to_le_bytes());
    }
}

struct FieldReader<'a> {
    buf: &'a [u8],
    at: usize,
}

impl FieldReader<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], HeaderError> {
        let end = self.at.checked_add(N).ok_or(HeaderError::Truncated)?;
        let bytes = self.buf.get(self.at..end).ok_or(HeaderError::Truncated)?;
        self.at = end;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn take_u8(&mut self) -> Result<u8, HeaderError> {
        self.take::<1>().map(|bytes| bytes[0])
    }

    fn take_u32(&mut self) -> Result<u32, HeaderError> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    fn take_u64(&mut self) -> Result<u64, HeaderError> {
        self.take::<8>().map(u64::from_le_bytes)
    }

    fn skip(&mut self, count: usize) -> Result<(), HeaderError> {
        let end = self.at.checked_add(count).ok_or(HeaderError::Truncated)?;
        if end > self.buf.len() {
            return Err(HeaderError::Truncated);
        }
        self.at = end;
        Ok(())
    }
}
