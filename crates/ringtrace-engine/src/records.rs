//! Registration record encoding for the durable region.
//!
//! String and thread registrations are the only records the engine itself
//! writes. Each record is an 8-byte little-endian header word followed by a
//! payload padded to the next 8-byte boundary:
//!
//! ```text
//! byte 0      tag (1 = string, 2 = thread)
//! byte 1      reserved, zero
//! bytes 2..4  index (u16 LE; thread indices use the low byte)
//! bytes 4..8  payload length in bytes (u32 LE, before padding)
//! ```
//!
//! A zero tag terminates the stream; the durable region starts zeroed and is
//! never rewritten, so the bytes after the last record always read as the
//! terminator.

use core::num::{NonZeroU8, NonZeroU16};
use core::str;

use ringtrace_buffer::Reservation;

/// Record tag for a string registration. Payload is the UTF-8 literal.
pub const STRING_RECORD_TAG: u8 = 1;

/// Record tag for a thread registration. Payload is the thread serial (u64 LE).
pub const THREAD_RECORD_TAG: u8 = 2;

const HEADER_LEN: usize = 8;

/// Total encoded length of a record with a `payload_len`-byte payload.
#[must_use]
pub fn encoded_record_len(payload_len: usize) -> usize {
    HEADER_LEN + payload_len.div_ceil(8) * 8
}

fn encode_header(tag: u8, index: u16, payload_len: u32) -> [u8; HEADER_LEN] {
    let index_bytes = index.to_le_bytes();
    let len_bytes = payload_len.to_le_bytes();
    let mut header = [0u8; HEADER_LEN];
    header[0] = tag;
    header[2] = index_bytes[0];
    header[3] = index_bytes[1];
    header[4] = len_bytes[0];
    header[5] = len_bytes[1];
    header[6] = len_bytes[2];
    header[7] = len_bytes[3];
    header
}

/// Write a string registration record into `reservation`.
///
/// The reservation must be at least [`encoded_record_len`] of the literal's
/// byte length; returns whether the record was written.
pub fn write_string_record(
    reservation: &Reservation<'_>,
    index: NonZeroU16,
    value: &str,
) -> bool {
    let Ok(payload_len) = u32::try_from(value.len()) else {
        return false;
    };
    let header = encode_header(STRING_RECORD_TAG, index.get(), payload_len);
    reservation.write_bytes(&header) && reservation.write_at(HEADER_LEN, value.as_bytes())
}

/// Write a thread registration record into `reservation`.
pub fn write_thread_record(
    reservation: &Reservation<'_>,
    index: NonZeroU8,
    serial: u64,
) -> bool {
    let header = encode_header(THREAD_RECORD_TAG, u16::from(index.get()), 8);
    reservation.write_bytes(&header) && reservation.write_at(HEADER_LEN, &serial.to_le_bytes())
}

/// One decoded registration record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurableRecord<'a> {
    /// A string literal bound to a compact index for this session.
    String {
        /// The index later records use to reference the literal.
        index: u16,
        /// The registered literal.
        value: &'a str,
    },
    /// A thread identity bound to a compact index for this session.
    Thread {
        /// The index later records use to reference the thread.
        index: u8,
        /// Process-unique serial of the registered thread.
        serial: u64,
    },
}

/// Iterator over the registration records in a durable region snapshot.
///
/// Stops at the zero-tag terminator, at the end of the input, or at the first
/// record it cannot decode. A handler resolving indices from a partially
/// saved region sees every record that was completely written.
#[derive(Debug, Clone)]
pub struct DurableRecords<'a> {
    bytes: &'a [u8],
}

impl<'a> DurableRecords<'a> {
    /// Decode records from a durable region snapshot.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }
}

impl<'a> Iterator for DurableRecords<'a> {
    type Item = DurableRecord<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let header = self.bytes.get(..HEADER_LEN)?;
        let mut word = [0u8; HEADER_LEN];
        word.copy_from_slice(header);

        let tag = word[0];
        if tag == 0 {
            return None;
        }
        let index = u16::from_le_bytes([word[2], word[3]]);
        let payload_len = usize::try_from(u32::from_le_bytes([word[4], word[5], word[6], word[7]]))
            .ok()?;

        let payload_end = HEADER_LEN.checked_add(payload_len)?;
        let payload = self.bytes.get(HEADER_LEN..payload_end)?;
        let next_record = HEADER_LEN.checked_add(payload_len.div_ceil(8).checked_mul(8)?)?;
        let rest = self.bytes.get(next_record..).unwrap_or(&[]);

        let record = match tag {
            STRING_RECORD_TAG => DurableRecord::String {
                index,
                value: str::from_utf8(payload).ok()?,
            },
            THREAD_RECORD_TAG => {
                if payload.len() != 8 {
                    return None;
                }
                let mut serial = [0u8; 8];
                serial.copy_from_slice(payload);
                DurableRecord::Thread {
                    index: u8::try_from(index & 0xFF).ok()?,
                    serial: u64::from_le_bytes(serial),
                }
            }
            _ => return None,
        };
        self.bytes = rest;
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringtrace_buffer::RecordArena;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_string_record_round_trip() -> TestResult {
        let arena = RecordArena::new(64);
        let index = NonZeroU16::new(7).ok_or("index")?;
        let len = encoded_record_len("requests".len());
        let reservation = arena.reserve(0, len).ok_or("reserve")?;
        assert!(write_string_record(&reservation, index, "requests"));

        let bytes = arena.snapshot_range(0, 64).ok_or("snapshot")?;
        let records: Vec<_> = DurableRecords::new(&bytes).collect();
        assert_eq!(
            records,
            vec![DurableRecord::String {
                index: 7,
                value: "requests"
            }]
        );
        Ok(())
    }

    #[test]
    fn test_thread_record_round_trip() -> TestResult {
        let arena = RecordArena::new(32);
        let index = NonZeroU8::new(3).ok_or("index")?;
        let reservation = arena.reserve(0, encoded_record_len(8)).ok_or("reserve")?;
        assert!(write_thread_record(&reservation, index, 0xDEAD_BEEF));

        let bytes = arena.snapshot_range(0, 32).ok_or("snapshot")?;
        let records: Vec<_> = DurableRecords::new(&bytes).collect();
        assert_eq!(
            records,
            vec![DurableRecord::Thread {
                index: 3,
                serial: 0xDEAD_BEEF
            }]
        );
        Ok(())
    }

    #[test]
    fn test_records_decode_in_sequence() -> TestResult {
        let arena = RecordArena::new(128);
        let mut offset = 0u64;
        for (index, value) in [(1u16, "alpha"), (2, "beta"), (3, "a_longer_category_name")] {
            let len = encoded_record_len(value.len());
            let reservation = arena.reserve(offset, len).ok_or("reserve")?;
            let index = NonZeroU16::new(index).ok_or("index")?;
            assert!(write_string_record(&reservation, index, value));
            offset += len as u64;
        }

        let bytes = arena.snapshot_range(0, 128).ok_or("snapshot")?;
        let values: Vec<_> = DurableRecords::new(&bytes)
            .map(|record| match record {
                DurableRecord::String { value, .. } => value.to_owned(),
                DurableRecord::Thread { .. } => String::new(),
            })
            .collect();
        assert_eq!(values, vec!["alpha", "beta", "a_longer_category_name"]);
        Ok(())
    }

    #[test]
    fn test_zero_tag_terminates() {
        let bytes = [0u8; 32];
        assert_eq!(DurableRecords::new(&bytes).count(), 0);
    }

    #[test]
    fn test_truncated_record_stops_decoding() {
        // Header claims 16 payload bytes but only 8 follow.
        let header = encode_header(STRING_RECORD_TAG, 1, 16);
        let mut bytes = Vec::from(header);
        bytes.extend_from_slice(&[b'x'; 8]);
        assert_eq!(DurableRecords::new(&bytes).count(), 0);
    }

    #[test]
    fn test_unknown_tag_stops_decoding() {
        let mut bytes = Vec::from(encode_header(9, 1, 0));
        bytes.extend_from_slice(&encode_header(STRING_RECORD_TAG, 2, 0));
        assert_eq!(DurableRecords::new(&bytes).count(), 0);
    }

    #[test]
    fn test_empty_payload_string() {
        let bytes = encode_header(STRING_RECORD_TAG, 5, 0);
        let records: Vec<_> = DurableRecords::new(&bytes).collect();
        assert_eq!(records, vec![DurableRecord::String { index: 5, value: "" }]);
    }

    #[test]
    fn test_encoded_len_is_padded() {
        assert_eq!(encoded_record_len(0), 8);
        assert_eq!(encoded_record_len(1), 16);
        assert_eq!(encoded_record_len(8), 16);
        assert_eq!(encoded_record_len(9), 24);
    }
}
