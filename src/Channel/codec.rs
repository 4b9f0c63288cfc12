//! Binary layout of one record inside a slot.
//!
//! ```text
//! +----------------------+-------------------+------+
//! | len: u64 (LE, 8 B)   | text (len bytes)  | 0x00 |
//! +----------------------+-------------------+------+
//! ```
//!
//! Records are packed back to back from offset 0. A zero length field marks
//! the end of the records, so a zero-filled slot decodes to nothing.

use crate::errors::FormatError;

pub const LENGTH_FIELD_SIZE: usize = 8;
pub const TERMINATOR: u8 = 0;
/// Bytes a record occupies beyond its text.
pub const RECORD_OVERHEAD: usize = LENGTH_FIELD_SIZE + 1;

#[inline]
pub fn serialized_size(text_len: usize) -> usize {
    RECORD_OVERHEAD + text_len
}

pub fn serialize(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(serialized_size(text.len()));
    out.extend_from_slice(&(text.len() as u64).to_le_bytes());
    out.extend_from_slice(text.as_bytes());
    out.push(TERMINATOR);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded<'a> {
    Record { text: &'a str, consumed: usize },
    EndOfRecords,
}

/// Decode the record starting at `offset`. The buffer length is taken as
/// the slot capacity.
///
/// Fewer than [`LENGTH_FIELD_SIZE`] bytes left is the end of the records if
/// they are zero padding, and a truncated length field otherwise.
pub fn deserialize(buf: &[u8], offset: usize) -> Result<Decoded<'_>, FormatError> {
    let capacity = buf.len();
    let Some(field_end) = offset.checked_add(LENGTH_FIELD_SIZE).filter(|&end| end <= capacity) else {
        let tail = buf.get(offset..).unwrap_or_default();
        if tail.iter().all(|&b| b == 0) {
            return Ok(Decoded::EndOfRecords);
        }
        return Err(FormatError::Truncated { offset, needed: LENGTH_FIELD_SIZE, capacity });
    };

    let mut field = [0u8; LENGTH_FIELD_SIZE];
    field.copy_from_slice(&buf[offset..field_end]);
    let raw_len = u64::from_le_bytes(field);
    if raw_len == 0 {
        return Ok(Decoded::EndOfRecords);
    }

    let needed = usize::try_from(raw_len)
        .ok()
        .and_then(|len| len.checked_add(RECORD_OVERHEAD))
        .ok_or(FormatError::LengthOverflow { offset, len: raw_len })?;
    if needed > capacity - offset {
        return Err(FormatError::Truncated { offset, needed, capacity });
    }

    let text_end = field_end + raw_len as usize;
    if buf[text_end] != TERMINATOR {
        return Err(FormatError::MissingTerminator { offset });
    }
    let text = std::str::from_utf8(&buf[field_end..text_end]).map_err(|_| FormatError::InvalidUtf8 { offset })?;
    Ok(Decoded::Record { text, consumed: needed })
}

/// Iterate over the records of a slot image, stopping after the first error.
pub fn records(buf: &[u8]) -> Records<'_> {
    Records { buf, offset: 0, done: false }
}

pub struct Records<'a> {
    buf: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> Records<'a> {
    /// Offset of the next record to decode.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<&'a str, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match deserialize(self.buf, self.offset) {
            Ok(Decoded::Record { text, consumed }) => {
                self.offset += consumed;
                Some(Ok(text))
            }
            Ok(Decoded::EndOfRecords) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot_with(records: &[&str], capacity: usize) -> Vec<u8> {
        let mut slot = vec![0u8; capacity];
        let mut cursor = 0;
        for r in records {
            let bytes = serialize(r);
            slot[cursor..cursor + bytes.len()].copy_from_slice(&bytes);
            cursor += bytes.len();
        }
        slot
    }

    #[test]
    fn test_layout() {
        let bytes = serialize("hello");
        assert_eq!(bytes.len(), 14);
        assert_eq!(&bytes[..8], &5u64.to_le_bytes());
        assert_eq!(&bytes[8..13], b"hello");
        assert_eq!(bytes[13], TERMINATOR);
    }

    #[test]
    fn test_round_trip() {
        for text in ["a", "hello world", "ünïcödé ✓", "z".repeat(247).as_str()] {
            let slot = slot_with(&[text], 1024);
            match deserialize(&slot, 0).unwrap() {
                Decoded::Record { text: decoded, consumed } => {
                    assert_eq!(decoded, text);
                    assert_eq!(consumed, serialized_size(text.len()));
                }
                Decoded::EndOfRecords => panic!("expected a record"),
            }
        }
    }

    #[test]
    fn test_zero_slot_is_end_of_records() {
        let slot = vec![0u8; 1024];
        assert_eq!(deserialize(&slot, 0).unwrap(), Decoded::EndOfRecords);
        assert_eq!(records(&slot).count(), 0);
    }

    #[test]
    fn test_records_in_order() {
        let slot = slot_with(&["hello", "world"], 64);
        let decoded: Vec<_> = records(&slot).collect::<Result<_, _>>().unwrap();
        assert_eq!(decoded, ["hello", "world"]);
    }

    #[test]
    fn test_record_filling_slot_exactly() {
        let slot = slot_with(&["q".repeat(64 - RECORD_OVERHEAD).as_str()], 64);
        let decoded: Vec<_> = records(&slot).collect::<Result<_, _>>().unwrap();
        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn test_short_zero_tail_is_padding() {
        // 12 bytes used, 4 left: not enough for a length field
        let slot = slot_with(&["abc"], 16);
        let mut it = records(&slot);
        assert_eq!(it.next().unwrap().unwrap(), "abc");
        assert!(it.next().is_none());
        assert_eq!(it.offset(), 12);
    }

    #[test]
    fn test_short_nonzero_tail_is_format_error() {
        let mut slot = slot_with(&["abc"], 16);
        slot[12..].fill(0xAA);
        let mut it = records(&slot);
        assert_eq!(it.next().unwrap().unwrap(), "abc");
        assert_eq!(
            it.next(),
            Some(Err(FormatError::Truncated { offset: 12, needed: LENGTH_FIELD_SIZE, capacity: 16 }))
        );
        assert!(it.next().is_none());
    }

    #[test]
    fn test_overflowing_length_is_format_error() {
        let mut slot = vec![0u8; 64];
        slot[..8].copy_from_slice(&100u64.to_le_bytes());
        assert_eq!(
            deserialize(&slot, 0),
            Err(FormatError::Truncated { offset: 0, needed: 109, capacity: 64 })
        );

        slot[..8].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            deserialize(&slot, 0),
            Err(FormatError::LengthOverflow { .. }) | Err(FormatError::Truncated { .. })
        ));
    }

    #[test]
    fn test_missing_terminator() {
        let mut slot = slot_with(&["abc"], 32);
        slot[11] = b'!';
        assert_eq!(deserialize(&slot, 0), Err(FormatError::MissingTerminator { offset: 0 }));
    }

    #[test]
    fn test_error_stops_iteration_after_good_records() {
        let mut slot = slot_with(&["good"], 64);
        slot[13..21].copy_from_slice(&500u64.to_le_bytes());
        let items: Vec<_> = records(&slot).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Ok("good"));
        assert!(matches!(items[1], Err(FormatError::Truncated { offset: 13, .. })));
    }
}
