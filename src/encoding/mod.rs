//! Deterministic, hand-written binary codec for on-disk records.
//!
//! CinderKV owns its wire format: no serialization library sits between
//! the engine and the bytes on disk, so the representation never changes
//! due to a dependency upgrade. All multi-byte integers are
//! **little-endian** with fixed widths.
//!
//! # Record format
//!
//! ```text
//! record := u32 key_len | key_bytes | u8 tag | (u32 val_len | val_bytes)?
//! ```
//!
//! `tag = 0` encodes a tombstone and omits the value fields entirely;
//! `tag = 1` encodes a present value (which may be empty).
//!
//! # Zero-panic guarantee
//!
//! No function in this module uses `unwrap()`, `expect()`, or indexing
//! that can panic on attacker-controlled input. All decode failures are
//! reported via [`EncodingError`].

#[cfg(test)]
mod tests;

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Value tag marking a tombstone record (no value fields follow).
pub const TAG_TOMBSTONE: u8 = 0;

/// Value tag marking a present value (`u32` length + bytes follow).
pub const TAG_PRESENT: u8 = 1;

/// Width of a length prefix (`u32`).
pub const LEN_SIZE: usize = 4;

/// Width of the value tag.
pub const TAG_SIZE: usize = 1;

/// Width of a run-file index offset and of the trailer (`u64`).
pub const OFFSET_SIZE: usize = 8;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced while decoding on-disk records.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// The buffer ran out of bytes before decoding completed.
    #[error("unexpected end of buffer (need {needed} bytes, have {available})")]
    UnexpectedEof {
        /// Bytes required to continue decoding.
        needed: usize,
        /// Bytes actually remaining.
        available: usize,
    },

    /// The value tag was neither [`TAG_TOMBSTONE`] nor [`TAG_PRESENT`].
    #[error("invalid value tag: 0x{0:02X}")]
    InvalidTag(u8),
}

// ------------------------------------------------------------------------------------------------
// Primitive readers
// ------------------------------------------------------------------------------------------------

/// Reads a little-endian `u32` from the start of `buf`.
pub fn read_u32(buf: &[u8]) -> Result<u32, EncodingError> {
    let bytes: [u8; 4] = buf
        .get(..4)
        .and_then(|s| s.try_into().ok())
        .ok_or(EncodingError::UnexpectedEof {
            needed: 4,
            available: buf.len(),
        })?;
    Ok(u32::from_le_bytes(bytes))
}

/// Reads a little-endian `u64` from the start of `buf`.
pub fn read_u64(buf: &[u8]) -> Result<u64, EncodingError> {
    let bytes: [u8; 8] = buf
        .get(..8)
        .and_then(|s| s.try_into().ok())
        .ok_or(EncodingError::UnexpectedEof {
            needed: 8,
            available: buf.len(),
        })?;
    Ok(u64::from_le_bytes(bytes))
}

// ------------------------------------------------------------------------------------------------
// Record encode / decode
// ------------------------------------------------------------------------------------------------

/// A zero-copy view of a single decoded record.
#[derive(Debug, PartialEq, Eq)]
pub struct RecordRef<'a> {
    /// The record key.
    pub key: &'a [u8],

    /// The record value; `None` for a tombstone.
    pub value: Option<&'a [u8]>,

    /// Total number of bytes the record occupies on disk.
    pub encoded_len: usize,
}

/// Returns the on-disk size of a record with the given key and value lengths.
pub fn record_encoded_len(key_len: usize, value_len: Option<usize>) -> usize {
    match value_len {
        Some(v) => LEN_SIZE + key_len + TAG_SIZE + LEN_SIZE + v,
        None => LEN_SIZE + key_len + TAG_SIZE,
    }
}

/// Appends one encoded record to `buf`.
///
/// `value = None` writes a tombstone: the tag byte alone, with no value
/// length or bytes.
pub fn encode_record(key: &[u8], value: Option<&[u8]>, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(key);
    match value {
        Some(v) => {
            buf.push(TAG_PRESENT);
            buf.extend_from_slice(&(v.len() as u32).to_le_bytes());
            buf.extend_from_slice(v);
        }
        None => buf.push(TAG_TOMBSTONE),
    }
}

/// Decodes one record from the start of `buf`.
///
/// Returns borrowed key/value slices plus the total encoded length, so
/// callers can step through a record stream without copying.
pub fn decode_record(buf: &[u8]) -> Result<RecordRef<'_>, EncodingError> {
    let key_len = read_u32(buf)? as usize;
    let mut cursor = LEN_SIZE;

    let key = buf
        .get(cursor..cursor + key_len)
        .ok_or(EncodingError::UnexpectedEof {
            needed: key_len,
            available: buf.len().saturating_sub(cursor),
        })?;
    cursor += key_len;

    let tag = *buf.get(cursor).ok_or(EncodingError::UnexpectedEof {
        needed: TAG_SIZE,
        available: 0,
    })?;
    cursor += TAG_SIZE;

    let value = match tag {
        TAG_TOMBSTONE => None,
        TAG_PRESENT => {
            let value_len = read_u32(&buf[cursor..])? as usize;
            cursor += LEN_SIZE;
            let value =
                buf.get(cursor..cursor + value_len)
                    .ok_or(EncodingError::UnexpectedEof {
                        needed: value_len,
                        available: buf.len().saturating_sub(cursor),
                    })?;
            cursor += value_len;
            Some(value)
        }
        other => return Err(EncodingError::InvalidTag(other)),
    };

    Ok(RecordRef {
        key,
        value,
        encoded_len: cursor,
    })
}
