//! On-disk record codec: header layout, CRC integrity, and the
//! `PositionalIndex` encoding used by hint files.
//!
//! Wire format (left to right): `crc(4, LE) | type(1) | key_size(varint) |
//! value_size(varint) | key | value`. The CRC is an IEEE CRC-32 computed
//! over every byte of the record after the CRC field itself, including
//! the transaction-sequence prefix carried inside `key`.

use bytes::Bytes;
use integer_encoding::{VarInt, VarIntWriter};

use crate::error::{Error, Result};

/// Upper bound on header size: 4 (crc) + 1 (type) + 5 + 5 (two max-width
/// signed varints for a 32-bit length).
pub const MAX_LOG_RECORD_HEADER_SIZE: usize = 4 + 1 + 5 + 5;

/// The kind of a [`LogRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordType {
    /// A live put.
    Normal = 0,
    /// A tombstone.
    Deleted = 1,
    /// Terminates and commits a transaction group during recovery.
    TxnFinished = 2,
}

impl LogRecordType {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Normal),
            1 => Some(Self::Deleted),
            2 => Some(Self::TxnFinished),
            _ => None,
        }
    }
}

/// A durable unit appended to a data file. `key` carries the
/// transaction-sequence prefix; callers that want the user-visible key
/// must strip it first (see [`crate::batch::split_seq_key`]).
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// On-disk key, including its sequence-number prefix.
    pub key: Bytes,
    /// Value bytes; empty for deletions and the `TxnFinished` marker.
    pub value: Bytes,
    /// Record kind.
    pub record_type: LogRecordType,
}

/// The fixed+variable header decoded from the front of a record.
#[derive(Debug, Clone, Copy)]
pub struct LogRecordHeader {
    /// Stored CRC-32.
    pub crc: u32,
    /// Record kind.
    pub record_type: LogRecordType,
    /// Length of the key that follows the header.
    pub key_size: u32,
    /// Length of the value that follows the key.
    pub value_size: u32,
}

impl LogRecord {
    /// Encodes the record, returning the bytes and their length.
    #[must_use]
    pub fn encode(&self) -> (Vec<u8>, usize) {
        let mut header = Vec::with_capacity(MAX_LOG_RECORD_HEADER_SIZE);
        header.extend_from_slice(&[0u8; 4]);
        header.push(self.record_type as u8);
        header
            .write_varint(self.key.len() as i64)
            .expect("writing to a Vec<u8> never fails");
        header
            .write_varint(self.value.len() as i64)
            .expect("writing to a Vec<u8> never fails");

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header[4..]);
        hasher.update(&self.key);
        hasher.update(&self.value);
        let crc = hasher.finalize();
        header[0..4].copy_from_slice(&crc.to_le_bytes());

        let mut buf = header;
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        let size = buf.len();
        (buf, size)
    }
}

/// Decodes just the header from the front of `bytes`.
///
/// Returns `Ok(None)` when `bytes` is too short to hold a header, or
/// when the decoded header is all-zero (end-of-stream padding).
pub fn decode_header(bytes: &[u8]) -> Result<Option<(LogRecordHeader, usize)>> {
    if bytes.len() <= 4 {
        return Ok(None);
    }
    let crc = u32::from_le_bytes(bytes[0..4].try_into().expect("4-byte slice"));
    let Some(record_type) = LogRecordType::from_u8(bytes[4]) else {
        return Ok(None);
    };
    let rest = &bytes[5..];
    let Some((key_size, n1)) = i64::decode_var(rest) else {
        return Ok(None);
    };
    let Some((value_size, n2)) = i64::decode_var(&rest[n1..]) else {
        return Ok(None);
    };
    if crc == 0 && key_size == 0 && value_size == 0 {
        return Ok(None);
    }
    if key_size < 0 || value_size < 0 {
        return Err(Error::DataDirectoryCorrupted);
    }
    let header_len = 5 + n1 + n2;
    Ok(Some((
        LogRecordHeader {
            crc,
            record_type,
            key_size: key_size as u32,
            value_size: value_size as u32,
        },
        header_len,
    )))
}

/// Decodes a full record (header + key + value) from `buf`, verifying
/// its CRC. `buf` must contain at least `header_len + key_size +
/// value_size` bytes past the header as returned by [`decode_header`].
///
/// Returns `Ok(None)` on clean end-of-stream (see [`decode_header`]).
pub fn decode_record(buf: &[u8]) -> Result<Option<(LogRecord, usize)>> {
    let Some((header, header_len)) = decode_header(buf)? else {
        return Ok(None);
    };
    let key_size = header.key_size as usize;
    let value_size = header.value_size as usize;
    let total = header_len + key_size + value_size;
    if buf.len() < total {
        return Ok(None);
    }
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf[4..total]);
    let crc = hasher.finalize();
    if crc != header.crc {
        return Err(Error::DataDirectoryCorrupted);
    }
    let key = Bytes::copy_from_slice(&buf[header_len..header_len + key_size]);
    let value = Bytes::copy_from_slice(&buf[header_len + key_size..total]);
    Ok(Some((
        LogRecord {
            key,
            value,
            record_type: header.record_type,
        },
        total,
    )))
}

/// A `(file_id, offset, size)` triple identifying exactly one record on
/// disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionalIndex {
    /// Id of the data file containing the record.
    pub file_id: u32,
    /// Byte offset of the record within that file.
    pub offset: u64,
    /// Encoded length of the record.
    pub size: u64,
}

/// Encodes `(file_id, offset)` as two signed varints; used inside hint
/// records. `size` is not persisted — a hint-loaded position is always
/// read back through a full header decode, which recovers it.
#[must_use]
pub fn encode_position(pos: PositionalIndex) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10);
    buf.write_varint(i64::from(pos.file_id))
        .expect("writing to a Vec<u8> never fails");
    buf.write_varint(pos.offset as i64)
        .expect("writing to a Vec<u8> never fails");
    buf
}

/// Inverse of [`encode_position`]. The returned `size` is always 0.
#[must_use]
pub fn decode_position(bytes: &[u8]) -> Option<PositionalIndex> {
    let (file_id, n1) = i64::decode_var(bytes)?;
    let (offset, _n2) = i64::decode_var(&bytes[n1..])?;
    if file_id < 0 || offset < 0 {
        return None;
    }
    Some(PositionalIndex {
        file_id: file_id as u32,
        offset: offset as u64,
        size: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_normal_record() {
        let record = LogRecord {
            key: Bytes::from_static(b"name"),
            value: Bytes::from_static(b"sakura"),
            record_type: LogRecordType::Normal,
        };
        let (buf, size) = record.encode();
        assert_eq!(buf.len(), size);
        let (decoded, decoded_size) = decode_record(&buf).unwrap().unwrap();
        assert_eq!(decoded_size, size);
        assert_eq!(decoded.key, record.key);
        assert_eq!(decoded.value, record.value);
        assert_eq!(decoded.record_type, record.record_type);
    }

    #[test]
    fn round_trip_empty_value() {
        let record = LogRecord {
            key: Bytes::from_static(b"name"),
            value: Bytes::new(),
            record_type: LogRecordType::Normal,
        };
        let (buf, _) = record.encode();
        let (decoded, _) = decode_record(&buf).unwrap().unwrap();
        assert!(decoded.value.is_empty());
    }

    #[test]
    fn round_trip_deleted_record() {
        let record = LogRecord {
            key: Bytes::from_static(b"name"),
            value: Bytes::from_static(b"sakurasss"),
            record_type: LogRecordType::Deleted,
        };
        let (buf, _) = record.encode();
        let (decoded, _) = decode_record(&buf).unwrap().unwrap();
        assert_eq!(decoded.record_type, LogRecordType::Deleted);
    }

    #[test]
    fn corrupted_crc_is_rejected() {
        let record = LogRecord {
            key: Bytes::from_static(b"name"),
            value: Bytes::from_static(b"sakura"),
            record_type: LogRecordType::Normal,
        };
        let (mut buf, _) = record.encode();
        let last = buf.len() - 1;
        buf[last] ^= 0xff;
        assert!(decode_record(&buf).is_err());
    }

    #[test]
    fn all_zero_padding_signals_eof() {
        let padding = vec![0u8; 32];
        assert!(decode_record(&padding).unwrap().is_none());
    }

    #[test]
    fn position_round_trip() {
        let pos = PositionalIndex {
            file_id: 42,
            offset: 123_456,
            size: 0,
        };
        let encoded = encode_position(pos);
        let decoded = decode_position(&encoded).unwrap();
        assert_eq!(decoded.file_id, pos.file_id);
        assert_eq!(decoded.offset, pos.offset);
    }
}
