//! Record codec: encoding and decoding of a single on-disk record.
//!
//! ## Record format
//!
//! ```text
//! | crc32 (4) | timestamp (4) | key_size (4) | value_size (4) | key (key_size) | value (value_size) |
//! ```
//!
//! All multi-byte integers are big-endian. The CRC32 (IEEE/zlib polynomial)
//! covers the raw big-endian timestamp bytes followed by the key and value
//! bytes — it does not cover `key_size`/`value_size`, which exist only to
//! frame the record.

use crate::error::{CaskError, CaskResult};

/// Size in bytes of the CRC32 field.
pub const CRC_SIZE: usize = 4;
/// Size in bytes of the header (timestamp + key_size + value_size).
pub const HEADER_SIZE: usize = 12;
/// Size in bytes of the preamble (CRC + header) preceding key/value bytes.
pub const PREAMBLE_SIZE: usize = CRC_SIZE + HEADER_SIZE;

/// The decoded header fields of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// UTC epoch seconds at write time.
    pub timestamp: u32,
    /// Length in bytes of the key.
    pub key_size: u32,
    /// Length in bytes of the value.
    pub value_size: u32,
}

impl Header {
    /// Total bytes occupied by the header's framed key and value.
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        self.key_size + self.value_size
    }

    /// Total bytes of the full record this header describes.
    #[must_use]
    pub fn frame_size(&self) -> u32 {
        PREAMBLE_SIZE as u32 + self.payload_size()
    }
}

/// A fully decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// UTC epoch seconds at write time.
    pub timestamp: u32,
    /// Decoded UTF-8 key.
    pub key: String,
    /// Decoded UTF-8 value. Empty for a tombstone.
    pub value: String,
}

impl Record {
    /// Returns whether this record is a tombstone (`value_size == 0`).
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_empty()
    }
}

/// Encodes a header from its three fields.
///
/// Fails with [`CaskError::SizeViolation`] if either size does not fit in a
/// `u32` — sizes are taken as `usize` at the call site and are never
/// negative in Rust, but very large inputs are rejected rather than
/// silently truncated.
pub fn encode_header(timestamp: u32, key_size: usize, value_size: usize) -> CaskResult<[u8; HEADER_SIZE]> {
    let key_size = u32::try_from(key_size)
        .map_err(|_| CaskError::size_violation("key size exceeds u32 range"))?;
    let value_size = u32::try_from(value_size)
        .map_err(|_| CaskError::size_violation("value size exceeds u32 range"))?;

    let mut buf = [0u8; HEADER_SIZE];
    buf[0..4].copy_from_slice(&timestamp.to_be_bytes());
    buf[4..8].copy_from_slice(&key_size.to_be_bytes());
    buf[8..12].copy_from_slice(&value_size.to_be_bytes());
    Ok(buf)
}

/// Decodes a header from its 12 raw bytes.
pub fn decode_header(bytes: &[u8; HEADER_SIZE]) -> Header {
    let timestamp = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let key_size = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let value_size = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    Header {
        timestamp,
        key_size,
        value_size,
    }
}

fn compute_crc(timestamp: u32, key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&timestamp.to_be_bytes());
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

/// Encodes a full record, returning the combined key+value payload size and
/// the encoded bytes (`crc32 || header || key || value`).
pub fn encode_record(timestamp: u32, key: &str, value: &str) -> CaskResult<(u32, Vec<u8>)> {
    let key_bytes = key.as_bytes();
    let value_bytes = value.as_bytes();

    let header = encode_header(timestamp, key_bytes.len(), value_bytes.len())?;
    let crc = compute_crc(timestamp, key_bytes, value_bytes);

    let mut buf = Vec::with_capacity(PREAMBLE_SIZE + key_bytes.len() + value_bytes.len());
    buf.extend_from_slice(&crc.to_be_bytes());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(key_bytes);
    buf.extend_from_slice(value_bytes);

    let payload_size = u32::try_from(key_bytes.len() + value_bytes.len())
        .map_err(|_| CaskError::size_violation("payload size exceeds u32 range"))?;

    Ok((payload_size, buf))
}

/// Decodes a full record (`crc32 || header || key || value`), validating the
/// checksum and UTF-8 decoding of the key and value.
pub fn decode_record(data: &[u8]) -> CaskResult<Record> {
    if data.len() < PREAMBLE_SIZE {
        return Err(CaskError::bad_encoding("record shorter than preamble"));
    }

    let stored_crc = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let header_bytes: [u8; HEADER_SIZE] = data[CRC_SIZE..PREAMBLE_SIZE]
        .try_into()
        .expect("slice is exactly HEADER_SIZE bytes");
    let header = decode_header(&header_bytes);

    let key_start = PREAMBLE_SIZE;
    let key_end = key_start + header.key_size as usize;
    let value_end = key_end + header.value_size as usize;

    if data.len() < value_end {
        return Err(CaskError::bad_encoding("record shorter than framed size"));
    }

    let key_bytes = &data[key_start..key_end];
    let value_bytes = &data[key_end..value_end];

    let computed_crc = compute_crc(header.timestamp, key_bytes, value_bytes);
    if computed_crc != stored_crc {
        return Err(CaskError::BadChecksum {
            expected: stored_crc,
            actual: computed_crc,
        });
    }

    let key = std::str::from_utf8(key_bytes)
        .map_err(|e| CaskError::bad_encoding(format!("key is not valid UTF-8: {e}")))?
        .to_string();
    let value = std::str::from_utf8(value_bytes)
        .map_err(|e| CaskError::bad_encoding(format!("value is not valid UTF-8: {e}")))?
        .to_string();

    Ok(Record {
        timestamp: header.timestamp,
        key,
        value,
    })
}
