//! Fixed-size primitive codecs writing at explicit byte offsets.
//!
//! Encoders write into frames sized up front (see
//! [`Frame::zeroed`](crate::protocol::Frame::zeroed)); decoders check bounds
//! and report short frames as protocol errors.

use uuid::Uuid;

use crate::error::{GridError, Result};
use crate::protocol::constants::*;

fn field<'a>(buf: &'a [u8], offset: usize, len: usize) -> Result<&'a [u8]> {
    buf.get(offset..offset + len).ok_or_else(|| {
        GridError::Protocol(format!(
            "frame too short: need {} bytes at offset {}, have {}",
            len,
            offset,
            buf.len()
        ))
    })
}

/// Writes a byte at `offset`.
pub fn encode_byte(buf: &mut [u8], offset: usize, value: u8) {
    buf[offset] = value;
}

/// Reads a byte at `offset`.
pub fn decode_byte(buf: &[u8], offset: usize) -> Result<u8> {
    Ok(field(buf, offset, BYTE_SIZE_IN_BYTES)?[0])
}

/// Writes a boolean at `offset`.
pub fn encode_bool(buf: &mut [u8], offset: usize, value: bool) {
    buf[offset] = u8::from(value);
}

/// Reads a boolean at `offset`.
pub fn decode_bool(buf: &[u8], offset: usize) -> Result<bool> {
    Ok(field(buf, offset, BOOLEAN_SIZE_IN_BYTES)?[0] != 0)
}

/// Writes a little-endian 32-bit integer at `offset`.
pub fn encode_int(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + INT_SIZE_IN_BYTES].copy_from_slice(&value.to_le_bytes());
}

/// Reads a little-endian 32-bit integer at `offset`.
pub fn decode_int(buf: &[u8], offset: usize) -> Result<i32> {
    let b = field(buf, offset, INT_SIZE_IN_BYTES)?;
    Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Writes a little-endian 64-bit integer at `offset`.
pub fn encode_long(buf: &mut [u8], offset: usize, value: i64) {
    buf[offset..offset + LONG_SIZE_IN_BYTES].copy_from_slice(&value.to_le_bytes());
}

/// Reads a little-endian 64-bit integer at `offset`.
pub fn decode_long(buf: &[u8], offset: usize) -> Result<i64> {
    let b = field(buf, offset, LONG_SIZE_IN_BYTES)?;
    let mut bytes = [0u8; LONG_SIZE_IN_BYTES];
    bytes.copy_from_slice(b);
    Ok(i64::from_le_bytes(bytes))
}

/// Writes a nullable UUID at `offset` as a null marker followed by the
/// most and least significant halves.
pub fn encode_uuid(buf: &mut [u8], offset: usize, value: Option<Uuid>) {
    match value {
        Some(uuid) => {
            let (msb, lsb) = uuid.as_u64_pair();
            encode_bool(buf, offset, false);
            encode_long(buf, offset + BOOLEAN_SIZE_IN_BYTES, msb as i64);
            encode_long(buf, offset + BOOLEAN_SIZE_IN_BYTES + LONG_SIZE_IN_BYTES, lsb as i64);
        }
        None => {
            encode_bool(buf, offset, true);
            buf[offset + 1..offset + UUID_SIZE_IN_BYTES].fill(0);
        }
    }
}

/// Reads a nullable UUID at `offset`.
pub fn decode_uuid(buf: &[u8], offset: usize) -> Result<Option<Uuid>> {
    field(buf, offset, UUID_SIZE_IN_BYTES)?;
    if decode_bool(buf, offset)? {
        return Ok(None);
    }
    let msb = decode_long(buf, offset + BOOLEAN_SIZE_IN_BYTES)? as u64;
    let lsb = decode_long(buf, offset + BOOLEAN_SIZE_IN_BYTES + LONG_SIZE_IN_BYTES)? as u64;
    Ok(Some(Uuid::from_u64_pair(msb, lsb)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_layout_is_little_endian() {
        let mut buf = [0u8; 6];
        encode_int(&mut buf, 2, 0x0A0B0C0D);
        assert_eq!(buf, [0, 0, 0x0D, 0x0C, 0x0B, 0x0A]);
        assert_eq!(decode_int(&buf, 2).unwrap(), 0x0A0B0C0D);
    }

    #[test]
    fn test_long_and_negative_values() {
        let mut buf = [0u8; 8];
        encode_long(&mut buf, 0, -2);
        assert_eq!(decode_long(&buf, 0).unwrap(), -2);
    }

    #[test]
    fn test_bool_and_byte() {
        let mut buf = [0u8; 2];
        encode_bool(&mut buf, 0, true);
        encode_byte(&mut buf, 1, 0xFE);
        assert!(decode_bool(&buf, 0).unwrap());
        assert_eq!(decode_byte(&buf, 1).unwrap(), 0xFE);
    }

    #[test]
    fn test_uuid_and_null_uuid() {
        let uuid = Uuid::new_v4();
        let mut buf = [0u8; UUID_SIZE_IN_BYTES * 2];
        encode_uuid(&mut buf, 0, Some(uuid));
        encode_uuid(&mut buf, UUID_SIZE_IN_BYTES, None);

        assert_eq!(decode_uuid(&buf, 0).unwrap(), Some(uuid));
        assert_eq!(decode_uuid(&buf, UUID_SIZE_IN_BYTES).unwrap(), None);
        assert_eq!(buf[UUID_SIZE_IN_BYTES], 1);
    }

    #[test]
    fn test_decode_out_of_bounds_is_protocol_error() {
        let buf = [0u8; 3];
        assert!(matches!(decode_int(&buf, 0), Err(GridError::Protocol(_))));
        assert!(matches!(decode_long(&buf, 0), Err(GridError::Protocol(_))));
        assert!(matches!(decode_uuid(&buf, 0), Err(GridError::Protocol(_))));
        assert!(matches!(decode_byte(&buf, 3), Err(GridError::Protocol(_))));
    }
}
