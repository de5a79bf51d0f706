//! Base-128 variable length integers.
//!
//! Each byte carries seven bits of the value, least significant group first.
//! The high bit of a byte is set when more bytes follow.

use bytes::BufMut;

use crate::error::WireError;

/// Longest valid encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Append the varint encoding of `v` to `buf`.
pub fn append_varint<B: BufMut>(buf: &mut B, mut v: u64) {
    while v >= 0x80 {
        buf.put_u8((v as u8 & 0x7f) | 0x80);
        v >>= 7;
    }
    buf.put_u8(v as u8);
}

/// Number of bytes [`append_varint`] writes for `v`.
pub fn varint_len(v: u64) -> usize {
    let bits = 64 - (v | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Decode one varint from the front of `buf`.
///
/// Returns:
/// - `Ok(Some((rest, value)))` when a complete varint was decoded
/// - `Ok(None)` when `buf` ends before the varint does (more data needed)
/// - `Err(WireError::VarintOverflow)` when the encoding runs past 10 bytes
pub fn read_varint(buf: &[u8]) -> Result<Option<(&[u8], u64)>, WireError> {
    let mut out = 0u64;
    for (i, byte) in buf.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return Err(WireError::VarintOverflow);
        }
        out |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((&buf[i + 1..], out)));
        }
    }
    if buf.len() >= MAX_VARINT_LEN {
        return Err(WireError::VarintOverflow);
    }
    Ok(None)
}
