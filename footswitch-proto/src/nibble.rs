//! Nibble packing: each byte travels as two 7-bit-safe bytes, high nibble first.

use crate::CodecError;

/// Split a byte into `[high, low]` nibbles.
#[inline]
#[must_use]
pub const fn split(byte: u8) -> [u8; 2] {
    [byte >> 4, byte & 0x0F]
}

/// Join two nibble bytes back into one byte.
#[inline]
pub fn join(high: u8, low: u8) -> Result<u8, CodecError> {
    if high > 0x0F || low > 0x0F {
        return Err(CodecError::Nibble);
    }
    Ok((high << 4) | low)
}

/// Decode a nibble pair as a two's complement signed value.
#[inline]
pub fn decode_signed(high: u8, low: u8) -> Result<i8, CodecError> {
    join(high, low).map(|b| b as i8)
}

/// Nibble-encode `data` into `out`, returning the number of bytes written.
pub fn encode_into(data: &[u8], out: &mut [u8]) -> Result<usize, CodecError> {
    let len = data.len() * 2;
    if out.len() < len {
        return Err(CodecError::BufferTooSmall);
    }
    for (pair, &byte) in out.chunks_exact_mut(2).zip(data) {
        pair.copy_from_slice(&split(byte));
    }
    Ok(len)
}

/// Decode nibble pairs from `nibbles` into `out`, returning the number of bytes written.
pub fn decode_into(nibbles: &[u8], out: &mut [u8]) -> Result<usize, CodecError> {
    if nibbles.len() % 2 != 0 {
        return Err(CodecError::Framing);
    }
    let len = nibbles.len() / 2;
    if out.len() < len {
        return Err(CodecError::BufferTooSmall);
    }
    for (slot, pair) in out.iter_mut().zip(nibbles.chunks_exact(2)) {
        *slot = join(pair[0], pair[1])?;
    }
    Ok(len)
}
