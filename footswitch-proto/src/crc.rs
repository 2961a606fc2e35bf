//! CRC-8 checksum for SysEx payloads.
//!
//! Polynomial 0x07, initial value 0, no reflection, no final xor. This is the
//! CRC-8/SMBUS parameter set, evaluated through a 256-byte lookup table.

use crc::{Crc, CRC_8_SMBUS};

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// Checksum of a complete payload.
#[inline]
#[must_use]
pub fn checksum(data: &[u8]) -> u8 {
    CRC8.checksum(data)
}
