//! CRC-16 framing for persisted blobs
//!
//! A frame is `payload || crc16(payload)` with the checksum stored big-endian.

use crate::{IntegrityError, IntegrityResult};

const CRC16_POLY: u16 = 0x1021;
const CRC16_INIT: u16 = 0xFFFF;

/// Size of the trailing checksum
pub const CRC_LEN: usize = 2;

/// CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF, no reflection, no final xor)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Append the checksum to a payload
pub fn seal(mut payload: Vec<u8>) -> Vec<u8> {
    let crc = crc16(&payload);
    payload.extend_from_slice(&crc.to_be_bytes());
    payload
}

/// Verify the trailing checksum and return the payload it covers
pub fn unseal(frame: &[u8]) -> IntegrityResult<&[u8]> {
    if frame.len() <= CRC_LEN {
        return Err(IntegrityError::TooShort(frame.len()));
    }

    let (payload, trailer) = frame.split_at(frame.len() - CRC_LEN);
    let stored = u16::from_be_bytes([trailer[0], trailer[1]]);
    let computed = crc16(payload);

    if stored != computed {
        return Err(IntegrityError::ChecksumMismatch { stored, computed });
    }

    Ok(payload)
}
