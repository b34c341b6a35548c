//! CRC16 checksum used by every RTU frame
//!
//! Reflected polynomial 0xA001, initial value 0xFFFF, appended low byte first.

const CRC_INIT: u16 = 0xFFFF;
const CRC_POLY: u16 = 0xA001;

/// Calculate CRC16 checksum (Modbus RTU standard)
pub fn compute(data: &[u8]) -> u16 {
    let mut crc = CRC_INIT;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc >>= 1;
                crc ^= CRC_POLY;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// Verify the trailing CRC of a complete frame.
///
/// Frames shorter than 3 bytes cannot carry a payload and a CRC, so they fail.
pub fn verify(frame: &[u8]) -> bool {
    if frame.len() < 3 {
        return false;
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    compute(body) == u16::from_le_bytes([tail[0], tail[1]])
}

/// Append the CRC of `frame` to itself, low byte first
pub fn append(frame: &mut Vec<u8>) {
    let crc = compute(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// CRC carried in the last two bytes of a frame, if any
pub(crate) fn received(frame: &[u8]) -> Option<u16> {
    match frame {
        [.., lo, hi] => Some(u16::from_le_bytes([*lo, *hi])),
        _ => None,
    }
}
