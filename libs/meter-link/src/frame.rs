//! RTU frame building, reassembly and validation
//!
//! Request: `[unit][fc][addr_hi][addr_lo][count_hi][count_lo][crc_lo][crc_hi]`
//! Response: `[unit][fc][byte_count][data..][crc_lo][crc_hi]`
//! Exception: `[unit][fc | 0x80][exception_code][crc_lo][crc_hi]`
//!
//! Everything here is a pure function over byte slices. The transport owns the
//! receive buffer and feeds it through [`accumulate`] until a frame is complete.

use crate::crc;
use crate::error::{MeterError, Result};

/// FC03, the only function the meter is queried with
pub const READ_HOLDING_REGISTERS: u8 = 0x03;
/// High bit of the function code marks an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;
/// Encoded read request length
pub const REQUEST_LEN: usize = 8;
/// Smallest valid response (exception frame)
pub const MIN_RESPONSE_LEN: usize = 5;
/// unit + fc + byte_count
pub const RESPONSE_HEADER_LEN: usize = 3;
/// Header + 255 data bytes + CRC
pub const MAX_RESPONSE_LEN: usize = RESPONSE_HEADER_LEN + 255 + 2;

/// Read request as a plain value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub unit: u8,
    pub function: u8,
    pub address: u16,
    pub count: u16,
}

impl ReadRequest {
    /// FC03 read of `count` registers starting at `address`
    pub fn holding_registers(unit: u8, address: u16, count: u16) -> Self {
        Self {
            unit,
            function: READ_HOLDING_REGISTERS,
            address,
            count,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        build_request(self.unit, self.function, self.address, self.count)
    }
}

/// Build an RTU read request (`unit_id` + PDU + CRC)
pub fn build_request(unit: u8, function: u8, address: u16, count: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(REQUEST_LEN);
    frame.push(unit);
    frame.push(function);
    frame.extend_from_slice(&address.to_be_bytes());
    frame.extend_from_slice(&count.to_be_bytes());
    crc::append(&mut frame);
    frame
}

/// Decode a request frame produced by [`build_request`]
pub fn parse_request(frame: &[u8]) -> Result<ReadRequest> {
    if frame.len() < REQUEST_LEN {
        return Err(MeterError::FrameTooShort { len: frame.len() });
    }
    if frame.len() > REQUEST_LEN {
        return Err(MeterError::ByteCountMismatch {
            expected: REQUEST_LEN,
            received: frame.len(),
        });
    }
    check_crc(frame)?;

    Ok(ReadRequest {
        unit: frame[0],
        function: frame[1],
        address: u16::from_be_bytes([frame[2], frame[3]]),
        count: u16::from_be_bytes([frame[4], frame[5]]),
    })
}

/// Reassembly progress of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Keep reading. `wanted` is how many more bytes finish the header or the
    /// frame, `None` when the length cannot be derived from what arrived.
    Incomplete { wanted: Option<usize> },
    /// The first `usize` bytes of the buffer form a whole frame
    Complete(usize),
}

/// Check if function code signals an exception response
pub fn is_exception(function: u8) -> bool {
    function & EXCEPTION_FLAG != 0
}

/// Total frame length implied by the header, once 3 bytes are present
pub fn expected_length(buffer: &[u8], expected_function: u8) -> Option<usize> {
    if buffer.len() < RESPONSE_HEADER_LEN {
        return None;
    }
    let function = buffer[1];
    if function == expected_function {
        Some(usize::from(buffer[2]) + MIN_RESPONSE_LEN)
    } else if is_exception(function) {
        Some(MIN_RESPONSE_LEN)
    } else {
        None
    }
}

/// Append `chunk` to the receive buffer and report whether a frame is complete.
///
/// A chunk of 1 or 2 bytes is fine: the length is only derived once the
/// function code and byte count have both arrived.
pub fn accumulate(buffer: &mut Vec<u8>, chunk: &[u8], expected_function: u8) -> FrameState {
    buffer.extend_from_slice(chunk);

    match expected_length(buffer, expected_function) {
        Some(total) if buffer.len() >= total => FrameState::Complete(total),
        Some(total) => FrameState::Incomplete {
            wanted: Some(total - buffer.len()),
        },
        None if buffer.len() < RESPONSE_HEADER_LEN => FrameState::Incomplete {
            wanted: Some(RESPONSE_HEADER_LEN - buffer.len()),
        },
        None => FrameState::Incomplete { wanted: None },
    }
}

/// Validated response, borrowing the receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseFrame<'a> {
    pub unit: u8,
    pub function: u8,
    pub byte_count: u8,
    pub data: &'a [u8],
}

/// Validate a reassembled response.
///
/// Checks run in a fixed order: length, CRC, function code, exception,
/// byte count. The first failing check decides the error.
pub fn validate(
    frame: &[u8],
    expected_function: u8,
    expected_count: u16,
) -> Result<ResponseFrame<'_>> {
    if frame.len() < MIN_RESPONSE_LEN {
        return Err(MeterError::FrameTooShort { len: frame.len() });
    }

    check_crc(frame)?;

    let function = frame[1];
    if function != expected_function && !is_exception(function) {
        return Err(MeterError::UnexpectedFunctionCode {
            expected: expected_function,
            received: function,
        });
    }

    if is_exception(function) {
        let code = frame[2];
        return Err(MeterError::DeviceException {
            function: function & !EXCEPTION_FLAG,
            code,
            description: exception_description(code),
        });
    }

    let byte_count = frame[2];
    let expected_bytes = usize::from(expected_count) * 2;
    if usize::from(byte_count) != expected_bytes {
        return Err(MeterError::ByteCountMismatch {
            expected: expected_bytes,
            received: usize::from(byte_count),
        });
    }

    let data = &frame[RESPONSE_HEADER_LEN..frame.len() - 2];
    if data.len() != usize::from(byte_count) {
        return Err(MeterError::ByteCountMismatch {
            expected: usize::from(byte_count),
            received: data.len(),
        });
    }

    Ok(ResponseFrame {
        unit: frame[0],
        function,
        byte_count,
        data,
    })
}

fn check_crc(frame: &[u8]) -> Result<()> {
    if crc::verify(frame) {
        return Ok(());
    }
    let expected = crc::compute(&frame[..frame.len().saturating_sub(2)]);
    let received = crc::received(frame).unwrap_or_default();
    Err(MeterError::CrcMismatch { expected, received })
}

/// Get exception description
pub fn exception_description(exception_code: u8) -> &'static str {
    match exception_code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Slave Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Slave Device Busy",
        0x07 => "Negative Acknowledge",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}
