//! Register decoding and the meter's register table
//!
//! Registers are big-endian 16-bit words. Floats span two registers, and the
//! meter stores them with the *low* word at `addr` and the high word at
//! `addr + 1` (CDAB in the usual ABCD notation):
//!
//! ```text
//! value 220.5 = 0x435C8000
//! reg[addr]     = 0x8000   (low word)
//! reg[addr + 1] = 0x435C   (high word)
//! payload       = [0x80, 0x00, 0x43, 0x5C]
//! ```
//!
//! This word order is fixed by the device. Decoding it as ABCD yields plausible
//! but wrong numbers.

use serde::{Deserialize, Serialize};

use crate::error::{MeterError, Result};

/// Decode a register payload into big-endian 16-bit values
pub fn decode_registers(payload: &[u8], count: usize) -> Result<Vec<u16>> {
    let needed = count * 2;
    if payload.len() < needed {
        return Err(MeterError::ByteCountMismatch {
            expected: needed,
            received: payload.len(),
        });
    }

    Ok(payload[..needed]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// Decode the meter's two-register float.
///
/// The 4 payload bytes are `[low_hi, low_lo, high_hi, high_lo]`. They are
/// rearranged to `[low_lo, low_hi, high_lo, high_hi]` and read as a
/// little-endian IEEE-754 value.
pub fn decode_float(payload: &[u8]) -> Result<f32> {
    let [a, b, c, d]: [u8; 4] = payload
        .try_into()
        .map_err(|_| MeterError::ByteCountMismatch {
            expected: 4,
            received: payload.len(),
        })?;

    Ok(f32::from_le_bytes([b, a, d, c]))
}

/// Float from two already-decoded registers in request order
pub fn float_from_registers(low: u16, high: u16) -> f32 {
    f32::from_bits((u32::from(high) << 16) | u32::from(low))
}

/// Encode a float into the meter's register pair, `[reg[addr], reg[addr + 1]]`
pub fn encode_float(value: f32) -> [u16; 2] {
    let bits = value.to_bits();
    [(bits & 0xFFFF) as u16, (bits >> 16) as u16]
}

/// Measured quantity behind a register address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    FirmwareVersion,
    FrequencyA,
    VoltageA,
    VoltageB,
    VoltageC,
    CurrentA,
    CurrentB,
    CurrentC,
}

impl Quantity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirmwareVersion => "firmware_version",
            Self::FrequencyA => "frequency_a",
            Self::VoltageA => "voltage_a",
            Self::VoltageB => "voltage_b",
            Self::VoltageC => "voltage_c",
            Self::CurrentA => "current_a",
            Self::CurrentB => "current_b",
            Self::CurrentC => "current_c",
        }
    }
}

impl std::fmt::Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Register addresses of one meter model.
///
/// Each address is the first of a two-register float, except `version`, which
/// is also the single-register liveness probe target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterMap {
    pub version: u16,
    pub frequency_a: u16,
    pub voltage_a: u16,
    pub voltage_b: u16,
    pub voltage_c: u16,
    pub current_a: u16,
    pub current_b: u16,
    pub current_c: u16,
}

impl RegisterMap {
    /// Address table of the supported three-phase meter
    pub const STANDARD: RegisterMap = RegisterMap {
        version: 0,
        frequency_a: 66,
        voltage_a: 68,
        voltage_b: 70,
        voltage_c: 72,
        current_a: 74,
        current_b: 76,
        current_c: 78,
    };

    pub fn address_of(&self, quantity: Quantity) -> u16 {
        match quantity {
            Quantity::FirmwareVersion => self.version,
            Quantity::FrequencyA => self.frequency_a,
            Quantity::VoltageA => self.voltage_a,
            Quantity::VoltageB => self.voltage_b,
            Quantity::VoltageC => self.voltage_c,
            Quantity::CurrentA => self.current_a,
            Quantity::CurrentB => self.current_b,
            Quantity::CurrentC => self.current_c,
        }
    }

    /// The six reads of one measurement cycle, in wire order
    pub fn measurement_plan(&self) -> [(Quantity, u16); 6] {
        [
            Quantity::VoltageA,
            Quantity::VoltageB,
            Quantity::VoltageC,
            Quantity::CurrentA,
            Quantity::CurrentB,
            Quantity::CurrentC,
        ]
        .map(|q| (q, self.address_of(q)))
    }
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self::STANDARD
    }
}
