//! Mode 01 PIDs
//!
//! The sensor PIDs polled every tick and their byte decoders.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

use super::ProtocolError;
use crate::unit_conversion::{RawUnit, RawValue};

/// Positive response marker for mode 01 (0x40 + mode)
pub const MODE_01_RESPONSE: u8 = 0x41;

/// Sensor PIDs queried by the acquisition loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pid {
    /// Calculated engine load (0x04)
    EngineLoad,
    /// Engine coolant temperature (0x05)
    CoolantTemp,
    /// Engine speed (0x0C)
    Rpm,
    /// Vehicle speed (0x0D)
    Speed,
    /// Mass air flow rate (0x10)
    Maf,
    /// Throttle position (0x11)
    ThrottlePos,
}

impl Pid {
    /// Every PID polled per tick, in query order
    pub const ALL: [Pid; 6] = [
        Pid::Rpm,
        Pid::Speed,
        Pid::CoolantTemp,
        Pid::ThrottlePos,
        Pid::EngineLoad,
        Pid::Maf,
    ];

    /// PID number within mode 01
    pub fn code(&self) -> u8 {
        match self {
            Pid::EngineLoad => 0x04,
            Pid::CoolantTemp => 0x05,
            Pid::Rpm => 0x0C,
            Pid::Speed => 0x0D,
            Pid::Maf => 0x10,
            Pid::ThrottlePos => 0x11,
        }
    }

    /// Number of data bytes in a response
    pub fn data_len(&self) -> usize {
        match self {
            Pid::Rpm | Pid::Maf => 2,
            _ => 1,
        }
    }

    /// ASCII request sent to the adapter, without the trailing CR
    pub fn request(&self) -> String {
        format!("01{:02X}", self.code())
    }

    /// Short field name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Pid::EngineLoad => "load_pct",
            Pid::CoolantTemp => "coolant_temp_f",
            Pid::Rpm => "rpm",
            Pid::Speed => "speed_mph",
            Pid::Maf => "maf_gps",
            Pid::ThrottlePos => "throttle_pct",
        }
    }

    /// Decode the data bytes that follow `41 <pid>`
    pub fn decode(&self, data: &[u8]) -> Result<RawValue, ProtocolError> {
        let data = data
            .get(..self.data_len())
            .ok_or_else(|| ProtocolError::InvalidResponse(format!("{:02X?}", data)))?;
        let a = f64::from(data[0]);
        let value = match self {
            Pid::Rpm => RawValue::new(f64::from(BigEndian::read_u16(data)) / 4.0, RawUnit::Rpm),
            Pid::Speed => RawValue::new(a, RawUnit::KilometersPerHour),
            Pid::CoolantTemp => RawValue::new(a - 40.0, RawUnit::Celsius),
            Pid::ThrottlePos | Pid::EngineLoad => RawValue::new(a * 100.0 / 255.0, RawUnit::Percent),
            Pid::Maf => RawValue::new(
                f64::from(BigEndian::read_u16(data)) / 100.0,
                RawUnit::GramsPerSecond,
            ),
        };
        Ok(value)
    }

    /// Extract and decode this PID's value from a full mode 01 response
    pub fn parse_response(&self, response: &[u8]) -> Result<RawValue, ProtocolError> {
        let payload = find_mode01_payload(response, self.code())
            .ok_or_else(|| ProtocolError::InvalidResponse(String::from_utf8_lossy(response).into_owned()))?;
        self.decode(&payload)
    }
}

/// Parse pairs of hex digits, ignoring anything that is not a hex digit
pub fn parse_hex_bytes(s: &[u8]) -> Vec<u8> {
    let digits: Vec<u8> = s.iter().copied().filter(u8::is_ascii_hexdigit).collect();
    digits
        .chunks_exact(2)
        .filter_map(|pair| {
            let text = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(text, 16).ok()
        })
        .collect()
}

/// Find the data bytes of the first `41 <pid>` line in a (possibly multi-ECU) response
fn find_mode01_payload(response: &[u8], pid: u8) -> Option<Vec<u8>> {
    response
        .split(|&b| b == b'\r' || b == b'\n')
        .map(parse_hex_bytes)
        .find(|bytes| bytes.len() > 2 && bytes[0] == MODE_01_RESPONSE && bytes[1] == pid)
        .map(|bytes| bytes[2..].to_vec())
}

/// Supported-PID bitmap from a `0100` response (PIDs 0x01-0x20)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedPids {
    bits: u32,
}

impl SupportedPids {
    /// Parse a `41 00 XX XX XX XX` response
    pub fn from_response(response: &[u8]) -> Option<Self> {
        let payload = find_mode01_payload(response, 0x00)?;
        let data = payload.get(..4)?;
        Some(Self {
            bits: BigEndian::read_u32(data),
        })
    }

    /// Whether a PID in 0x01-0x20 is reported as supported
    pub fn supports(&self, pid: u8) -> bool {
        if pid == 0 || pid > 0x20 {
            return false;
        }
        (self.bits >> (32 - u32::from(pid))) & 1 == 1
    }

    /// Number of supported PIDs in the range
    pub fn count(&self) -> u32 {
        self.bits.count_ones()
    }
}
