//! Payload decoders
//!
//! Every sensor names one [`Decoder`]; decoding is a pure function of the
//! hex payload returned by [`crate::interpret_result`].

use crate::error::ObdError;
use serde::{Deserialize, Serialize};

/// Formula used to turn a hex payload into a physical value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decoder {
    /// raw * 0.00132276 (lb/min)
    MassAirFlow,
    /// raw * 100 / 255 (%)
    PercentScale,
    /// raw / 0.14504
    IntakeManifoldPressure,
    /// raw / 4 (rev/min)
    Rpm,
    /// raw / 1.609 (mph)
    Speed,
    /// (raw - 128) / 2 (degrees)
    TimingAdvance,
    /// raw / 60, truncated (minutes)
    SecondsToMinutes,
    /// 32 + 9 * (raw - 40) / 5 (°F)
    Temperature,
    /// (raw - 128) * 100 / 128 (%)
    FuelTrimPercent,
    /// Supported-PID bitmap as a '0'/'1' string
    SupportedPids,
    /// Payload returned unchanged
    Passthrough,
    /// MIL, DTC count and monitor readiness
    DtcStatus,
}

/// Decoded sensor value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Number(f64),
    Bits(String),
    Raw(String),
    DtcStatus(DtcStatus),
}

impl Value {
    /// Numeric value, if this is a scalar reading
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            _ => None,
        }
    }
}

/// Availability and completeness of one on-board monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub available: bool,
    pub incomplete: bool,
}

/// Monitor status since DTCs were cleared (mode 01 PID 01)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DtcStatus {
    /// Malfunction indicator lamp on
    pub mil_on: bool,
    /// Number of stored emission-related DTCs
    pub dtc_count: u8,
    /// Misfire, fuel system, components
    pub continuous: [MonitorStatus; 3],
    /// Catalyst, heated catalyst, evap, secondary air, A/C, O2 sensor, O2 heater
    pub non_continuous: [MonitorStatus; 7],
    /// EGR system bit (byte D, bit 7)
    pub egr_system: bool,
}

impl DtcStatus {
    /// Decode the four status bytes A..D
    pub fn from_bytes(a: u8, b: u8, c: u8, d: u8) -> Self {
        let bit = |byte: u8, n: u32| (byte >> n) & 0x01 == 1;

        let mut continuous = [MonitorStatus::default(); 3];
        for (i, status) in (0u32..).zip(continuous.iter_mut()) {
            status.available = bit(b, i);
            status.incomplete = bit(b, i + 4);
        }

        let mut non_continuous = [MonitorStatus::default(); 7];
        for (i, status) in (0u32..).zip(non_continuous.iter_mut()) {
            status.available = bit(c, i);
            status.incomplete = bit(d, i);
        }

        Self {
            mil_on: bit(a, 7),
            dtc_count: a & 0x7F,
            continuous,
            non_continuous,
            egr_system: bit(d, 7),
        }
    }
}

impl Decoder {
    /// Short name used in error messages
    pub fn name(&self) -> &'static str {
        match self {
            Decoder::MassAirFlow => "maf",
            Decoder::PercentScale => "percent_scale",
            Decoder::IntakeManifoldPressure => "intake_m_pres",
            Decoder::Rpm => "rpm",
            Decoder::Speed => "speed",
            Decoder::TimingAdvance => "timing_advance",
            Decoder::SecondsToMinutes => "sec_to_min",
            Decoder::Temperature => "temp",
            Decoder::FuelTrimPercent => "fuel_trim_percent",
            Decoder::SupportedPids => "hex_to_bitstring",
            Decoder::Passthrough => "passthrough",
            Decoder::DtcStatus => "dtc_status",
        }
    }

    /// Decode a hex payload
    pub fn decode(&self, hex: &str) -> Result<Value, ObdError> {
        let raw = || hex_to_int(hex).map(|v| v as f64);

        let value = match self {
            Decoder::MassAirFlow => Value::Number(raw()? * 0.00132276),
            Decoder::PercentScale => Value::Number(raw()? * 100.0 / 255.0),
            Decoder::IntakeManifoldPressure => Value::Number(raw()? / 0.14504),
            Decoder::Rpm => Value::Number(raw()? / 4.0),
            Decoder::Speed => Value::Number(raw()? / 1.609),
            Decoder::TimingAdvance => Value::Number((raw()? - 128.0) / 2.0),
            Decoder::SecondsToMinutes => Value::Number((hex_to_int(hex)? / 60) as f64),
            Decoder::Temperature => Value::Number(32.0 + 9.0 * (raw()? - 40.0) / 5.0),
            Decoder::FuelTrimPercent => Value::Number((raw()? - 128.0) * 100.0 / 128.0),
            Decoder::SupportedPids => Value::Bits(hex_to_bitstring(hex)?),
            Decoder::Passthrough => Value::Raw(hex.to_string()),
            Decoder::DtcStatus => Value::DtcStatus(decode_dtc_status(hex)?),
        };
        Ok(value)
    }
}

/// Parse a base-16 payload into an unsigned integer
pub fn hex_to_int(hex: &str) -> Result<u64, ObdError> {
    if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ObdError::InvalidHex(hex.to_string()));
    }
    u64::from_str_radix(hex, 16).map_err(|_| ObdError::InvalidHex(hex.to_string()))
}

/// Expand each hex digit to its 4-bit binary form, high bit first
pub fn hex_to_bitstring(hex: &str) -> Result<String, ObdError> {
    let mut bits = String::with_capacity(hex.len() * 4);
    for c in hex.chars() {
        let nibble = c
            .to_digit(16)
            .ok_or_else(|| ObdError::InvalidHex(hex.to_string()))?;
        bits.push_str(&format!("{:04b}", nibble));
    }
    Ok(bits)
}

fn decode_dtc_status(hex: &str) -> Result<DtcStatus, ObdError> {
    let byte = |n: usize| -> Result<u8, ObdError> {
        let digits = hex.get(n * 2..n * 2 + 2).ok_or_else(|| ObdError::InvalidPayload {
            decoder: Decoder::DtcStatus.name(),
            payload: hex.to_string(),
        })?;
        Ok(hex_to_int(digits)? as u8)
    };
    Ok(DtcStatus::from_bytes(byte(0)?, byte(1)?, byte(2)?, byte(3)?))
}
