//! OBD-II Sensor Definitions
//!
//! Static table of Mode 01 sensors: query command, decoder and display unit.

use crate::command::Command;
use crate::decode::{Decoder, Value};
use crate::error::ObdError;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::OnceLock;

/// A queryable vehicle sensor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sensor {
    /// Lookup key (e.g. "rpm")
    pub key: &'static str,
    /// Human readable name
    pub name: &'static str,
    /// Request sent to the adapter
    pub command: Command,
    /// Payload formula
    pub decoder: Decoder,
    /// Display unit, empty when unitless
    pub unit: &'static str,
}

impl Sensor {
    const fn new(
        key: &'static str,
        name: &'static str,
        command: &'static str,
        decoder: Decoder,
        unit: &'static str,
    ) -> Self {
        Self {
            key,
            name,
            command: Command::from_static(command),
            decoder,
            unit,
        }
    }

    /// Decode a payload returned for this sensor
    pub fn decode(&self, hex: &str) -> Result<DecodedReading, ObdError> {
        Ok(DecodedReading {
            key: self.key,
            value: self.decoder.decode(hex)?,
            unit: self.unit,
        })
    }
}

/// One decoded sensor value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedReading {
    /// Key of the sensor that produced the value
    pub key: &'static str,
    /// Decoded value
    pub value: Value,
    /// Display unit
    pub unit: &'static str,
}

// Commands ending in "1" ask the adapter to stop after the first ECU reply.
const STANDARD_SENSORS: [Sensor; 33] = [
    Sensor::new("pids", "Supported PIDs", "0100", Decoder::SupportedPids, ""),
    Sensor::new("dtc_status", "S-S DTC Cleared", "0101", Decoder::DtcStatus, ""),
    Sensor::new("dtc_ff", "DTC C-F-F", "0102", Decoder::Passthrough, ""),
    Sensor::new("fuel_status", "Fuel System Stat", "0103", Decoder::Passthrough, ""),
    Sensor::new("load", "Calc Load Value", "01041", Decoder::PercentScale, "%"),
    Sensor::new("temp", "Coolant Temp", "0105", Decoder::Temperature, "F"),
    Sensor::new("short_term_fuel_trim_1", "S-T Fuel Trim", "0106", Decoder::FuelTrimPercent, "%"),
    Sensor::new("long_term_fuel_trim_1", "L-T Fuel Trim", "0107", Decoder::FuelTrimPercent, "%"),
    Sensor::new("short_term_fuel_trim_2", "S-T Fuel Trim", "0108", Decoder::FuelTrimPercent, "%"),
    Sensor::new("long_term_fuel_trim_2", "L-T Fuel Trim", "0109", Decoder::FuelTrimPercent, "%"),
    Sensor::new("fuel_pressure", "FuelRail Pressure", "010A", Decoder::Passthrough, ""),
    Sensor::new(
        "manifold_pressure",
        "Intk Manifold",
        "010B",
        Decoder::IntakeManifoldPressure,
        "psi",
    ),
    Sensor::new("rpm", "Engine RPM", "010C1", Decoder::Rpm, ""),
    Sensor::new("speed", "Vehicle Speed", "010D1", Decoder::Speed, "MPH"),
    Sensor::new("timing_advance", "Timing Advance", "010E", Decoder::TimingAdvance, "degrees"),
    Sensor::new("intake_air_temp", "Intake Air Temp", "010F", Decoder::Temperature, "F"),
    Sensor::new("maf", "AirFlow Rate(MAF)", "0110", Decoder::MassAirFlow, "lb/m"),
    Sensor::new("throttle_pos", "Throttle Position", "01111", Decoder::PercentScale, "%"),
    Sensor::new("secondary_air_stat", "2nd Air Status", "0112", Decoder::Passthrough, ""),
    Sensor::new("o2_sensor_positions", "Loc of O2 sensors", "0113", Decoder::Passthrough, ""),
    Sensor::new("o211", "O2 Sensor: 1 - 1", "0114", Decoder::FuelTrimPercent, "%"),
    Sensor::new("o212", "O2 Sensor: 1 - 2", "0115", Decoder::FuelTrimPercent, "%"),
    Sensor::new("o213", "O2 Sensor: 1 - 3", "0116", Decoder::FuelTrimPercent, "%"),
    Sensor::new("o214", "O2 Sensor: 1 - 4", "0117", Decoder::FuelTrimPercent, "%"),
    Sensor::new("o221", "O2 Sensor: 2 - 1", "0118", Decoder::FuelTrimPercent, "%"),
    Sensor::new("o222", "O2 Sensor: 2 - 2", "0119", Decoder::FuelTrimPercent, "%"),
    Sensor::new("o223", "O2 Sensor: 2 - 3", "011A", Decoder::FuelTrimPercent, "%"),
    Sensor::new("o224", "O2 Sensor: 2 - 4", "011B", Decoder::FuelTrimPercent, "%"),
    Sensor::new("obd_standard", "OBD Designation", "011C", Decoder::Passthrough, ""),
    Sensor::new("o2_sensor_position", "Loc of O2 sensor", "011D", Decoder::Passthrough, ""),
    Sensor::new("aux_input", "Aux input status", "011E", Decoder::Passthrough, ""),
    Sensor::new("engine_time", "Engine Start MIN", "011F", Decoder::SecondsToMinutes, "min"),
    Sensor::new("engine_mil_time", "Engine Run MIL", "014D", Decoder::SecondsToMinutes, "min"),
];

/// Ordered sensor table with O(1) lookup by key
#[derive(Debug)]
pub struct SensorRegistry {
    sensors: Vec<Sensor>,
    index: HashMap<&'static str, usize>,
}

impl SensorRegistry {
    /// Build a registry from an ordered sensor list.
    ///
    /// Keys must be unique.
    pub fn new(sensors: Vec<Sensor>) -> Result<Self, ObdError> {
        let mut index = HashMap::with_capacity(sensors.len());
        for (i, sensor) in sensors.iter().enumerate() {
            if index.insert(sensor.key, i).is_some() {
                return Err(ObdError::InvalidConfig(format!(
                    "duplicate sensor key {}",
                    sensor.key
                )));
            }
        }
        Ok(Self { sensors, index })
    }

    /// The built-in Mode 01 table, built on first use
    pub fn standard() -> &'static SensorRegistry {
        static REGISTRY: OnceLock<SensorRegistry> = OnceLock::new();
        REGISTRY.get_or_init(|| {
            let sensors = STANDARD_SENSORS.to_vec();
            let index = sensors
                .iter()
                .enumerate()
                .map(|(i, sensor)| (sensor.key, i))
                .collect();
            SensorRegistry { sensors, index }
        })
    }

    /// Look up a sensor by key
    pub fn get(&self, key: &str) -> Option<&Sensor> {
        self.index.get(key).and_then(|&i| self.sensors.get(i))
    }

    /// Look up a sensor, failing with [`ObdError::UnknownSensor`]
    pub fn require(&self, key: &str) -> Result<&Sensor, ObdError> {
        self.get(key)
            .ok_or_else(|| ObdError::UnknownSensor(key.to_string()))
    }

    /// Sensors in table order
    pub fn iter(&self) -> impl Iterator<Item = &Sensor> {
        self.sensors.iter()
    }

    /// Number of sensors
    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}
