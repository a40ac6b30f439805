//! OBD-II Protocol Implementation
//!
//! This crate provides async serial communication with ELM327-compatible
//! OBD-II adapters: command framing, prompt-terminated response parsing,
//! the adapter handshake, and decoding of Mode 01 sensor payloads.

mod client;
mod command;
mod config;
mod decode;
mod error;
pub mod mock;
mod response;
mod sensor;
mod state;
mod transport;

pub use client::AdapterConnection;
pub use command::Command;
pub use config::{AdapterConfig, DEFAULT_BAUD_RATE};
pub use decode::{hex_to_bitstring, hex_to_int, Decoder, DtcStatus, MonitorStatus, Value};
pub use error::ObdError;
pub use response::{interpret_result, RawResponse, MIN_RESPONSE_LEN, NO_DATA, PROMPT};
pub use sensor::{DecodedReading, Sensor, SensorRegistry};
pub use state::{ConnectionState, ConnectionStateMachine};
pub use transport::{CloseHandle, PortProvider, SerialTransport, StaticPorts, Transport};
