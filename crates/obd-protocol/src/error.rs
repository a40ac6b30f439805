//! OBD-II Error Types

use crate::state::ConnectionState;
use thiserror::Error;

/// Errors that can occur during OBD-II communication
#[derive(Debug, Error)]
pub enum ObdError {
    /// Port could not be opened, or a handshake step got no usable reply
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Too many consecutive empty reads before the prompt arrived
    #[error("Timeout waiting for OBD response after {attempts} empty reads")]
    ReadTimeout { attempts: u32 },

    /// Prompt arrived but nothing preceded it
    #[error("Adapter returned an empty response")]
    NoBuffer,

    /// Vehicle answered NO DATA for the requested PID
    #[error("No data for sensor {0}")]
    NoData(String),

    /// Payload contained a non-hex character, was empty, or overflowed
    #[error("Invalid hex payload: {0:?}")]
    InvalidHex(String),

    /// Payload was valid hex but the wrong shape for its decoder
    #[error("Invalid payload for {decoder}: {payload:?}")]
    InvalidPayload {
        decoder: &'static str,
        payload: String,
    },

    /// Command text cannot be sent to the adapter
    #[error("Invalid command: {0:?}")]
    InvalidCommand(String),

    /// A previous command is still waiting for its response
    #[error("Command {pending} still awaiting a response")]
    CommandInFlight { pending: String },

    /// Operation requires a connected adapter
    #[error("Adapter not connected (state: {0})")]
    NotConnected(ConnectionState),

    /// Rejected state machine transition
    #[error("Invalid connection transition from {from} to {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    /// No sensor registered under this key
    #[error("Unknown sensor: {0}")]
    UnknownSensor(String),

    /// Transport has been closed
    #[error("Transport closed")]
    TransportClosed,

    /// Serial port error
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// I/O error on the underlying stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Rejected configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ObdError {
    /// Whether this error means the link itself is broken.
    ///
    /// Timeouts, empty replies and decode problems leave the adapter usable;
    /// stream and serial errors do not.
    pub fn is_io_failure(&self) -> bool {
        matches!(
            self,
            ObdError::Io(_) | ObdError::SerialError(_) | ObdError::TransportClosed
        )
    }
}

impl From<tokio_serial::Error> for ObdError {
    fn from(err: tokio_serial::Error) -> Self {
        ObdError::SerialError(err.to_string())
    }
}
