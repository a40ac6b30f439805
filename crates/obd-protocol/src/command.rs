//! Adapter commands

use crate::error::ObdError;
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;

/// A single ASCII command for the adapter, without line terminator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Command(Cow<'static, str>);

impl Command {
    /// Reset the adapter (`ATZ`)
    pub const RESET: Command = Command::from_static("ATZ");
    /// Disable command echo (`ATE0`)
    pub const ECHO_OFF: Command = Command::from_static("ATE0");
    /// Probe supported PIDs 01-20 (`0100`)
    pub const SUPPORTED_PIDS: Command = Command::from_static("0100");

    /// Line terminator appended on the wire
    pub const TERMINATOR: &'static [u8] = b"\r\n";

    /// Wrap a compile-time command string without validation
    pub const fn from_static(text: &'static str) -> Self {
        Command(Cow::Borrowed(text))
    }

    /// Validate and wrap arbitrary command text
    pub fn new(text: impl Into<String>) -> Result<Self, ObdError> {
        let text = text.into();
        let valid = !text.is_empty()
            && text.bytes().all(|b| b.is_ascii_graphic() || b == b' ');
        if !valid {
            return Err(ObdError::InvalidCommand(text));
        }
        Ok(Command(Cow::Owned(text)))
    }

    /// Command text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bytes written to the adapter, terminator included
    pub fn to_wire(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.0.len() + Self::TERMINATOR.len());
        bytes.extend_from_slice(self.0.as_bytes());
        bytes.extend_from_slice(Self::TERMINATOR);
        bytes
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
