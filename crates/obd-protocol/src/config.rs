//! Adapter link configuration

use crate::error::ObdError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// ELM327 serial speed
pub const DEFAULT_BAUD_RATE: u32 = 38400;

/// Serial link and framing parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Serial baud rate
    pub baud_rate: u32,
    /// How long a single byte read may wait (milliseconds)
    pub byte_timeout_ms: u64,
    /// Pause after ATZ while the adapter reboots (milliseconds)
    pub settle_delay_ms: u64,
    /// Consecutive empty reads before a response counts as timed out
    pub max_empty_reads: u32,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            byte_timeout_ms: 1000,
            settle_delay_ms: 1000,
            max_empty_reads: 5,
        }
    }
}

impl AdapterConfig {
    /// Per-byte read timeout
    pub fn byte_timeout(&self) -> Duration {
        Duration::from_millis(self.byte_timeout_ms)
    }

    /// Post-reset settle interval
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Reject values that would make reads hang or never succeed
    pub fn validate(&self) -> Result<(), ObdError> {
        if self.baud_rate == 0 {
            return Err(ObdError::InvalidConfig("baud_rate must be non-zero".into()));
        }
        if self.byte_timeout_ms == 0 {
            return Err(ObdError::InvalidConfig(
                "byte_timeout_ms must be non-zero".into(),
            ));
        }
        if self.max_empty_reads == 0 {
            return Err(ObdError::InvalidConfig(
                "max_empty_reads must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
