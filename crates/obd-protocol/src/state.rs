//! Adapter connection lifecycle

use crate::error::ObdError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// Lifecycle state of an adapter connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Port open, handshake not started
    #[default]
    Disconnected,
    /// Handshake in progress
    Initializing,
    /// Handshake succeeded
    Connected,
    /// Handshake or link failed; the connection must be recreated
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Initializing => "initializing",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Forward-only state machine gating adapter operations
#[derive(Debug, Clone, Default)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    failure: Option<String>,
}

impl ConnectionStateMachine {
    /// Create a machine in the `Disconnected` state
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reason recorded by the last transition into `Failed`
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Disconnected -> Initializing
    pub fn begin_initializing(&mut self) -> Result<(), ObdError> {
        self.transition(ConnectionState::Disconnected, ConnectionState::Initializing)
    }

    /// Initializing -> Connected
    pub fn mark_connected(&mut self) -> Result<(), ObdError> {
        self.transition(ConnectionState::Initializing, ConnectionState::Connected)
    }

    /// Initializing | Connected -> Failed
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), ObdError> {
        match self.state {
            ConnectionState::Initializing | ConnectionState::Connected => {
                let reason = reason.into();
                warn!("Adapter connection failed ({}): {}", self.state, reason);
                self.state = ConnectionState::Failed;
                self.failure = Some(reason);
                Ok(())
            }
            from => Err(ObdError::InvalidTransition {
                from,
                to: ConnectionState::Failed,
            }),
        }
    }

    /// Require `Connected`, the only state in which sensor queries are legal
    pub fn ensure_connected(&self) -> Result<(), ObdError> {
        if self.state == ConnectionState::Connected {
            Ok(())
        } else {
            Err(ObdError::NotConnected(self.state))
        }
    }

    fn transition(
        &mut self,
        expected: ConnectionState,
        to: ConnectionState,
    ) -> Result<(), ObdError> {
        if self.state != expected {
            return Err(ObdError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        info!("Adapter state {} -> {}", self.state, to);
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut sm = ConnectionStateMachine::new();
        assert_eq!(sm.state(), ConnectionState::Disconnected);
        sm.begin_initializing().unwrap();
        sm.mark_connected().unwrap();
        assert_eq!(sm.state(), ConnectionState::Connected);
        assert!(sm.ensure_connected().is_ok());
    }

    #[test]
    fn test_no_transition_out_of_failed() {
        let mut sm = ConnectionStateMachine::new();
        sm.begin_initializing().unwrap();
        sm.mark_failed("ATZ timed out").unwrap();
        assert_eq!(sm.failure_reason(), Some("ATZ timed out"));

        assert!(sm.mark_connected().is_err());
        assert!(sm.begin_initializing().is_err());
        assert!(sm.mark_failed("again").is_err());
        assert_eq!(sm.state(), ConnectionState::Failed);
    }

    #[test]
    fn test_connected_can_fail() {
        let mut sm = ConnectionStateMachine::new();
        sm.begin_initializing().unwrap();
        sm.mark_connected().unwrap();
        sm.mark_failed("serial unplugged").unwrap();
        assert!(matches!(
            sm.ensure_connected(),
            Err(ObdError::NotConnected(ConnectionState::Failed))
        ));
    }

    #[test]
    fn test_disconnected_cannot_skip_ahead() {
        let mut sm = ConnectionStateMachine::new();
        assert!(sm.mark_connected().is_err());
        assert!(sm.mark_failed("never started").is_err());
        assert!(matches!(
            sm.ensure_connected(),
            Err(ObdError::NotConnected(ConnectionState::Disconnected))
        ));
    }
}
