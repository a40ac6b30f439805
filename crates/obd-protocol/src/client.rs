//! OBD-II Connection for ELM327 Adapters
//!
//! [`AdapterConnection`] frames commands and prompt-terminated replies on top
//! of a [`Transport`], runs the reset, echo-off and supported-PID handshake, and queries
//! sensors once connected. One command may be outstanding at a time.

use crate::command::Command;
use crate::config::AdapterConfig;
use crate::error::ObdError;
use crate::response::{interpret_result, RawResponse, PROMPT};
use crate::sensor::{DecodedReading, Sensor, SensorRegistry};
use crate::state::{ConnectionState, ConnectionStateMachine};
use crate::transport::{SerialTransport, Transport};
use tracing::{debug, info, warn};

/// Marker that starts the adapter identification in the ATZ reply
const VERSION_MARKER: &str = "ELM";

/// A single adapter link and its lifecycle
pub struct AdapterConnection<T: Transport> {
    /// Serial port device path (e.g., "/dev/ttyUSB0" or "COM3")
    port: String,
    config: AdapterConfig,
    transport: T,
    state: ConnectionStateMachine,
    /// Identification reported by the adapter on reset
    version: Option<String>,
    /// Command sent but not yet answered
    in_flight: Option<Command>,
    closed: bool,
}

impl AdapterConnection<SerialTransport> {
    /// Open a serial port and wrap it in a disconnected connection
    pub async fn open(port: &str, config: AdapterConfig) -> Result<Self, ObdError> {
        config.validate()?;
        let transport = SerialTransport::open(port, config.baud_rate)?;
        Ok(Self::new(transport, port, config))
    }
}

impl<T: Transport> AdapterConnection<T> {
    /// Wrap an already open transport
    pub fn new(transport: T, port: &str, config: AdapterConfig) -> Self {
        info!("Creating adapter connection on {}", port);
        Self {
            port: port.to_string(),
            config,
            transport,
            state: ConnectionStateMachine::new(),
            version: None,
            in_flight: None,
            closed: false,
        }
    }

    /// Port identifier
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Current lifecycle state.
    ///
    /// [`close`](Self::close) does not change it; use
    /// [`is_connected`](Self::is_connected) to know whether the link is usable.
    pub fn state(&self) -> ConnectionState {
        self.state.state()
    }

    /// Check if the handshake succeeded and the link is still usable
    pub fn is_connected(&self) -> bool {
        !self.closed && self.state() == ConnectionState::Connected
    }

    /// Adapter identification captured during the handshake
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Reason for the transition into `Failed`, if any
    pub fn failure_reason(&self) -> Option<&str> {
        self.state.failure_reason()
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport, mutably
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Flush stale input and write `cmd` followed by CR LF. Does not read.
    pub async fn send_command(&mut self, cmd: &Command) -> Result<(), ObdError> {
        self.ensure_open()?;
        if let Some(pending) = &self.in_flight {
            return Err(ObdError::CommandInFlight {
                pending: pending.to_string(),
            });
        }

        debug!("-> {}", cmd);
        let result = match self.transport.flush() {
            Ok(()) => self.transport.write_bytes(&cmd.to_wire()).await,
            Err(e) => Err(e),
        };
        self.check_link(result)?;

        self.in_flight = Some(cmd.clone());
        Ok(())
    }

    /// Read one prompt-terminated reply.
    ///
    /// Carriage returns are dropped and the prompt is never buffered. Gives up
    /// with [`ObdError::ReadTimeout`] after `max_empty_reads` consecutive empty
    /// reads, and returns [`ObdError::NoBuffer`] for a bare prompt.
    pub async fn read_response(&mut self) -> Result<String, ObdError> {
        self.ensure_open()?;
        let result = self.read_until_prompt().await;
        self.in_flight = None;
        self.check_link(result)
    }

    async fn read_until_prompt(&mut self) -> Result<String, ObdError> {
        let timeout = self.config.byte_timeout();
        let mut buffer = String::new();
        let mut empty_reads = 0;

        loop {
            match self.transport.read_byte(timeout).await? {
                None => {
                    empty_reads += 1;
                    debug!(
                        "No byte from adapter ({}/{})",
                        empty_reads, self.config.max_empty_reads
                    );
                    if empty_reads >= self.config.max_empty_reads {
                        warn!("Adapter response timed out after {} empty reads", empty_reads);
                        return Err(ObdError::ReadTimeout {
                            attempts: empty_reads,
                        });
                    }
                }
                Some(byte) => {
                    empty_reads = 0;
                    match byte {
                        b'\r' => {}
                        PROMPT => break,
                        // one char per byte, so lengths match what arrived
                        other => buffer.push(char::from(other)),
                    }
                }
            }
        }

        debug!("<- {:?}", buffer);
        if buffer.is_empty() {
            return Err(ObdError::NoBuffer);
        }
        Ok(buffer)
    }

    /// Send a command and read its reply
    pub async fn transact(&mut self, cmd: &Command) -> Result<String, ObdError> {
        self.send_command(cmd).await?;
        self.read_response().await
    }

    /// Reset the adapter, disable echo and ask for the supported PIDs.
    ///
    /// Any failed step leaves the connection in `Failed`; it cannot be retried.
    pub async fn initialize(&mut self) -> Result<(), ObdError> {
        self.ensure_open()?;
        self.state.begin_initializing()?;
        info!("Initializing OBD adapter on {}", self.port);

        self.handshake_send(&Command::RESET).await?;
        tokio::time::sleep(self.config.settle_delay()).await;
        let reset = self.handshake_reply(&Command::RESET).await?;
        debug!("ATZ response: {}", reset);
        self.version = Some(adapter_version(&reset));

        let echo = self.handshake_step(&Command::ECHO_OFF).await?;
        debug!("ATE0 response: {}", echo);

        let ready = self.handshake_step(&Command::SUPPORTED_PIDS).await?;
        debug!("0100 response: {}", ready);

        self.state.mark_connected()?;
        info!(
            "OBD adapter initialized successfully ({})",
            self.version().unwrap_or("unknown")
        );
        Ok(())
    }

    async fn handshake_step(&mut self, cmd: &Command) -> Result<String, ObdError> {
        self.handshake_send(cmd).await?;
        self.handshake_reply(cmd).await
    }

    async fn handshake_send(&mut self, cmd: &Command) -> Result<(), ObdError> {
        match self.send_command(cmd).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail_handshake(cmd, e)),
        }
    }

    async fn handshake_reply(&mut self, cmd: &Command) -> Result<String, ObdError> {
        match self.read_response().await {
            Ok(reply) => Ok(reply),
            Err(e) => Err(self.fail_handshake(cmd, e)),
        }
    }

    fn fail_handshake(&mut self, cmd: &Command, cause: ObdError) -> ObdError {
        let reason = format!("{} failed: {}", cmd, cause);
        if self.state() == ConnectionState::Initializing {
            if let Err(e) = self.state.mark_failed(reason.clone()) {
                return e;
            }
        }
        ObdError::ConnectionFailed(reason)
    }

    /// Query one sensor and decode its reply
    pub async fn query(&mut self, sensor: &Sensor) -> Result<DecodedReading, ObdError> {
        self.ensure_open()?;
        self.state.ensure_connected()?;

        let reply = self.transact(&sensor.command).await?;
        match interpret_result(&reply) {
            RawResponse::NoData => {
                debug!("{} not supported by vehicle", sensor.key);
                Err(ObdError::NoData(sensor.key.to_string()))
            }
            RawResponse::Payload(hex) => sensor.decode(&hex),
        }
    }

    /// Look up a sensor by key and query it
    pub async fn query_key(
        &mut self,
        registry: &SensorRegistry,
        key: &str,
    ) -> Result<DecodedReading, ObdError> {
        let sensor = registry.require(key)?;
        self.query(sensor).await
    }

    /// Reset the adapter if connected, then release the transport.
    ///
    /// Idempotent; safe after a failed handshake. The lifecycle state is left
    /// as it was, so a closed connection may still report `Connected` while
    /// every operation returns [`ObdError::TransportClosed`].
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }

        if self.state() == ConnectionState::Connected {
            info!("Disconnecting OBD adapter on {}", self.port);
            self.in_flight = None;
            if let Err(e) = self.send_command(&Command::RESET).await {
                debug!("Reset on close failed: {}", e);
            }
        }

        self.transport.close();
        self.closed = true;
        self.in_flight = None;
        self.version = None;
    }

    fn ensure_open(&self) -> Result<(), ObdError> {
        if self.closed {
            Err(ObdError::TransportClosed)
        } else {
            Ok(())
        }
    }

    /// Move to `Failed` when the link itself broke
    fn check_link<V>(&mut self, result: Result<V, ObdError>) -> Result<V, ObdError> {
        if let Err(e) = &result {
            if e.is_io_failure() {
                self.in_flight = None;
                if matches!(
                    self.state(),
                    ConnectionState::Initializing | ConnectionState::Connected
                ) {
                    self.state.mark_failed(e.to_string())?;
                }
            }
        }
        result
    }
}

/// Extract the adapter identification from an ATZ reply
fn adapter_version(reply: &str) -> String {
    let version = reply
        .find(VERSION_MARKER)
        .and_then(|start| reply.get(start..))
        .unwrap_or(reply);
    version.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockReply, MockTransport};

    fn connection(mock: MockTransport) -> AdapterConnection<MockTransport> {
        AdapterConnection::new(mock, "mock", AdapterConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_connects() {
        let mut conn = connection(MockTransport::elm327());
        conn.initialize().await.unwrap();

        assert_eq!(conn.state(), ConnectionState::Connected);
        assert!(conn.is_connected());
        assert_eq!(conn.version(), Some("ELM327 v1.5"));
        assert_eq!(conn.transport().commands(), ["ATZ", "ATE0", "0100"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_reset_timeout_fails() {
        let mock = MockTransport::elm327().with_reply("ATZ", MockReply::Silent);
        let mut conn = connection(mock);

        let result = conn.initialize().await;
        assert!(matches!(result, Err(ObdError::ConnectionFailed(_))));
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert_eq!(conn.transport().commands(), ["ATZ"]);

        let rpm = SensorRegistry::standard().get("rpm").unwrap();
        assert!(matches!(
            conn.query(rpm).await,
            Err(ObdError::NotConnected(ConnectionState::Failed))
        ));
        assert_eq!(conn.transport().commands(), ["ATZ"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_supported_pids_failure() {
        let mock = MockTransport::elm327().with_reply("0100", MockReply::Raw(b">".to_vec()));
        let mut conn = connection(mock);

        assert!(conn.initialize().await.is_err());
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert!(conn.failure_reason().unwrap().contains("0100"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_twice_rejected() {
        let mut conn = connection(MockTransport::elm327());
        conn.initialize().await.unwrap();
        assert!(matches!(
            conn.initialize().await,
            Err(ObdError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_response_times_out() {
        let mut conn = connection(MockTransport::new().with_reply("0105", MockReply::Silent));
        conn.send_command(&Command::from_static("0105")).await.unwrap();

        let result = conn.read_response().await;
        assert!(matches!(result, Err(ObdError::ReadTimeout { attempts: 5 })));
        assert_eq!(conn.transport().empty_reads(), 5);
    }

    #[tokio::test]
    async fn test_byte_resets_empty_read_count() {
        let mut script = Vec::new();
        for &byte in b"41 0D 32>" {
            script.extend([None; 4]);
            script.push(Some(byte));
        }
        let mock = MockTransport::new().with_reply("010D1", MockReply::Gapped(script));
        let mut conn = connection(mock);

        let reply = conn.transact(&Command::from_static("010D1")).await.unwrap();
        assert_eq!(reply, "41 0D 32");
        assert_eq!(conn.transport().empty_reads(), 36);
    }

    #[tokio::test]
    async fn test_gap_after_partial_reply_times_out() {
        let mut script: Vec<Option<u8>> = b"41 0D".iter().copied().map(Some).collect();
        script.extend([None; 5]);
        script.push(Some(b'>'));
        let mock = MockTransport::new().with_reply("010D1", MockReply::Gapped(script));
        let mut conn = connection(mock);

        let result = conn.transact(&Command::from_static("010D1")).await;
        assert!(matches!(result, Err(ObdError::ReadTimeout { attempts: 5 })));
    }

    #[tokio::test]
    async fn test_non_ascii_byte_buffers_as_one_char() {
        let mock = MockTransport::new()
            .with_reply("010D1", MockReply::Raw(b"41 0D \xE9\xE9\r\r>".to_vec()));
        let mut conn = connection(mock);

        let reply = conn.transact(&Command::from_static("010D1")).await.unwrap();
        assert_eq!(reply.chars().count(), 8);
        assert_eq!(reply, "41 0D \u{e9}\u{e9}");
    }

    #[tokio::test]
    async fn test_read_response_strips_carriage_returns() {
        let mut conn = connection(MockTransport::elm327());
        let reply = conn.transact(&Command::from_static("010C1")).await.unwrap();
        assert_eq!(reply, "41 0C 0A F0");
    }

    #[tokio::test]
    async fn test_bare_prompt_is_no_buffer() {
        let mock = MockTransport::new().with_reply("ATE0", MockReply::Raw(b"\r\r>".to_vec()));
        let mut conn = connection(mock);
        assert!(matches!(
            conn.transact(&Command::ECHO_OFF).await,
            Err(ObdError::NoBuffer)
        ));
    }

    #[tokio::test]
    async fn test_second_command_while_in_flight() {
        let mut conn = connection(MockTransport::elm327());
        conn.send_command(&Command::ECHO_OFF).await.unwrap();
        assert!(matches!(
            conn.send_command(&Command::RESET).await,
            Err(ObdError::CommandInFlight { .. })
        ));
        conn.read_response().await.unwrap();
        assert!(conn.send_command(&Command::RESET).await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_bytes_flushed_before_send() {
        let mut mock = MockTransport::elm327();
        mock.inject(b"41 05 99\r\r>");
        let mut conn = connection(mock);
        let reply = conn.transact(&Command::from_static("010D1")).await.unwrap();
        assert_eq!(reply, "41 0D 32");
    }

    #[tokio::test]
    async fn test_wire_bytes() {
        let mut conn = connection(MockTransport::elm327());
        conn.transact(&Command::RESET).await.unwrap();
        assert_eq!(conn.transport().written(), b"ATZ\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_decodes_and_reports_no_data() {
        let mut conn = connection(MockTransport::elm327());
        conn.initialize().await.unwrap();
        let registry = SensorRegistry::standard();

        let rpm = conn.query_key(registry, "rpm").await.unwrap();
        assert!((rpm.value.as_f64().unwrap() - 700.0).abs() < 1e-9);

        let result = conn.query_key(registry, "maf").await;
        assert!(matches!(result, Err(ObdError::NoData(key)) if key == "maf"));
        assert!(conn.is_connected());

        assert!(matches!(
            conn.query_key(registry, "boost").await,
            Err(ObdError::UnknownSensor(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_connection_usable() {
        let mut conn = connection(MockTransport::elm327());
        conn.initialize().await.unwrap();
        conn.transport_mut().set_reply("0105", MockReply::Silent);

        let registry = SensorRegistry::standard();
        assert!(matches!(
            conn.query_key(registry, "temp").await,
            Err(ObdError::ReadTimeout { .. })
        ));
        assert!(conn.is_connected());

        conn.transport_mut()
            .set_reply("0105", MockReply::Text("41 05 28".into()));
        let temp = conn.query_key(registry, "temp").await.unwrap();
        assert!((temp.value.as_f64().unwrap() - 32.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_io_error_fails_connection() {
        let mut conn = connection(MockTransport::elm327());
        conn.initialize().await.unwrap();
        conn.transport_mut().fail_io();

        let registry = SensorRegistry::standard();
        assert!(matches!(
            conn.query_key(registry, "rpm").await,
            Err(ObdError::Io(_))
        ));
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_resets_and_is_idempotent() {
        let mut conn = connection(MockTransport::elm327());
        conn.initialize().await.unwrap();

        conn.close().await;
        conn.close().await;

        assert!(conn.transport().is_closed());
        assert_eq!(conn.transport().commands(), ["ATZ", "ATE0", "0100", "ATZ"]);
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert!(!conn.is_connected());
        assert!(conn.version().is_none());
        assert!(matches!(
            conn.send_command(&Command::RESET).await,
            Err(ObdError::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_never_initialized() {
        let mut conn = connection(MockTransport::elm327());
        conn.close().await;
        assert!(conn.transport().is_closed());
        assert!(conn.transport().commands().is_empty());
        assert!(conn.initialize().await.is_err());
    }

    #[test]
    fn test_adapter_version_extraction() {
        assert_eq!(adapter_version("ATZELM327 v1.5"), "ELM327 v1.5");
        assert_eq!(adapter_version(" OBDLink SX "), "OBDLink SX");
    }
}
