//! Byte transports
//!
//! A [`Transport`] is the half-duplex byte pipe under the command protocol:
//! write a command, then pull the reply one byte at a time.

use crate::error::ObdError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

/// Half-duplex byte stream to an adapter
pub trait Transport: Send {
    /// Write all bytes
    fn write_bytes(&mut self, bytes: &[u8]) -> impl Future<Output = Result<(), ObdError>> + Send;

    /// Read one byte, `None` if nothing arrived within `timeout`
    fn read_byte(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<u8>, ObdError>> + Send;

    /// Discard anything queued in either direction
    fn flush(&mut self) -> Result<(), ObdError>;

    /// Release the underlying device. Safe to call repeatedly.
    fn close(&mut self);
}

/// Source of candidate port names
pub trait PortProvider {
    /// Ports an adapter may be attached to, most likely first
    fn available_ports(&self) -> Result<Vec<String>, ObdError>;
}

/// Fixed list of ports
#[derive(Debug, Clone, Default)]
pub struct StaticPorts(pub Vec<String>);

impl PortProvider for StaticPorts {
    fn available_ports(&self) -> Result<Vec<String>, ObdError> {
        Ok(self.0.clone())
    }
}

/// Closes a [`SerialTransport`] from another task
#[derive(Debug, Clone)]
pub struct CloseHandle {
    closed: Arc<watch::Sender<bool>>,
}

impl CloseHandle {
    /// Close the transport; a pending read fails with [`ObdError::TransportClosed`]
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Check if close was requested
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

/// Serial port transport (8N1, no flow control)
pub struct SerialTransport {
    port_name: String,
    stream: Option<SerialStream>,
    closed: Arc<watch::Sender<bool>>,
}

impl SerialTransport {
    /// Open `port_name` at `baud_rate`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, ObdError> {
        info!("Opening serial port {} at {} baud", port_name, baud_rate);

        let stream = tokio_serial::new(port_name, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| ObdError::ConnectionFailed(format!("{}: {}", port_name, e)))?;

        Ok(Self::from_stream(port_name, stream))
    }

    /// Wrap an already opened stream
    pub fn from_stream(port_name: &str, stream: SerialStream) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            port_name: port_name.to_string(),
            stream: Some(stream),
            closed: Arc::new(closed),
        }
    }

    /// Handle that can close this transport while a read is pending
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            closed: Arc::clone(&self.closed),
        }
    }

    fn stream(&mut self) -> Result<&mut SerialStream, ObdError> {
        if *self.closed.borrow() {
            self.stream = None;
        }
        self.stream.as_mut().ok_or(ObdError::TransportClosed)
    }
}

impl Transport for SerialTransport {
    async fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ObdError> {
        let stream = self.stream()?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>, ObdError> {
        let mut closed = self.closed.subscribe();
        let stream = self.stream()?;

        tokio::select! {
            _ = closed.wait_for(|closed| *closed) => Err(ObdError::TransportClosed),
            read = tokio::time::timeout(timeout, stream.read_u8()) => match read {
                Ok(Ok(byte)) => Ok(Some(byte)),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Ok(None),
            },
        }
    }

    fn flush(&mut self) -> Result<(), ObdError> {
        self.stream()?.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn close(&mut self) {
        self.closed.send_replace(true);
        if self.stream.take().is_some() {
            debug!("Closed serial port {}", self.port_name);
        }
    }
}
