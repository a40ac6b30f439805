//! In-memory ELM327 simulator
//!
//! Answers commands from a reply table so the protocol can be exercised
//! without hardware. Replies are queued when the command's `\r\n` arrives and
//! drained one byte per [`Transport::read_byte`] call; an empty queue or a
//! scripted gap reads as a timeout without waiting.

use crate::error::ObdError;
use crate::transport::Transport;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::debug;

/// How the simulator answers one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Send the text followed by `\r\r>`
    Text(String),
    /// Send exactly these bytes
    Raw(Vec<u8>),
    /// Send nothing; the read times out
    Silent,
    /// Send bytes with `None` entries read as empty reads in between
    Gapped(Vec<Option<u8>>),
}

/// Scriptable adapter simulator
#[derive(Debug, Default)]
pub struct MockTransport {
    replies: HashMap<String, MockReply>,
    pending: VecDeque<Option<u8>>,
    line: Vec<u8>,
    written: Vec<u8>,
    commands: Vec<String>,
    echo: bool,
    closed: bool,
    fail_io: bool,
    empty_reads: usize,
}

impl MockTransport {
    /// Simulator with no canned replies
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulator answering the handshake and a few live PIDs
    pub fn elm327() -> Self {
        Self::new()
            .with_reply("ATZ", MockReply::Text("\r\rELM327 v1.5".into()))
            .with_reply("ATE0", MockReply::Text("OK".into()))
            .with_reply("ATE1", MockReply::Text("OK".into()))
            .with_reply("0100", MockReply::Text("41 00 BE 3E B8 11".into()))
            .with_reply("0101", MockReply::Text("41 01 83 07 65 04".into()))
            .with_reply("01041", MockReply::Text("41 04 7F".into()))
            .with_reply("0105", MockReply::Text("41 05 28".into()))
            .with_reply("0106", MockReply::Text("41 06 90".into()))
            .with_reply("010C1", MockReply::Text("41 0C 0A F0".into()))
            .with_reply("010D1", MockReply::Text("41 0D 32".into()))
            .with_reply("01111", MockReply::Text("41 11 33".into()))
    }

    /// Set the reply for a command, replacing any previous one
    pub fn with_reply(mut self, command: &str, reply: MockReply) -> Self {
        self.set_reply(command, reply);
        self
    }

    /// Set the reply for a command on an existing simulator
    pub fn set_reply(&mut self, command: &str, reply: MockReply) {
        self.replies.insert(command.to_string(), reply);
    }

    /// Echo received commands back, as an adapter does before `ATE0`
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Queue bytes as if the adapter had sent them unprompted
    pub fn inject(&mut self, bytes: &[u8]) {
        self.queue(bytes);
    }

    /// Make every subsequent write and read fail with an I/O error
    pub fn fail_io(&mut self) {
        self.fail_io = true;
    }

    /// Everything written so far
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Commands received so far, in order
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Number of reads that returned no byte
    pub fn empty_reads(&self) -> usize {
        self.empty_reads
    }

    /// Check if the transport was closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn check_open(&self) -> Result<(), ObdError> {
        if self.closed {
            return Err(ObdError::TransportClosed);
        }
        if self.fail_io {
            return Err(ObdError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated adapter unplugged",
            )));
        }
        Ok(())
    }

    fn handle_command(&mut self, command: String) {
        debug!("Mock adapter received {:?}", command);
        if self.echo {
            self.queue(command.as_bytes());
            self.queue(b"\r");
        }

        let reply = match self.replies.get(&command) {
            Some(reply) => reply.clone(),
            None if command.starts_with("AT") => MockReply::Text("?".into()),
            None => MockReply::Text("NO DATA".into()),
        };

        match command.as_str() {
            "ATE0" => self.echo = false,
            "ATE1" => self.echo = true,
            _ => {}
        }

        match reply {
            MockReply::Text(text) => {
                self.queue(text.as_bytes());
                self.queue(b"\r\r>");
            }
            MockReply::Raw(bytes) => self.queue(&bytes),
            MockReply::Silent => {}
            MockReply::Gapped(script) => self.pending.extend(script),
        }
        self.commands.push(command);
    }

    fn queue(&mut self, bytes: &[u8]) {
        self.pending.extend(bytes.iter().copied().map(Some));
    }
}

impl Transport for MockTransport {
    async fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ObdError> {
        self.check_open()?;
        self.written.extend_from_slice(bytes);

        for &byte in bytes {
            match byte {
                b'\n' => {
                    let line = std::mem::take(&mut self.line);
                    let command = String::from_utf8_lossy(&line).trim().to_string();
                    if !command.is_empty() {
                        self.handle_command(command);
                    }
                }
                b'\r' => {}
                other => self.line.push(other),
            }
        }
        Ok(())
    }

    async fn read_byte(&mut self, _timeout: Duration) -> Result<Option<u8>, ObdError> {
        self.check_open()?;
        let byte = self.pending.pop_front().flatten();
        if byte.is_none() {
            self.empty_reads += 1;
        }
        Ok(byte)
    }

    fn flush(&mut self) -> Result<(), ObdError> {
        self.check_open()?;
        self.pending.clear();
        self.line.clear();
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(mock: &mut MockTransport) -> String {
        let mut out = Vec::new();
        while let Some(byte) = mock.read_byte(Duration::ZERO).await.unwrap() {
            out.push(byte);
        }
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_canned_reply() {
        let mut mock = MockTransport::elm327();
        mock.write_bytes(b"010C1\r\n").await.unwrap();
        assert_eq!(drain(&mut mock).await, "41 0C 0A F0\r\r>");
        assert_eq!(mock.commands(), ["010C1"]);
        assert_eq!(mock.empty_reads(), 1);
    }

    #[tokio::test]
    async fn test_unknown_commands() {
        let mut mock = MockTransport::new();
        mock.write_bytes(b"ATXX\r\n").await.unwrap();
        assert_eq!(drain(&mut mock).await, "?\r\r>");
        mock.write_bytes(b"0142\r\n").await.unwrap();
        assert_eq!(drain(&mut mock).await, "NO DATA\r\r>");
    }

    #[tokio::test]
    async fn test_echo_until_disabled() {
        let mut mock = MockTransport::elm327().with_echo(true);
        mock.write_bytes(b"ATE0\r\n").await.unwrap();
        assert_eq!(drain(&mut mock).await, "ATE0\rOK\r\r>");
        mock.write_bytes(b"010D1\r\n").await.unwrap();
        assert_eq!(drain(&mut mock).await, "41 0D 32\r\r>");
    }

    #[tokio::test]
    async fn test_gapped_reply_reads_empty_between_bytes() {
        let script = vec![None, Some(b'O'), None, None, Some(b'K'), Some(b'>')];
        let mut mock = MockTransport::new().with_reply("ATE0", MockReply::Gapped(script));
        mock.write_bytes(b"ATE0\r\n").await.unwrap();

        let mut reads = Vec::new();
        for _ in 0..7 {
            reads.push(mock.read_byte(Duration::ZERO).await.unwrap());
        }
        assert_eq!(
            reads,
            [None, Some(b'O'), None, None, Some(b'K'), Some(b'>'), None]
        );
        assert_eq!(mock.empty_reads(), 4);
    }

    #[tokio::test]
    async fn test_closed_mock_rejects_io() {
        let mut mock = MockTransport::elm327();
        mock.close();
        mock.close();
        assert!(matches!(
            mock.write_bytes(b"ATZ\r\n").await,
            Err(ObdError::TransportClosed)
        ));
        assert!(mock.flush().is_err());
    }
}
