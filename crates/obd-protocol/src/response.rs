//! Response framing and cleanup
//!
//! The adapter answers with free-form ASCII terminated by the `>` prompt.
//! [`interpret_result`] turns one framed reply into either a hex payload or
//! the `NO DATA` sentinel.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Prompt byte the adapter emits when it is ready for the next command
pub const PROMPT: u8 = b'>';

/// Sentinel the adapter sends for PIDs the vehicle does not support
pub const NO_DATA: &str = "NODATA";

/// Shortest reply that can carry a header plus one data byte
pub const MIN_RESPONSE_LEN: usize = 7;

/// Length of the echoed mode/PID header (e.g. `410C`)
const HEADER_LEN: usize = 4;

/// Cleaned-up result of one command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawResponse {
    /// Hex payload with header and whitespace removed
    Payload(String),
    /// Vehicle does not support the requested PID
    NoData,
}

/// Reduce a framed reply to its payload.
///
/// Only the first line is kept, whitespace is removed and the 4-character
/// response header is dropped. Replies shorter than [`MIN_RESPONSE_LEN`] are
/// logged and still processed.
pub fn interpret_result(raw: &str) -> RawResponse {
    if is_short(raw) {
        warn!("Bogus response from adapter: {:?}", raw);
    }

    let first_line = raw.split('\r').next().unwrap_or_default();
    let code: String = first_line.chars().filter(|c| !c.is_whitespace()).collect();

    if code.starts_with(NO_DATA) {
        return RawResponse::NoData;
    }

    RawResponse::Payload(code.chars().skip(HEADER_LEN).collect())
}

/// Replies are buffered one char per received byte, so count chars
fn is_short(raw: &str) -> bool {
    raw.chars().count() < MIN_RESPONSE_LEN
}
