//! # NDJSON framing.
//!
//! Pure functions, no I/O: read loops call [`decode_line`] for every line and
//! writers call [`encode_line`] for every message. Validation happens here so
//! supervisor logic only ever sees well-formed [`Inbound`](super::Inbound) values.

use serde::{Serialize, de::DeserializeOwned};

use crate::error::ProtocolError;

/// Maximum accepted line length (1 MiB), checked before any JSON parsing.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Encodes one message as a single JSON line terminated by `\n`.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(message).map_err(|e| ProtocolError::Malformed {
        reason: e.to_string(),
    })?;
    line.push('\n');
    Ok(line)
}

/// Decodes one line into a message, rejecting oversized, empty or untagged input.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, ProtocolError> {
    if line.len() > MAX_LINE_BYTES {
        return Err(ProtocolError::TooLarge {
            max_bytes: MAX_LINE_BYTES,
        });
    }
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::Empty);
    }
    serde_json::from_str(trimmed).map_err(|e| ProtocolError::Malformed {
        reason: e.to_string(),
    })
}
