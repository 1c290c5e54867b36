//! # Bounded line reader.
//!
//! [`LineReader`] pulls newline-terminated frames from any `AsyncBufRead` without
//! ever buffering more than [`MAX_LINE_BYTES`]. A peer streaming bytes with no
//! newline cannot make it allocate unboundedly: once the limit is crossed the rest
//! of the line is discarded and reported as [`ProtocolError::TooLarge`].
//!
//! All state lives in the reader, so `next_line` is cancel-safe and can sit in a
//! `tokio::select!` next to timers.

use std::io;

use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use super::codec::{MAX_LINE_BYTES, decode_line};
use crate::error::ProtocolError;

/// Reads NDJSON frames with a size limit.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
    discarding: bool,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    /// Wraps a buffered reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            discarding: false,
        }
    }

    /// Reads the next line.
    ///
    /// - `Ok(None)` at EOF
    /// - `Ok(Some(Err(_)))` for an oversized or non UTF-8 line (the stream stays usable)
    /// - `Err(_)` on I/O failure
    pub async fn next_line(&mut self) -> io::Result<Option<Result<String, ProtocolError>>> {
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                if self.buf.is_empty() && !self.discarding {
                    return Ok(None);
                }
                return Ok(Some(self.take_line()));
            }

            match available.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    if !self.discarding {
                        self.buf.extend_from_slice(&available[..pos]);
                    }
                    self.inner.consume(pos + 1);
                    return Ok(Some(self.take_line()));
                }
                None => {
                    let len = available.len();
                    if !self.discarding {
                        self.buf.extend_from_slice(available);
                    }
                    self.inner.consume(len);
                }
            }

            if self.buf.len() > MAX_LINE_BYTES {
                self.buf = Vec::new();
                self.discarding = true;
            }
        }
    }

    /// Reads and decodes the next message.
    pub async fn next_message<T: DeserializeOwned>(
        &mut self,
    ) -> io::Result<Option<Result<T, ProtocolError>>> {
        Ok(self
            .next_line()
            .await?
            .map(|line| line.and_then(|l| decode_line(&l))))
    }

    fn take_line(&mut self) -> Result<String, ProtocolError> {
        let oversized = std::mem::take(&mut self.discarding) || self.buf.len() > MAX_LINE_BYTES;
        let bytes = std::mem::take(&mut self.buf);
        if oversized {
            return Err(ProtocolError::TooLarge {
                max_bytes: MAX_LINE_BYTES,
            });
        }
        String::from_utf8(bytes).map_err(|e| ProtocolError::Malformed {
            reason: e.to_string(),
        })
    }
}
