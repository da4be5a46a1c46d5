//! NDJSON line codec for agent streams.
//!
//! Splits an unbounded byte stream into lines on `\n`, keeping any trailing
//! partial line buffered until the rest of it arrives. Chunk boundaries are
//! never assumed to align with line boundaries.
//!
//! Use [`LineCodec`] with [`tokio_util::codec::FramedRead`] (inbound) and
//! [`tokio_util::codec::FramedWrite`] (outbound).
//!
//! # Decoder
//!
//! - Yields each complete line without its terminator (and without a
//!   trailing `\r`).
//! - Invalid UTF-8 is replaced rather than rejected, so one bad byte never
//!   fails the stream.
//! - A line longer than the configured maximum returns
//!   [`AppError::Protocol`]`("line too long: …")`. The stream cannot be
//!   resynchronized after that, so callers treat it as fatal.
//!
//! # Encoder
//!
//! Each [`serde_json::Value`] becomes exactly one `\n`-terminated line.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{AppError, Result};

/// Default maximum inbound line length: 16 MiB.
pub const DEFAULT_MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Line codec for bidirectional agent streams.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_line_bytes: usize,
    /// Bytes of the buffer already scanned for `\n` without finding one.
    next_index: usize,
}

impl LineCodec {
    /// Codec with the [`DEFAULT_MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }

    /// Codec with a custom limit.
    #[must_use]
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes,
            next_index: 0,
        }
    }

    /// Configured maximum line length.
    #[must_use]
    pub fn max_line_bytes(&self) -> usize {
        self.max_line_bytes
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        let scan_from = self.next_index.min(src.len());
        match src[scan_from..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let newline_at = scan_from + offset;
                self.next_index = 0;
                if newline_at > self.max_line_bytes {
                    return Err(line_too_long(self.max_line_bytes));
                }
                let line = src.split_to(newline_at + 1);
                Ok(Some(line_to_string(&line[..newline_at])))
            }
            None => {
                if src.len() > self.max_line_bytes {
                    return Err(line_too_long(self.max_line_bytes));
                }
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if src.is_empty() {
            return Ok(None);
        }
        // Final line without a terminator.
        let rest = src.split_to(src.len());
        Ok(Some(line_to_string(&rest)))
    }
}

impl Encoder<serde_json::Value> for LineCodec {
    type Error = AppError;

    fn encode(&mut self, item: serde_json::Value, dst: &mut BytesMut) -> Result<()> {
        let bytes = serde_json::to_vec(&item)
            .map_err(|e| AppError::Write(format!("failed to serialise outbound message: {e}")))?;
        dst.reserve(bytes.len() + 1);
        dst.put_slice(&bytes);
        dst.put_u8(b'\n');
        Ok(())
    }
}

fn line_to_string(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

fn line_too_long(max: usize) -> AppError {
    AppError::Protocol(format!("line too long: exceeded {max} bytes"))
}
