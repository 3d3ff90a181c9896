//! Newline-delimited JSON framing.
//!
//! Each direction of a connection carries one compact JSON record per line.
//! [`FrameCodec`] plugs into `tokio_util::codec::{FramedRead, FramedWrite}`:
//! decoding yields raw frame bytes (without the delimiter) and keeps any
//! partial trailing line buffered between reads; encoding serializes any
//! `Serialize` value and appends exactly one `\n`.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Default upper bound for a single frame (1 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Framing failures. Both variants are fatal for the stream they occur on.
#[derive(Error, Debug)]
pub enum FrameError {
    /// A line grew past the configured limit without a delimiter.
    #[error("frame exceeds {limit} bytes without a newline")]
    TooLong { limit: usize },

    /// The stream ended in the middle of a frame.
    #[error("stream ended with {pending} undelimited bytes")]
    Incomplete { pending: usize },

    /// An outgoing message could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Codec for newline-delimited JSON frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_bytes: usize,
    /// Offset up to which the buffer is known to hold no `\n`.
    scanned: usize,
}

impl FrameCodec {
    /// Create a codec with the default frame limit.
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    /// Create a codec rejecting frames longer than `max_frame_bytes`.
    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes: max_frame_bytes.max(1),
            scanned: 0,
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        loop {
            let newline = buf[self.scanned..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.scanned + offset);

            let Some(end) = newline else {
                if buf.len() > self.max_frame_bytes {
                    return Err(FrameError::TooLong {
                        limit: self.max_frame_bytes,
                    });
                }
                self.scanned = buf.len();
                return Ok(None);
            };

            self.scanned = 0;
            if end > self.max_frame_bytes {
                return Err(FrameError::TooLong {
                    limit: self.max_frame_bytes,
                });
            }

            let mut line = buf.split_to(end + 1);
            line.truncate(end);
            if line.last() == Some(&b'\r') {
                line.truncate(end - 1);
            }

            // Blank keep-alive lines carry no message.
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(line.freeze()));
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let pending = buf.len();
        buf.clear();
        self.scanned = 0;
        Err(FrameError::Incomplete { pending })
    }
}

impl<T: Serialize> Encoder<T> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), FrameError> {
        let line = encode_frame(&item)?;
        dst.reserve(line.len());
        dst.put_slice(&line);
        Ok(())
    }
}

/// Serialize `message` to compact UTF-8 JSON followed by a single `\n`.
pub fn encode_frame<T: Serialize + ?Sized>(message: &T) -> Result<Vec<u8>, FrameError> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    Ok(line)
}
