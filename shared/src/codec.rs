//! Length-prefixed frame codec.
//!
//! Each frame on the stream is a big-endian `u32` payload length followed by
//! the `bincode` encoding of the frame. The payload never depends on host
//! integer widths, padding or byte order, and a reader can always tell where
//! one frame ends and the next begins regardless of how TCP split the bytes.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use thiserror::Error;

pub const LENGTH_PREFIX_LEN: usize = 4;

/// Largest payload accepted from a peer.
pub const MAX_FRAME_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame payload of {0} bytes exceeds the {max} byte limit", max = MAX_FRAME_LEN)]
    Oversized(usize),
    #[error("malformed frame: {0}")]
    Malformed(#[from] bincode::Error),
}

impl From<CodecError> for io::Error {
    fn from(err: CodecError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

/// Serializes `frame` and prepends its length.
pub fn encode_frame<T: Serialize>(frame: &T) -> Result<Vec<u8>, CodecError> {
    let payload = bincode::serialize(frame)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(CodecError::Oversized(payload.len()));
    }

    let mut bytes = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Deserializes a single payload (without its length prefix).
pub fn decode_frame<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    Ok(bincode::deserialize(payload)?)
}

/// Reassembles frames from stream fragments.
///
/// Bytes are appended with [`extend`](Self::extend) as they arrive; complete
/// frames are taken out with [`next_frame`](Self::next_frame). Any partial
/// frame stays buffered until the rest of it shows up.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Returns the next complete frame, or `None` if more bytes are needed.
    ///
    /// An oversized length prefix is reported as soon as the prefix is seen,
    /// without waiting for the payload.
    pub fn next_frame<T: DeserializeOwned>(&mut self) -> Result<Option<T>, CodecError> {
        if self.buffer.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        prefix.copy_from_slice(&self.buffer[..LENGTH_PREFIX_LEN]);
        let len = u32::from_be_bytes(prefix) as usize;
        if len > MAX_FRAME_LEN {
            return Err(CodecError::Oversized(len));
        }

        let end = LENGTH_PREFIX_LEN + len;
        if self.buffer.len() < end {
            return Ok(None);
        }

        let frame = decode_frame(&self.buffer[LENGTH_PREFIX_LEN..end]);
        self.buffer.drain(..end);
        frame.map(Some)
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
