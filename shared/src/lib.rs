//! Protocol vocabulary shared by the chat server and client.
//!
//! Two frames travel over the wire: the [`MessageFrame`] (chat text or a
//! display-name announcement) and the [`ServerStatus`] the server sends right
//! before it closes a connection it refuses. Server-to-client traffic is
//! wrapped in a [`ServerFrame`] so both can share one stream.
//!
//! Framing and serialization live in [`codec`].

pub mod codec;

pub use codec::{decode_frame, encode_frame, CodecError, FrameDecoder, MAX_FRAME_LEN};

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

pub const SERVER_PORT: u16 = 6741;
pub const MAX_CLIENTS: usize = 10;

/// Size of the text buffer of a message frame, terminator included.
pub const TEXT_CAPACITY: usize = 128;
/// Size of a client's display-name buffer, terminator included.
pub const NAME_CAPACITY: usize = 21;

pub const MAX_TEXT_LEN: usize = TEXT_CAPACITY - 1;
pub const MAX_NAME_LEN: usize = NAME_CAPACITY - 1;

/// What a [`MessageFrame`] carries. Variant order is the wire ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    None,
    Chat,
    Connect,
}

/// A chat line or a display-name announcement.
///
/// The text never exceeds [`MAX_TEXT_LEN`] bytes, whether it was built
/// locally or decoded from a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFrame {
    kind: FrameKind,
    #[serde(deserialize_with = "deserialize_clamped_text")]
    text: String,
}

impl MessageFrame {
    pub fn new(kind: FrameKind, text: &str) -> Self {
        Self {
            kind,
            text: truncate_utf8(text, MAX_TEXT_LEN).to_owned(),
        }
    }

    pub fn chat(text: &str) -> Self {
        Self::new(FrameKind::Chat, text)
    }

    pub fn connect(name: &str) -> Self {
        Self::new(FrameKind::Connect, name)
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Byte length of the text, always `<= MAX_TEXT_LEN`.
    pub fn text_length(&self) -> usize {
        self.text.len()
    }
}

/// Reads peer-supplied text as raw bytes so that invalid UTF-8 or an
/// oversized length cannot escape the clamp.
fn deserialize_clamped_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<u8>::deserialize(deserializer)?;
    let terminated = match raw.iter().position(|&b| b == 0) {
        Some(nul) => &raw[..nul],
        None => &raw[..],
    };
    let text = String::from_utf8_lossy(terminated);
    Ok(truncate_utf8(&text, MAX_TEXT_LEN).to_owned())
}

/// Why the server is closing a connection it did not admit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    ServerError,
    ServerFull,
}

impl ServerStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ServerStatus::ServerError => "SERVER_ERROR",
            ServerStatus::ServerFull => "SERVER_FULL",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Everything the server writes to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerFrame {
    Message(MessageFrame),
    Status(ServerStatus),
}

/// Longest prefix of `text` that fits in `max_bytes` without splitting a char.
pub fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
