//! Relay handshake message.
//!
//! The handshake is JSON sent as a binary WebSocket frame (UTF-8 bytes). It is
//! the first frame a peer sends after connecting; everything after it is an
//! opaque session payload the relay fans out untouched.

use serde::{Deserialize, Serialize};

/// Maximum frame size (1 MiB). Larger frames are dropped, not forwarded.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Handshake message identifying the connecting peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeMessage {
    /// Always "handshake"
    #[serde(rename = "type")]
    pub msg_type: String,

    /// The peer's identifier
    #[serde(rename = "peerId")]
    pub peer_id: String,
}

impl HandshakeMessage {
    pub fn new(peer_id: &str) -> Self {
        Self {
            msg_type: "handshake".to_string(),
            peer_id: peer_id.to_string(),
        }
    }

    /// Serialize to UTF-8 JSON bytes for sending as binary WebSocket frame.
    pub fn to_binary(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Try to parse a handshake from binary data.
    ///
    /// Returns None if the data is not valid UTF-8 JSON or not a handshake message.
    pub fn from_binary(data: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(data).ok()?;
        let msg: Self = serde_json::from_str(text).ok()?;

        if msg.msg_type == "handshake" && !msg.peer_id.is_empty() {
            Some(msg)
        } else {
            None
        }
    }
}
