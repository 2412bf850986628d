//! Protocol definitions for session peers.
//!
//! This module defines the wire protocol exchanged over the broadcast channel:
//! - Envelope framing (session scoping, sender, logical target)
//! - Closed set of message kinds and their payloads
//! - Tolerant payload normalization

pub mod encoding;
pub mod envelope;
pub mod message;

pub use encoding::{PayloadShape, detect_payload_shape};
pub use envelope::Envelope;
pub use message::{
    AssignmentPayload, ElectionPayload, InputPayload, Message, MessageKind, PresencePayload,
    StatePayload,
};

use thiserror::Error;

/// Why an inbound payload could not be turned into a message.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Empty payload")]
    Empty,

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Envelope has no subType")]
    MissingSubType,

    #[error("Unknown subType: {0}")]
    UnknownSubType(String),

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(serde_json::Error),

    #[error("Invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: MessageKind,
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
