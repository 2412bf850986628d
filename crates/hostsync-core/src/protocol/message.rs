//! Typed protocol messages.
//!
//! The wire carries a `subType` string next to a free-form `payload`. Both are
//! lifted into closed enums here so dispatch can match exhaustively.

use crate::PeerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope `subType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    HostElection,
    HostHeartbeat,
    HostAssignment,
    PlayerJoin,
    PlayerLeave,
    GameStateUpdate,
    PlayerInput,
}

impl MessageKind {
    pub const ALL: [MessageKind; 7] = [
        MessageKind::HostElection,
        MessageKind::HostHeartbeat,
        MessageKind::HostAssignment,
        MessageKind::PlayerJoin,
        MessageKind::PlayerLeave,
        MessageKind::GameStateUpdate,
        MessageKind::PlayerInput,
    ];

    /// Wire name, e.g. `HOST_ELECTION`.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::HostElection => "HOST_ELECTION",
            MessageKind::HostHeartbeat => "HOST_HEARTBEAT",
            MessageKind::HostAssignment => "HOST_ASSIGNMENT",
            MessageKind::PlayerJoin => "PLAYER_JOIN",
            MessageKind::PlayerLeave => "PLAYER_LEAVE",
            MessageKind::GameStateUpdate => "GAME_STATE_UPDATE",
            MessageKind::PlayerInput => "PLAYER_INPUT",
        }
    }

    /// Parse a wire name.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionPayload {
    pub candidate_id: PeerId,
    /// Time the election was started, in ms since epoch.
    #[serde(default)]
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentPayload {
    pub host_id: PeerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    /// Falls back to the envelope sender when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<PeerId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePayload {
    pub state: Value,
    #[serde(default)]
    pub is_delta: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputPayload {
    pub input: Value,
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    HostElection(ElectionPayload),
    HostHeartbeat,
    HostAssignment(AssignmentPayload),
    PlayerJoin(PresencePayload),
    PlayerLeave(PresencePayload),
    GameStateUpdate(StatePayload),
    PlayerInput(InputPayload),
}

impl Message {
    pub fn election(candidate_id: PeerId, nonce: u64) -> Self {
        Self::HostElection(ElectionPayload {
            candidate_id,
            nonce,
        })
    }

    pub fn assignment(host_id: PeerId) -> Self {
        Self::HostAssignment(AssignmentPayload { host_id })
    }

    pub fn join(peer_id: PeerId) -> Self {
        Self::PlayerJoin(PresencePayload {
            peer_id: Some(peer_id),
        })
    }

    pub fn leave(peer_id: PeerId) -> Self {
        Self::PlayerLeave(PresencePayload {
            peer_id: Some(peer_id),
        })
    }

    pub fn state(state: Value, is_delta: bool) -> Self {
        Self::GameStateUpdate(StatePayload { state, is_delta })
    }

    pub fn input(input: Value) -> Self {
        Self::PlayerInput(InputPayload { input })
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::HostElection(_) => MessageKind::HostElection,
            Message::HostHeartbeat => MessageKind::HostHeartbeat,
            Message::HostAssignment(_) => MessageKind::HostAssignment,
            Message::PlayerJoin(_) => MessageKind::PlayerJoin,
            Message::PlayerLeave(_) => MessageKind::PlayerLeave,
            Message::GameStateUpdate(_) => MessageKind::GameStateUpdate,
            Message::PlayerInput(_) => MessageKind::PlayerInput,
        }
    }

    /// Payload as a JSON value for the envelope.
    pub fn to_payload(&self) -> serde_json::Result<Value> {
        match self {
            Message::HostElection(p) => serde_json::to_value(p),
            Message::HostHeartbeat => Ok(Value::Object(Default::default())),
            Message::HostAssignment(p) => serde_json::to_value(p),
            Message::PlayerJoin(p) | Message::PlayerLeave(p) => serde_json::to_value(p),
            Message::GameStateUpdate(p) => serde_json::to_value(p),
            Message::PlayerInput(p) => serde_json::to_value(p),
        }
    }

    /// Decode a payload for the given kind.
    pub fn from_payload(kind: MessageKind, payload: Value) -> serde_json::Result<Self> {
        // A missing payload is null on the wire; presence payloads tolerate it.
        let payload = match payload {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        Ok(match kind {
            MessageKind::HostElection => Message::HostElection(serde_json::from_value(payload)?),
            MessageKind::HostHeartbeat => Message::HostHeartbeat,
            MessageKind::HostAssignment => {
                Message::HostAssignment(serde_json::from_value(payload)?)
            }
            MessageKind::PlayerJoin => Message::PlayerJoin(serde_json::from_value(payload)?),
            MessageKind::PlayerLeave => Message::PlayerLeave(serde_json::from_value(payload)?),
            MessageKind::GameStateUpdate => {
                Message::GameStateUpdate(serde_json::from_value(payload)?)
            }
            MessageKind::PlayerInput => Message::PlayerInput(serde_json::from_value(payload)?),
        })
    }
}
