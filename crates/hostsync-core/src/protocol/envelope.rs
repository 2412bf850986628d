//! Wire envelope wrapping every protocol message.
//!
//! Wire format (JSON, camelCase):
//! `{"subType":"HOST_HEARTBEAT","sessionId":"…","timestamp":1,"senderId":"peer-9","payload":{}}`
//!
//! `targetPeerId` marks a directed message. Delivery is still a broadcast;
//! receivers filter on it (see [`Envelope::is_for`]).

use super::encoding::{normalize, normalize_value};
use super::message::{Message, MessageKind};
use super::{DecodeError, EncodeError};
use crate::{PeerId, Session};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub sub_type: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Send time in ms since epoch.
    #[serde(default)]
    pub timestamp: u64,
    pub sender_id: PeerId,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_peer_id: Option<PeerId>,
}

impl Envelope {
    /// Wrap a message for broadcast to the whole session.
    pub fn new(session: &Session, timestamp: u64, message: &Message) -> Result<Self, EncodeError> {
        Ok(Self {
            sub_type: message.kind(),
            session_id: Some(session.session_id().to_string()),
            timestamp,
            sender_id: session.local_peer_id().clone(),
            payload: message.to_payload()?,
            target_peer_id: None,
        })
    }

    /// Wrap a message logically addressed to a single peer.
    pub fn directed(
        session: &Session,
        timestamp: u64,
        message: &Message,
        target: PeerId,
    ) -> Result<Self, EncodeError> {
        let mut envelope = Self::new(session, timestamp, message)?;
        envelope.target_peer_id = Some(target);
        Ok(envelope)
    }

    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, EncodeError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse from raw transport bytes (JSON text, possibly double-encoded).
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        Self::from_value(normalize(data)?)
    }

    /// Parse from an already-structured value.
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let value = normalize_value(value)?;

        // Classify the subType up front so unknown kinds get their own error
        let name = match value.get("subType") {
            Some(Value::String(name)) => name.clone(),
            _ => return Err(DecodeError::MissingSubType),
        };
        if MessageKind::from_wire(&name).is_none() {
            return Err(DecodeError::UnknownSubType(name));
        }

        serde_json::from_value(value).map_err(DecodeError::InvalidEnvelope)
    }

    /// Decode the typed message carried in the payload.
    pub fn message(&self) -> Result<Message, DecodeError> {
        Message::from_payload(self.sub_type, self.payload.clone()).map_err(|source| {
            DecodeError::InvalidPayload {
                kind: self.sub_type,
                source,
            }
        })
    }

    /// Whether this envelope should be processed by `peer_id`.
    ///
    /// Broadcast envelopes are for everyone; directed ones only for their target.
    pub fn is_for(&self, peer_id: &PeerId) -> bool {
        self.target_peer_id.as_ref().is_none_or(|target| target == peer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn peer(s: &str) -> PeerId {
        s.parse().unwrap()
    }

    fn session() -> Session {
        Session::new("session-1", peer("peer-9"))
    }

    #[test]
    fn test_wire_format() {
        let envelope = Envelope::new(&session(), 42, &Message::assignment(peer("peer-9"))).unwrap();
        let json: Value = serde_json::from_slice(&envelope.to_json().unwrap()).unwrap();

        assert_eq!(
            json,
            json!({
                "subType": "HOST_ASSIGNMENT",
                "sessionId": "session-1",
                "timestamp": 42,
                "senderId": "peer-9",
                "payload": {"hostId": "peer-9"}
            })
        );
    }

    #[test]
    fn test_directed_carries_target() {
        let envelope = Envelope::directed(
            &session(),
            1,
            &Message::input(json!({"left": true})),
            peer("peer-3"),
        )
        .unwrap();
        let text = String::from_utf8(envelope.to_json().unwrap()).unwrap();
        assert!(text.contains("\"targetPeerId\":\"peer-3\""));

        assert!(envelope.is_for(&peer("peer-3")));
        assert!(!envelope.is_for(&peer("peer-9")));
    }

    #[test]
    fn test_broadcast_is_for_everyone() {
        let envelope = Envelope::new(&session(), 1, &Message::HostHeartbeat).unwrap();
        assert!(envelope.is_for(&peer("anyone")));
    }

    #[test]
    fn test_decode_text_and_structured() {
        let envelope = Envelope::new(&session(), 7, &Message::state(json!({"a": 1}), false)).unwrap();
        let bytes = envelope.to_json().unwrap();

        assert_eq!(Envelope::decode(&bytes).unwrap(), envelope);

        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(Envelope::from_value(value).unwrap(), envelope);

        let quoted = serde_json::to_vec(&String::from_utf8(bytes).unwrap()).unwrap();
        assert_eq!(Envelope::decode(&quoted).unwrap(), envelope);
    }

    #[test]
    fn test_decode_tolerates_missing_optional_fields() {
        let raw = br#"{"subType":"HOST_HEARTBEAT","senderId":"peer-9"}"#;
        let envelope = Envelope::decode(raw).unwrap();

        assert_eq!(envelope.session_id, None);
        assert_eq!(envelope.timestamp, 0);
        assert_eq!(envelope.message().unwrap(), Message::HostHeartbeat);
    }

    #[test]
    fn test_decode_missing_sub_type() {
        let raw = br#"{"senderId":"peer-9","payload":{}}"#;
        assert!(matches!(Envelope::decode(raw), Err(DecodeError::MissingSubType)));
    }

    #[test]
    fn test_decode_unknown_sub_type() {
        let raw = br#"{"subType":"CHAT","senderId":"peer-9"}"#;
        match Envelope::decode(raw) {
            Err(DecodeError::UnknownSubType(name)) => assert_eq!(name, "CHAT"),
            other => panic!("expected UnknownSubType, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_missing_sender() {
        let raw = br#"{"subType":"HOST_HEARTBEAT"}"#;
        assert!(matches!(Envelope::decode(raw), Err(DecodeError::InvalidEnvelope(_))));
    }

    #[test]
    fn test_invalid_payload_reports_kind() {
        let raw = br#"{"subType":"HOST_ASSIGNMENT","senderId":"peer-9","payload":{"nope":1}}"#;
        let envelope = Envelope::decode(raw).unwrap();
        match envelope.message() {
            Err(DecodeError::InvalidPayload { kind, .. }) => {
                assert_eq!(kind, MessageKind::HostAssignment)
            }
            other => panic!("expected InvalidPayload, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_garbage() {
        assert!(Envelope::decode(b"").is_err());
        assert!(Envelope::decode(&[0xFF, 0xFE]).is_err());
        assert!(Envelope::decode(b"not json").is_err());
    }
}
