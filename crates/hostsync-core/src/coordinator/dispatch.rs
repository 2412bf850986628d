//! Inbound envelope handling.

use super::Coordinator;
use crate::protocol::{Envelope, Message};
use crate::transport::Transport;
use serde_json::Value;
use tracing::{debug, trace};

impl<T: Transport> Coordinator<T> {
    /// Process a raw payload from the transport.
    ///
    /// Malformed payloads are logged and dropped; they never fail the peer.
    pub fn handle_payload(&mut self, data: &[u8], now_ms: u64) {
        if self.disposed {
            return;
        }
        match Envelope::decode(data) {
            Ok(envelope) => self.handle_envelope(envelope, now_ms),
            Err(e) => debug!("Dropping malformed payload: {}", e),
        }
    }

    /// Process an already-parsed payload (structured transports).
    pub fn handle_value(&mut self, value: Value, now_ms: u64) {
        if self.disposed {
            return;
        }
        match Envelope::from_value(value) {
            Ok(envelope) => self.handle_envelope(envelope, now_ms),
            Err(e) => debug!("Dropping malformed payload: {}", e),
        }
    }

    /// Filter an envelope and route it to its handler.
    pub fn handle_envelope(&mut self, envelope: Envelope, now_ms: u64) {
        if self.disposed {
            return;
        }
        if !self.session.accepts(envelope.session_id.as_deref()) {
            trace!(
                "Dropping {} for foreign session {:?}",
                envelope.sub_type, envelope.session_id
            );
            return;
        }
        if !envelope.is_for(self.session.local_peer_id()) {
            trace!("Dropping {} directed elsewhere", envelope.sub_type);
            return;
        }

        let message = match envelope.message() {
            Ok(message) => message,
            Err(e) => {
                debug!("Dropping envelope from {}: {}", envelope.sender_id, e);
                return;
            }
        };
        let sender = envelope.sender_id;
        self.membership.touch(&sender, now_ms);

        match message {
            Message::HostElection(payload) => self.on_election_message(payload.candidate_id, now_ms),
            Message::HostHeartbeat => self.on_heartbeat(&sender, now_ms),
            Message::HostAssignment(payload) => self.on_host_assignment(payload.host_id, now_ms),
            Message::PlayerJoin(payload) => self.on_join(payload.peer_id.unwrap_or(sender), now_ms),
            Message::PlayerLeave(payload) => self.on_leave(&payload.peer_id.unwrap_or(sender)),
            Message::GameStateUpdate(payload) => self.on_state_update(payload, sender, now_ms),
            Message::PlayerInput(payload) => self.on_input(payload, sender),
        }
    }
}
