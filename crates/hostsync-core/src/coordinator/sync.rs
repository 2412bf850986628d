//! State replication, input routing and membership.

use super::{Coordinator, Role};
use crate::PeerId;
use crate::events::SessionEvent;
use crate::protocol::{InputPayload, Message, StatePayload};
use crate::transport::Transport;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

impl<T: Transport> Coordinator<T> {
    /// Broadcast a snapshot (host only).
    ///
    /// The snapshot is applied to the canonical state first, so a delta is
    /// merged into it. Returns false when not hosting.
    pub fn publish(&mut self, state: Value, is_delta: bool, now_ms: u64) -> bool {
        if self.state.role != Role::Host {
            trace!("Not publishing while {:?}", self.state.role);
            return false;
        }
        self.replica.apply(state.clone(), is_delta);
        self.send(&Message::state(state, is_delta), now_ms);
        true
    }

    /// Publish the current simulation state if a slot is open.
    ///
    /// Picks full or delta per the publish schedule. Returns true if
    /// something was sent.
    pub fn publish_tick(&mut self, state: Value, now_ms: u64) -> bool {
        if self.state.role != Role::Host {
            return false;
        }
        match self.schedule.plan(&state, now_ms) {
            Some(planned) => self.publish(planned.state, planned.is_delta, now_ms),
            None => false,
        }
    }

    /// Handle GAME_STATE_UPDATE from `sender`.
    ///
    /// Any snapshot identifies its sender as a live host. A host receiving
    /// one from a higher-ranked peer steps down; from a lower-ranked peer it
    /// keeps authority and reasserts.
    pub fn on_state_update(&mut self, payload: StatePayload, sender: PeerId, now_ms: u64) {
        if &sender == self.local_peer_id() {
            trace!("Ignoring our own state update");
            return;
        }

        if self.state.role == Role::Host {
            if &sender > self.local_peer_id() {
                warn!("Split brain: {} outranks us, stepping down", sender);
                self.follow(sender.clone(), now_ms);
            } else {
                warn!("Split brain: ignoring state from {}, reasserting", sender);
                self.reassert_host(now_ms);
                return;
            }
        }

        self.state.last_state_observed_at = Some(now_ms);
        if self.state.host_id.as_ref() != Some(&sender) {
            info!("Discovered host {} from state update", sender);
            self.follow(sender.clone(), now_ms);
        } else if self.state.role != Role::Follower {
            self.timers.election_deadline = None;
            self.set_role(Role::Follower);
        }

        self.replica.apply(payload.state, payload.is_delta);
        self.events.emit(SessionEvent::StateUpdated {
            is_delta: payload.is_delta,
        });
        self.mark_connected(sender);
    }

    /// Route input to the host's simulation.
    ///
    /// On the host the input is delivered locally; on a follower it is sent
    /// as a directed PLAYER_INPUT. Returns false when no host is known.
    pub fn send_input(&mut self, input: Value, now_ms: u64) -> bool {
        if self.state.role == Role::Host {
            let from = self.local_peer_id().clone();
            self.events.emit(SessionEvent::InputReceived { from, input });
            return true;
        }
        match self.state.host_id.clone() {
            Some(host) => {
                self.send_to(&Message::input(input), host, now_ms);
                true
            }
            None => {
                debug!("No host known, dropping input");
                false
            }
        }
    }

    /// Handle PLAYER_INPUT. Only the host consumes input.
    pub fn on_input(&mut self, payload: InputPayload, sender: PeerId) {
        if self.state.role != Role::Host {
            debug!("Dropping input from {}: not hosting", sender);
            return;
        }
        self.events.emit(SessionEvent::InputReceived {
            from: sender,
            input: payload.input,
        });
    }

    /// Handle PLAYER_JOIN.
    ///
    /// The host answers every join with a directed full snapshot so the
    /// newcomer catches up without waiting for the next keyframe.
    pub fn on_join(&mut self, peer_id: PeerId, now_ms: u64) {
        if self.membership.join(peer_id.clone(), now_ms) {
            debug!("Peer {} joined", peer_id);
            self.events.emit(SessionEvent::PlayerJoined {
                peer_id: peer_id.clone(),
            });
        }

        if self.state.role == Role::Host && &peer_id != self.local_peer_id() {
            self.send_catch_up(peer_id, now_ms);
        }
    }

    /// Handle PLAYER_LEAVE. Host failover is left to the liveness check.
    pub fn on_leave(&mut self, peer_id: &PeerId) {
        if let Some(record) = self.membership.leave(peer_id) {
            debug!("Peer {} left", record.id);
            self.events.emit(SessionEvent::PlayerLeft { peer_id: record.id });
        }
    }

    fn send_catch_up(&self, peer_id: PeerId, now_ms: u64) {
        match self.replica.state() {
            Some(state) => {
                debug!("Sending catch-up snapshot to {}", peer_id);
                self.send_to(&Message::state(state.clone(), false), peer_id, now_ms);
            }
            None => debug!("No state yet, nothing to send {}", peer_id),
        }
    }
}
