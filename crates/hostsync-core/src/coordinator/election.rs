//! Host election, heartbeats and failure detection.
//!
//! The surviving host is the lexicographically greatest candidate heard
//! during the settlement window. Any snapshot observed within the guard
//! window means a host is alive, which suppresses elections entirely; this is
//! what keeps a newcomer from challenging a running game.

use super::config::ms;
use super::{Coordinator, Role};
use crate::PeerId;
use crate::protocol::Message;
use crate::transport::Transport;
use tracing::{debug, info, trace, warn};

impl<T: Transport> Coordinator<T> {
    /// Announce our candidacy and arm the settlement timer.
    ///
    /// No-op while hosting or while state is flowing.
    pub fn start_election(&mut self, now_ms: u64) {
        if self.disposed || self.state.role == Role::Host {
            return;
        }
        if self.state_is_flowing(now_ms) {
            debug!("State is flowing, not starting an election");
            return;
        }

        let local = self.local_peer_id().clone();
        info!("Starting election as {}", local);
        self.set_role(Role::Electing);

        self.send(&Message::election(local, now_ms), now_ms);
        self.timers.election_deadline = Some(now_ms + ms(self.config.election_settle));
    }

    /// Handle a HOST_ELECTION candidacy.
    pub fn on_election_message(&mut self, candidate_id: PeerId, now_ms: u64) {
        if self.state.role == Role::Host {
            if &candidate_id != self.local_peer_id() {
                debug!("Election from {} while hosting, reasserting", candidate_id);
                self.reassert_host(now_ms);
            }
            return;
        }
        if self.state_is_flowing(now_ms) {
            trace!("Ignoring election from {}: state is flowing", candidate_id);
            return;
        }

        let outranks_local = &candidate_id > self.local_peer_id();
        let outranks_host = self
            .state
            .host_id
            .as_ref()
            .is_none_or(|host| &candidate_id > host);
        if outranks_local && outranks_host {
            debug!("Recording {} as provisional host", candidate_id);
            self.state.last_heartbeat_at = now_ms;
            self.set_host(Some(candidate_id));
        }
    }

    /// Settle the running election.
    ///
    /// Promotes us if nobody outranked us; otherwise we follow whoever did.
    pub fn finalize_election(&mut self, now_ms: u64) {
        self.timers.election_deadline = None;
        if self.disposed || self.state.role == Role::Host {
            return;
        }

        if self.state_is_flowing(now_ms) {
            debug!("State arrived during election, not promoting");
            if self.state.host_id.is_some() {
                self.set_role(Role::Follower);
            }
            return;
        }

        match self.state.host_id.clone() {
            Some(host) if &host != self.local_peer_id() => {
                info!("Election settled on {}", host);
                self.set_role(Role::Follower);
            }
            _ => self.promote_to_host(now_ms),
        }
    }

    /// Become host: broadcast HOST_ASSIGNMENT and start heartbeating.
    ///
    /// The replica becomes the canonical state. No-op if already host.
    pub fn promote_to_host(&mut self, now_ms: u64) {
        if self.disposed || self.state.role == Role::Host {
            return;
        }

        let local = self.local_peer_id().clone();
        info!("Promoted to host of session {}", self.session.session_id());
        self.timers.election_deadline = None;
        self.set_host(Some(local.clone()));
        self.set_role(Role::Host);

        self.send(&Message::assignment(local.clone()), now_ms);
        self.timers.next_heartbeat_at = Some(now_ms + ms(self.config.heartbeat_interval));
        self.last_reassert_at = Some(now_ms);
        self.schedule.reset();
        self.mark_connected(local);
    }

    /// Handle HOST_HEARTBEAT. Only the believed host refreshes liveness.
    pub fn on_heartbeat(&mut self, sender: &PeerId, now_ms: u64) {
        if self.state.host_id.as_ref() != Some(sender) {
            trace!("Ignoring heartbeat from non-host {}", sender);
            return;
        }
        self.state.last_heartbeat_at = self.state.last_heartbeat_at.max(now_ms);
    }

    /// Periodic check that the host is still alive.
    ///
    /// A host silent for longer than the timeout is dropped and an election
    /// started. With no host and no election pending, retries the election.
    pub fn check_liveness(&mut self, now_ms: u64) {
        if self.disposed || self.state.role == Role::Host {
            return;
        }

        match self.state.host_id.clone() {
            Some(host) => {
                let silence = now_ms.saturating_sub(self.state.last_heartbeat_at);
                if silence > ms(self.config.host_timeout) {
                    warn!("Host {} silent for {}ms, starting election", host, silence);
                    // The dead host's last snapshot must not suppress failover
                    self.state.last_state_observed_at = None;
                    self.set_host(None);
                    self.set_role(Role::Electing);
                    self.start_election(now_ms);
                }
            }
            None if self.timers.election_deadline.is_none() => {
                debug!("No host known, retrying election");
                self.start_election(now_ms);
            }
            None => {}
        }
    }

    /// Handle HOST_ASSIGNMENT. Last writer wins.
    pub fn on_host_assignment(&mut self, host_id: PeerId, now_ms: u64) {
        if &host_id == self.local_peer_id() {
            if self.state.role != Role::Host {
                self.promote_to_host(now_ms);
            }
            return;
        }

        if self.state.host_id.as_ref() != Some(&host_id) {
            info!("Adopting host {} from assignment", host_id);
        }
        self.follow(host_id, now_ms);
    }

    /// Re-broadcast HOST_ASSIGNMENT, at most once per heartbeat interval.
    pub(super) fn reassert_host(&mut self, now_ms: u64) {
        let interval = ms(self.config.heartbeat_interval);
        if self
            .last_reassert_at
            .is_some_and(|at| now_ms.saturating_sub(at) < interval)
        {
            return;
        }
        self.last_reassert_at = Some(now_ms);
        let local = self.local_peer_id().clone();
        self.send(&Message::assignment(local), now_ms);
    }
}
