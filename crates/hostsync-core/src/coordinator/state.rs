//! Authority record kept by every peer.

use crate::PeerId;
use serde::Serialize;

/// Local role in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    /// Consuming state published by the host
    Follower,
    /// Authoritative for the simulation state
    Host,
    /// No living host known; an election is running or about to
    Electing,
}

/// The single mutable authority record of a peer.
///
/// `role == Host` holds exactly when `host_id` is the local peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorState {
    pub role: Role,
    pub host_id: Option<PeerId>,
    /// Last accepted heartbeat (or host adoption), ms since epoch
    pub last_heartbeat_at: u64,
    /// Last snapshot received from another peer, ms since epoch
    pub last_state_observed_at: Option<u64>,
}

impl Default for CoordinatorState {
    fn default() -> Self {
        Self {
            role: Role::Electing,
            host_id: None,
            last_heartbeat_at: 0,
            last_state_observed_at: None,
        }
    }
}

/// Pending timer deadlines, ms since epoch.
#[derive(Debug, Clone, Default)]
pub(crate) struct Timers {
    /// One-shot: finalize the running election
    pub election_deadline: Option<u64>,
    /// Recurring while host: emit a heartbeat
    pub next_heartbeat_at: Option<u64>,
    /// Recurring: check host liveness (no-op while host)
    pub next_liveness_at: Option<u64>,
}

impl Timers {
    pub fn next_deadline(&self) -> Option<u64> {
        [
            self.election_deadline,
            self.next_heartbeat_at,
            self.next_liveness_at,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
