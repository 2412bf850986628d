//! Membership tracking for a session.
//!
//! Records are created by PLAYER_JOIN and removed by PLAYER_LEAVE. Nothing in
//! the protocol depends on them beyond the host's newcomer catch-up; they
//! exist for display and telemetry.

use crate::PeerId;
use serde::Serialize;
use std::collections::HashMap;

/// A known peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    pub id: PeerId,
    /// Last time any accepted envelope came from this peer (ms since epoch)
    pub last_seen_at: u64,
}

/// Membership map keyed by peer id.
#[derive(Debug, Default)]
pub struct Membership {
    peers: HashMap<PeerId, PeerRecord>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a peer.
    ///
    /// Returns true if the peer was not known before.
    pub fn join(&mut self, peer_id: PeerId, now_ms: u64) -> bool {
        match self.peers.get_mut(&peer_id) {
            Some(record) => {
                record.last_seen_at = record.last_seen_at.max(now_ms);
                false
            }
            None => {
                self.peers.insert(
                    peer_id.clone(),
                    PeerRecord {
                        id: peer_id,
                        last_seen_at: now_ms,
                    },
                );
                true
            }
        }
    }

    /// Remove a peer. Returns the removed record, if any.
    pub fn leave(&mut self, peer_id: &PeerId) -> Option<PeerRecord> {
        self.peers.remove(peer_id)
    }

    /// Refresh `last_seen_at` for a known peer. Unknown peers are not added.
    pub fn touch(&mut self, peer_id: &PeerId, now_ms: u64) {
        if let Some(record) = self.peers.get_mut(peer_id) {
            record.last_seen_at = record.last_seen_at.max(now_ms);
        }
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerRecord> {
        self.peers.get(peer_id)
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Known peers sorted by id.
    pub fn peers(&self) -> Vec<&PeerRecord> {
        let mut peers: Vec<_> = self.peers.values().collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }
}
