//! Transport trait for the group broadcast channel.
//!
//! The channel is best-effort: unordered, at-most-once, no acknowledgements.
//! Inbound delivery is not part of the trait; whoever owns the transport feeds
//! received payloads to `Coordinator::handle_payload`.
//!
//! Implementations:
//! - `MemoryTransport` - In-process network for tests and simulations
//! - `RelayLink` (in hostsync-daemon) - WebSocket fan-out relay

use crate::PeerId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Channel closed")]
    Closed,

    #[error("Payload too large: {0} bytes")]
    TooLarge(usize),

    #[error("Send failed: {0}")]
    SendFailed(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Outbound half of the broadcast channel.
///
/// `broadcast` must not block: it hands the payload off and returns.
pub trait Transport {
    /// Identity of this process on the channel, stable for its lifetime.
    fn local_identity(&self) -> &PeerId;

    /// Send to every current member of the session (possibly including us).
    fn broadcast(&self, payload: &[u8]) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn local_identity(&self) -> &PeerId {
        (**self).local_identity()
    }

    fn broadcast(&self, payload: &[u8]) -> Result<()> {
        (**self).broadcast(payload)
    }
}

#[derive(Default)]
struct NetworkInner {
    inboxes: HashMap<PeerId, VecDeque<Vec<u8>>>,
    /// Peers whose outbound traffic is silently dropped
    muted: HashSet<PeerId>,
    /// Deliver broadcasts back to their sender
    self_delivery: bool,
}

/// In-process broadcast network.
///
/// Every joined peer gets an inbox. Broadcasts are queued into every inbox
/// (including the sender's, unless self-delivery is turned off) and stay
/// there until drained, so tests control exactly when delivery happens.
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(NetworkInner {
                self_delivery: true,
                ..Default::default()
            })),
        }
    }

    /// Disable delivery of a peer's broadcasts to itself.
    pub fn without_self_delivery(self) -> Self {
        self.lock().self_delivery = false;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NetworkInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a peer to the network and return its transport.
    pub fn join(&self, peer_id: PeerId) -> MemoryTransport {
        self.lock().inboxes.entry(peer_id.clone()).or_default();
        MemoryTransport {
            peer_id,
            network: self.clone(),
        }
    }

    /// Remove a peer; queued payloads are discarded.
    pub fn leave(&self, peer_id: &PeerId) {
        self.lock().inboxes.remove(peer_id);
    }

    /// Drop everything a peer sends from now on (crash / partition).
    pub fn set_muted(&self, peer_id: &PeerId, muted: bool) {
        let mut inner = self.lock();
        if muted {
            inner.muted.insert(peer_id.clone());
        } else {
            inner.muted.remove(peer_id);
        }
    }

    /// Take all payloads queued for a peer, oldest first.
    pub fn drain(&self, peer_id: &PeerId) -> Vec<Vec<u8>> {
        self.lock()
            .inboxes
            .get_mut(peer_id)
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default()
    }

    /// Number of payloads waiting across all inboxes.
    pub fn in_flight(&self) -> usize {
        self.lock().inboxes.values().map(VecDeque::len).sum()
    }

    fn deliver(&self, from: &PeerId, payload: &[u8]) {
        let mut inner = self.lock();
        if inner.muted.contains(from) {
            return;
        }
        let self_delivery = inner.self_delivery;
        for (peer_id, inbox) in inner.inboxes.iter_mut() {
            if peer_id == from && !self_delivery {
                continue;
            }
            inbox.push_back(payload.to_vec());
        }
    }
}

/// A peer's handle on a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    peer_id: PeerId,
    network: MemoryNetwork,
}

impl MemoryTransport {
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

impl Transport for MemoryTransport {
    fn local_identity(&self) -> &PeerId {
        &self.peer_id
    }

    fn broadcast(&self, payload: &[u8]) -> Result<()> {
        self.network.deliver(&self.peer_id, payload);
        Ok(())
    }
}
