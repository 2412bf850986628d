//! Session notifications and the bus that delivers them.
//!
//! Collaborators (renderer, simulation driver, telemetry) subscribe to the
//! coordinator's `EventBus` instead of registering ad-hoc callbacks on it.

use crate::PeerId;
use crate::coordinator::Role;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Notifications emitted by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// The believed host changed (None while electing).
    HostChanged {
        #[serde(rename = "hostId")]
        host_id: Option<PeerId>,
        /// Whether the new host is this peer.
        #[serde(rename = "isLocal")]
        is_local: bool,
    },
    /// Local role transition.
    RoleChanged { from: Role, to: Role },
    /// First authoritative state seen (or we became host) since start.
    Connected {
        #[serde(rename = "hostId")]
        host_id: PeerId,
    },
    /// A peer record was created.
    PlayerJoined {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },
    /// A peer record was removed.
    PlayerLeft {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },
    /// The local copy of the state changed.
    StateUpdated {
        #[serde(rename = "isDelta")]
        is_delta: bool,
    },
    /// Input for the host's simulation.
    InputReceived { from: PeerId, input: Value },
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Event bus for publishing session events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    /// Subscribe to a subset of events.
    pub fn subscribe_filtered(
        self: &Arc<Self>,
        filter: impl Fn(&SessionEvent) -> bool + Send + Sync + 'static,
        callback: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(move |event| {
            if filter(event) {
                callback(event);
            }
        })
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run while emit holds the read lock
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: SessionEvent) {
        // Clone the callback list so callbacks may subscribe without deadlocking.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(&event);
        }
    }
}
