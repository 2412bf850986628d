//! Host coordination for a session.
//!
//! The coordinator owns the authority record of one peer: who the host is,
//! which role we play, and the local copy of the replicated state. It is
//! sans-IO: every entry point takes the current time in ms, outbound traffic
//! goes through a [`Transport`], and inbound payloads are fed in by the owner
//! via [`Coordinator::handle_payload`]. Timers are plain deadlines; the owner
//! calls [`Coordinator::tick`] no later than [`Coordinator::next_deadline`].
//!
//! Handlers are split by concern:
//! - `election` - host election, heartbeats, liveness, assignment
//! - `sync` - state publishing, replication, input routing, membership
//! - `dispatch` - envelope decoding, filtering and routing

mod config;
mod dispatch;
mod election;
mod state;
mod sync;

pub use config::CoordinatorConfig;
pub use state::{CoordinatorState, Role};

use crate::events::{EventBus, SessionEvent};
use crate::membership::Membership;
use crate::protocol::{Envelope, Message};
use crate::replication::{PublishSchedule, Replica};
use crate::transport::Transport;
use crate::{PeerId, Session};
use config::ms;
use serde_json::Value;
use state::Timers;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Per-peer protocol engine.
pub struct Coordinator<T: Transport> {
    session: Session,
    transport: T,
    config: CoordinatorConfig,
    state: CoordinatorState,
    timers: Timers,
    membership: Membership,
    replica: Replica,
    schedule: PublishSchedule,
    events: Arc<EventBus>,
    /// Last time we re-broadcast HOST_ASSIGNMENT to correct a stray peer
    last_reassert_at: Option<u64>,
    connected: bool,
    started: bool,
    disposed: bool,
}

impl<T: Transport> Coordinator<T> {
    pub fn new(session: Session, transport: T, config: CoordinatorConfig) -> Self {
        if transport.local_identity() != session.local_peer_id() {
            warn!(
                "Transport identity {} differs from session peer {}",
                transport.local_identity(),
                session.local_peer_id()
            );
        }
        let schedule = PublishSchedule::new(config.publish_interval, config.keyframe_every);
        Self {
            session,
            transport,
            config,
            state: CoordinatorState::default(),
            timers: Timers::default(),
            membership: Membership::new(),
            replica: Replica::new(),
            schedule,
            events: Arc::new(EventBus::new()),
            last_reassert_at: None,
            connected: false,
            started: false,
            disposed: false,
        }
    }

    /// Event bus for host, role, membership, state and input notifications.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn local_peer_id(&self) -> &PeerId {
        self.session.local_peer_id()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn state(&self) -> &CoordinatorState {
        &self.state
    }

    pub fn role(&self) -> Role {
        self.state.role
    }

    pub fn host_id(&self) -> Option<&PeerId> {
        self.state.host_id.as_ref()
    }

    pub fn is_host(&self) -> bool {
        self.state.role == Role::Host
    }

    /// Whether authoritative state has been seen (or we are the host).
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    /// Local copy of the replicated state: canonical on the host, last
    /// applied snapshot on followers.
    pub fn latest_state(&self) -> Option<&Value> {
        self.replica.state()
    }

    /// Join the session.
    ///
    /// Announces us with PLAYER_JOIN, arms the liveness check and starts an
    /// election unless a host is already known. Calling it twice is a no-op.
    pub fn start(&mut self, now_ms: u64) {
        if self.started || self.disposed {
            return;
        }
        self.started = true;
        info!(
            "Starting peer {} in session {}",
            self.local_peer_id(),
            self.session.session_id()
        );

        let local = self.local_peer_id().clone();
        if self.membership.join(local.clone(), now_ms) {
            self.events.emit(SessionEvent::PlayerJoined {
                peer_id: local.clone(),
            });
        }
        self.send(&Message::join(local), now_ms);
        self.timers.next_liveness_at = Some(now_ms + ms(self.config.liveness_check_interval));

        if self.state.host_id.is_some() {
            debug!("Host already known, skipping initial election");
            self.set_role(Role::Follower);
        } else {
            self.start_election(now_ms);
        }
    }

    /// Fire every timer due at `now_ms`.
    ///
    /// Order: election finalization, heartbeat, liveness check.
    pub fn tick(&mut self, now_ms: u64) {
        if self.disposed {
            return;
        }

        if self
            .timers
            .election_deadline
            .is_some_and(|deadline| now_ms >= deadline)
        {
            self.finalize_election(now_ms);
        }

        if self.timers.next_heartbeat_at.is_some_and(|at| now_ms >= at) {
            self.timers.next_heartbeat_at = Some(now_ms + ms(self.config.heartbeat_interval));
            self.send(&Message::HostHeartbeat, now_ms);
        }

        if self.timers.next_liveness_at.is_some_and(|at| now_ms >= at) {
            self.timers.next_liveness_at =
                Some(now_ms + ms(self.config.liveness_check_interval));
            self.check_liveness(now_ms);
        }
    }

    /// Earliest pending timer deadline, `None` when nothing is armed.
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    /// Leave the session: announce PLAYER_LEAVE and cancel all timers.
    ///
    /// Further inbound payloads and ticks are ignored.
    pub fn dispose(&mut self, now_ms: u64) {
        if self.disposed {
            return;
        }
        if self.started {
            let local = self.local_peer_id().clone();
            self.send(&Message::leave(local), now_ms);
        }
        self.timers.clear();
        self.disposed = true;
        info!("Peer {} left session {}", self.local_peer_id(), self.session.session_id());
    }

    fn set_role(&mut self, role: Role) {
        let from = self.state.role;
        if from == role {
            return;
        }
        info!("Role {:?} -> {:?}", from, role);
        self.state.role = role;
        self.events.emit(SessionEvent::RoleChanged { from, to: role });
    }

    /// Record a new believed host. Returns true if it changed.
    fn set_host(&mut self, host_id: Option<PeerId>) -> bool {
        if self.state.host_id == host_id {
            return false;
        }
        let is_local = host_id.as_ref() == Some(self.session.local_peer_id());
        self.state.host_id = host_id.clone();
        self.events.emit(SessionEvent::HostChanged { host_id, is_local });
        true
    }

    /// Adopt a remote peer as host and settle into the follower role.
    fn follow(&mut self, host_id: PeerId, now_ms: u64) {
        self.timers.election_deadline = None;
        self.timers.next_heartbeat_at = None;
        self.state.last_heartbeat_at = now_ms;
        self.set_host(Some(host_id));
        self.set_role(Role::Follower);
    }

    fn mark_connected(&mut self, host_id: PeerId) {
        if self.connected {
            return;
        }
        self.connected = true;
        info!("Connected to session {} (host {})", self.session.session_id(), host_id);
        self.events.emit(SessionEvent::Connected { host_id });
    }

    /// A snapshot from another peer arrived within the guard window.
    fn state_is_flowing(&self, now_ms: u64) -> bool {
        let window = ms(self.config.state_guard_window);
        self.state
            .last_state_observed_at
            .is_some_and(|at| now_ms.saturating_sub(at) < window)
    }

    fn send(&self, message: &Message, now_ms: u64) {
        match Envelope::new(&self.session, now_ms, message) {
            Ok(envelope) => self.broadcast(&envelope),
            Err(e) => error!("Failed to encode {}: {}", message.kind(), e),
        }
    }

    fn send_to(&self, message: &Message, target: PeerId, now_ms: u64) {
        match Envelope::directed(&self.session, now_ms, message, target) {
            Ok(envelope) => self.broadcast(&envelope),
            Err(e) => error!("Failed to encode {}: {}", message.kind(), e),
        }
    }

    fn broadcast(&self, envelope: &Envelope) {
        let bytes = match envelope.to_json() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to serialize {}: {}", envelope.sub_type, e);
                return;
            }
        };
        if let Err(e) = self.transport.broadcast(&bytes) {
            warn!("Failed to broadcast {}: {}", envelope.sub_type, e);
        }
    }
}

impl<T: Transport> std::fmt::Debug for Coordinator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("session", &self.session)
            .field("state", &self.state)
            .field("peers", &self.membership.len())
            .field("connected", &self.connected)
            .finish()
    }
}
