//! hostsync-core: Host-authoritative state replication for peer sessions.
//!
//! This crate provides the core functionality for:
//! - Electing a single host among peers sharing a broadcast channel
//! - Detecting host failure and failing over
//! - Replicating host-owned state to followers as full snapshots and deltas
//! - Routing player input to the host
//! - Session identity, envelope framing and the Transport abstraction

pub mod coordinator;
pub mod events;
pub mod membership;
pub mod peer_id;
pub mod protocol;
pub mod replication;
pub mod session;
pub mod simulation;
pub mod time;
pub mod transport;

pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorState, Role};
pub use events::{EventBus, SessionEvent, Subscription};
pub use membership::{Membership, PeerRecord};
pub use peer_id::{PeerId, PeerIdError};
pub use protocol::{Envelope, Message, MessageKind};
pub use replication::{PublishSchedule, Replica};
pub use session::{MemoryStore, Session, SessionStore, StoreError};
pub use simulation::Simulation;
pub use time::now_ms;
pub use transport::{MemoryNetwork, MemoryTransport, Transport, TransportError};
