//! hostsync-daemon library: Exposes internal modules for testing.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to access internal types.

pub mod connection;
pub mod demo;
pub mod link;
pub mod message;
pub mod peer;
pub mod relay;
pub mod store;

// Re-export key types for convenience
pub use connection::{ConnectionEvent, IncomingFrame, PeerConnection};
pub use demo::Arena;
pub use link::{LinkEvent, ReconnectConfig, RelayLink};
pub use message::{HandshakeMessage, MAX_MESSAGE_SIZE};
pub use peer::{PeerOptions, PeerRuntime};
pub use relay::{Relay, RelayEvent};
pub use store::FileStore;
