//! Session identity and the best-effort store that persists it.
//!
//! A session is one logical game instance. The session id is kept in a local
//! key/value store so a peer that reconnects lands back in the same session.
//! Storage is strictly best-effort: when it fails we log and carry on with a
//! fresh id, which only means resumption is not possible.
//!
//! Implementations of [`SessionStore`]:
//! - `MemoryStore` - For testing and ephemeral peers
//! - `FileStore` (in hostsync-daemon) - JSON file on disk

use crate::PeerId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Key under which the session id is persisted.
pub const SESSION_ID_KEY: &str = "sessionId";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Corrupt store: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Best-effort local key/value storage.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Read a value, `None` if the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value. Deleting a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory store for testing
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.remove(key);
        Ok(())
    }
}

/// Session context shared by every component of a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    session_id: String,
    local_peer_id: PeerId,
}

impl Session {
    /// Build a session without touching any store.
    pub fn new(session_id: impl Into<String>, local_peer_id: PeerId) -> Self {
        Self {
            session_id: session_id.into(),
            local_peer_id,
        }
    }

    /// Open the session for this peer.
    ///
    /// Resolution order:
    /// 1. `requested` (e.g. an invite code), which is then persisted
    /// 2. The id persisted by a previous run
    /// 3. A freshly generated UUID, which is then persisted
    ///
    /// Store failures never surface as errors.
    pub async fn open<S: SessionStore + ?Sized>(
        store: &S,
        local_peer_id: PeerId,
        requested: Option<String>,
    ) -> Self {
        let session_id = match requested.filter(|id| !id.is_empty()) {
            Some(id) => {
                persist(store, &id).await;
                id
            }
            None => match store.get(SESSION_ID_KEY).await {
                Ok(Some(id)) if !id.is_empty() => {
                    info!("Resuming session {}", id);
                    id
                }
                Ok(_) => {
                    let id = uuid::Uuid::new_v4().to_string();
                    info!("Created session {}", id);
                    persist(store, &id).await;
                    id
                }
                Err(e) => {
                    let id = uuid::Uuid::new_v4().to_string();
                    warn!("Session store unavailable ({}), using fresh session {}", e, id);
                    id
                }
            },
        };

        Self {
            session_id,
            local_peer_id,
        }
    }

    /// Drop the persisted session id so the next run starts fresh.
    pub async fn forget<S: SessionStore + ?Sized>(&self, store: &S) {
        if let Err(e) = store.remove(SESSION_ID_KEY).await {
            warn!("Failed to clear persisted session {}: {}", self.session_id, e);
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn local_peer_id(&self) -> &PeerId {
        &self.local_peer_id
    }

    /// Whether an envelope tagged with `session_id` belongs to us.
    ///
    /// Untagged envelopes are accepted.
    pub fn accepts(&self, session_id: Option<&str>) -> bool {
        session_id.is_none_or(|id| id == self.session_id)
    }
}

async fn persist<S: SessionStore + ?Sized>(store: &S, session_id: &str) {
    match store.set(SESSION_ID_KEY, session_id).await {
        Ok(()) => debug!("Persisted session id {}", session_id),
        Err(e) => warn!("Failed to persist session id: {}", e),
    }
}
