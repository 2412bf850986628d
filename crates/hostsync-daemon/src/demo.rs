//! A small arena game used to exercise replication end to end.
//!
//! Each player is a point on a bounded grid. Inputs are JSON objects
//! `{"dx": i64, "dy": i64}` moving the sender; the first input from a peer
//! spawns it at the center. State shape:
//! `{"tick": u64, "players": {"<peerId>": {"x": i64, "y": i64}}}`

use hostsync_core::{PeerId, Simulation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Half-width of the square arena.
pub const ARENA_RADIUS: i64 = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i64,
    pub y: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaState {
    pub tick: u64,
    pub players: BTreeMap<String, Position>,
}

#[derive(Debug, Deserialize)]
struct MoveInput {
    #[serde(default)]
    dx: i64,
    #[serde(default)]
    dy: i64,
}

#[derive(Debug, Default)]
pub struct Arena {
    state: ArenaState,
    elapsed: Duration,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ArenaState {
        &self.state
    }

    /// Simulated time since the arena started or was restored.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

impl Simulation for Arena {
    fn step(&mut self, dt: Duration) {
        self.state.tick += 1;
        self.elapsed += dt;
    }

    fn apply_input(&mut self, from: &PeerId, input: &Value) {
        let movement: MoveInput = match serde_json::from_value(input.clone()) {
            Ok(movement) => movement,
            Err(e) => {
                debug!("Ignoring input from {}: {}", from, e);
                return;
            }
        };
        let position = self.state.players.entry(from.to_string()).or_default();
        position.x = position.x.saturating_add(movement.dx).clamp(-ARENA_RADIUS, ARENA_RADIUS);
        position.y = position.y.saturating_add(movement.dy).clamp(-ARENA_RADIUS, ARENA_RADIUS);
    }

    fn snapshot(&self) -> Value {
        serde_json::to_value(&self.state).unwrap_or(Value::Null)
    }

    fn restore(&mut self, state: &Value) {
        match serde_json::from_value(state.clone()) {
            Ok(restored) => {
                self.state = restored;
                self.elapsed = Duration::ZERO;
            }
            Err(e) => warn!("Cannot restore arena from replicated state: {}", e),
        }
    }
}
