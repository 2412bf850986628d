//! Boundary with the domain simulation.
//!
//! Only the host runs a simulation. Followers never step it; they render the
//! replicated state. When a follower is promoted it seeds its simulation from
//! the last state it replicated via [`Simulation::restore`].

use crate::PeerId;
use serde_json::Value;
use std::time::Duration;

pub trait Simulation {
    /// Advance the simulation by `dt`.
    fn step(&mut self, dt: Duration);

    /// Apply one peer's input. Called on the host only.
    fn apply_input(&mut self, from: &PeerId, input: &Value);

    /// Current state, copied for publishing.
    fn snapshot(&self) -> Value;

    /// Replace the simulation state with a replicated snapshot.
    fn restore(&mut self, state: &Value);
}
