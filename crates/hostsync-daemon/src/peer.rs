//! Peer runtime: drives a coordinator and a simulation over a relay link.
//!
//! One task owns everything and multiplexes with `tokio::select!`:
//! - frames from the relay
//! - the coordinator's next timer deadline
//! - the simulation tick (host only steps and publishes)
//! - local input
//! - shutdown
//!
//! When this peer is promoted, the simulation resumes from the last state it
//! replicated, so a failover continues the game instead of restarting it.

use crate::link::{LinkEvent, ReconnectConfig, RelayLink};
use crate::store::FileStore;
use anyhow::Result;
use hostsync_core::{
    Coordinator, CoordinatorConfig, EventBus, MemoryStore, PeerId, Session, SessionEvent,
    Simulation, Subscription, now_ms,
};
use serde_json::Value;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Wait used when no coordinator timer is armed.
const IDLE_WAIT: Duration = Duration::from_secs(1);

/// How long to let the link flush PLAYER_LEAVE on shutdown.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Highest tick or publish rate; anything faster rounds to a zero period.
pub const MAX_RATE_HZ: u32 = 1000;

/// Period of a per-second rate, clamped to `1..=MAX_RATE_HZ`.
fn rate_period(rate: u32) -> Duration {
    Duration::from_millis(1000 / u64::from(rate.clamp(1, MAX_RATE_HZ)))
}

#[derive(Debug, Clone)]
pub struct PeerOptions {
    pub relay_url: String,
    pub peer_id: PeerId,
    /// Join this session instead of the persisted one
    pub session: Option<String>,
    /// Where to persist the session id (in-memory when absent)
    pub state_file: Option<PathBuf>,
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Maximum state publishes per second
    pub publish_rate: u32,
    pub reconnect: ReconnectConfig,
}

impl PeerOptions {
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            publish_interval: rate_period(self.publish_rate),
            ..Default::default()
        }
    }

    pub fn tick_interval(&self) -> Duration {
        rate_period(self.tick_rate)
    }

    /// Resolve the session id through the configured store.
    pub async fn open_session(&self) -> Session {
        let requested = self.session.clone();
        match &self.state_file {
            Some(path) => Session::open(&FileStore::new(path), self.peer_id.clone(), requested).await,
            None => Session::open(&MemoryStore::new(), self.peer_id.clone(), requested).await,
        }
    }
}

pub struct PeerRuntime<S: Simulation> {
    coordinator: Coordinator<RelayLink>,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    link_task: Option<JoinHandle<()>>,
    simulation: S,
    /// Inputs the coordinator accepted for our simulation
    inputs: mpsc::UnboundedReceiver<(PeerId, Value)>,
    tick: Duration,
    was_host: bool,
    _subscriptions: Vec<Subscription>,
}

impl<S: Simulation> PeerRuntime<S> {
    /// Connect to the relay and wire the coordinator to the simulation.
    pub fn connect(
        session: Session,
        relay_url: String,
        reconnect: ReconnectConfig,
        config: CoordinatorConfig,
        simulation: S,
        tick: Duration,
    ) -> Self {
        let (link, link_rx, link_task) =
            RelayLink::spawn(relay_url, session.local_peer_id().clone(), reconnect);
        let coordinator = Coordinator::new(session, link, config);

        let (input_tx, inputs) = mpsc::unbounded_channel();
        let input_sub = coordinator.events().subscribe(move |event| {
            if let SessionEvent::InputReceived { from, input } = event {
                let _ = input_tx.send((from.clone(), input.clone()));
            }
        });
        let log_sub = coordinator.events().subscribe(|event| {
            match serde_json::to_string(event) {
                Ok(json) => debug!("Session event: {}", json),
                Err(e) => warn!("Failed to serialize session event: {}", e),
            }
        });

        Self {
            coordinator,
            link_rx,
            link_task: Some(link_task),
            simulation,
            inputs,
            tick,
            was_host: false,
            _subscriptions: vec![input_sub, log_sub],
        }
    }

    /// Event bus of the underlying coordinator.
    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(self.coordinator.events())
    }

    pub fn coordinator(&self) -> &Coordinator<RelayLink> {
        &self.coordinator
    }

    /// Run until `shutdown` resolves or the link closes.
    ///
    /// `local_inputs` carries this player's inputs (e.g. parsed stdin lines).
    pub async fn run(
        mut self,
        mut local_inputs: mpsc::UnboundedReceiver<Value>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let mut sim_tick = tokio::time::interval(self.tick);
        sim_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            let deadline = self.timer_deadline();
            tokio::select! {
                event = self.link_rx.recv() => match event {
                    Some(LinkEvent::Connected) => self.coordinator.start(now_ms()),
                    Some(LinkEvent::Frame(data)) => self.coordinator.handle_payload(&data, now_ms()),
                    Some(LinkEvent::Disconnected) => warn!("Lost relay connection"),
                    None => {
                        warn!("Relay link closed");
                        break;
                    }
                },

                _ = tokio::time::sleep_until(deadline) => {
                    self.coordinator.tick(now_ms());
                }

                _ = sim_tick.tick() => self.step(),

                Some(input) = local_inputs.recv() => {
                    if !self.coordinator.send_input(input, now_ms()) {
                        warn!("No host yet, input dropped");
                    }
                }

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
            self.sync_role();
        }

        self.coordinator.dispose(now_ms());
        let Self {
            coordinator,
            link_task,
            ..
        } = self;
        // Dropping the transport lets the link flush PLAYER_LEAVE and close
        drop(coordinator);
        if let Some(task) = link_task {
            if tokio::time::timeout(FLUSH_TIMEOUT, task).await.is_err() {
                debug!("Relay link did not close in time");
            }
        }
        Ok(())
    }

    fn timer_deadline(&self) -> Instant {
        let wait = match self.coordinator.next_deadline() {
            Some(at) => Duration::from_millis(at.saturating_sub(now_ms())),
            None => IDLE_WAIT,
        };
        Instant::now() + wait
    }

    /// Advance the simulation and publish, host only.
    fn step(&mut self) {
        if !self.coordinator.is_host() {
            // Inputs queued before a step-down are stale
            while self.inputs.try_recv().is_ok() {}
            return;
        }

        while let Ok((from, input)) = self.inputs.try_recv() {
            self.simulation.apply_input(&from, &input);
        }
        self.simulation.step(self.tick);
        self.coordinator
            .publish_tick(self.simulation.snapshot(), now_ms());
    }

    fn sync_role(&mut self) {
        let is_host = self.coordinator.is_host();
        if is_host && !self.was_host {
            if let Some(state) = self.coordinator.latest_state() {
                info!("Resuming simulation from replicated state");
                self.simulation.restore(state);
            }
        }
        self.was_host = is_host;
    }
}

/// Forward JSON lines from stdin as local inputs.
///
/// Lines that are not valid JSON are logged and skipped.
pub fn spawn_stdin_inputs() -> mpsc::UnboundedReceiver<Value> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match serde_json::from_str::<Value>(&line) {
                    Ok(input) => {
                        if tx.send(input).is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!("Ignoring input line: {}", e),
                },
                Ok(None) => {
                    debug!("Stdin closed");
                    return;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    return;
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(tick_rate: u32, publish_rate: u32) -> PeerOptions {
        PeerOptions {
            relay_url: "ws://127.0.0.1:8080".to_string(),
            peer_id: "peer-a".parse().unwrap(),
            session: None,
            state_file: None,
            tick_rate,
            publish_rate,
            reconnect: ReconnectConfig::default(),
        }
    }

    #[test]
    fn test_rates_map_to_periods() {
        let opts = options(30, 20);
        assert_eq!(opts.tick_interval(), Duration::from_millis(33));
        assert_eq!(opts.coordinator_config().publish_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_out_of_range_rates_keep_nonzero_periods() {
        let fast = options(5000, u32::MAX);
        assert_eq!(fast.tick_interval(), Duration::from_millis(1));
        assert_eq!(fast.coordinator_config().publish_interval, Duration::from_millis(1));

        let stalled = options(0, 0);
        assert_eq!(stalled.tick_interval(), Duration::from_secs(1));
        assert_eq!(stalled.coordinator_config().publish_interval, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_high_tick_rate_builds_interval() {
        let mut interval = tokio::time::interval(options(5000, 20).tick_interval());
        interval.tick().await;
    }
}
