//! Client connection to the relay.
//!
//! `RelayLink` is the daemon's [`Transport`]: `broadcast` only pushes onto an
//! unbounded channel, and a background task owns the WebSocket. The task
//! handles:
//! - Connection establishment with handshake
//! - Automatic reconnection with exponential backoff
//! - Forwarding inbound frames as [`LinkEvent`]s
//!
//! Frames broadcast while disconnected are dropped; the protocol tolerates
//! loss and the host republishes full state periodically.

use crate::message::{HandshakeMessage, MAX_MESSAGE_SIZE};
use anyhow::Result;
use futures::{SinkExt, StreamExt};
use hostsync_core::PeerId;
use hostsync_core::transport::{self, Transport, TransportError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before first reconnect attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum number of attempts (None = unlimited)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_attempts: None,
        }
    }
}

/// Calculates the next reconnection delay using exponential backoff.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let delay_secs = config.initial_delay.as_secs_f64()
        * config.backoff_factor.powi(attempt.saturating_sub(1) as i32);

    Duration::from_secs_f64(delay_secs.min(config.max_delay.as_secs_f64()))
}

/// Consecutive failed attempts since the last successful connection.
#[derive(Debug, Clone, Default)]
pub struct ReconnectState {
    pub attempts: u32,
}

impl ReconnectState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed attempt and return how long to wait before the next.
    pub fn next_delay(&mut self, config: &ReconnectConfig) -> Duration {
        self.attempts += 1;
        calculate_backoff(self.attempts, config)
    }

    /// Reset state after successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn exceeded_max_attempts(&self, config: &ReconnectConfig) -> bool {
        config
            .max_attempts
            .is_some_and(|max| self.attempts >= max)
    }
}

/// Event emitted by the link task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Handshake sent; frames now flow both ways
    Connected,
    /// A frame relayed from the session (possibly our own)
    Frame(Vec<u8>),
    /// The connection dropped; a reconnect is scheduled
    Disconnected,
}

/// Why a connected session with the relay ended.
enum LinkExit {
    /// Our side went away; stop for good
    Shutdown,
    /// The relay closed the connection
    Remote,
}

/// Transport over a relay connection.
pub struct RelayLink {
    peer_id: PeerId,
    outbound_tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl RelayLink {
    /// Start the link task.
    ///
    /// Returns the transport, the inbound event channel and the task handle.
    /// Dropping the link closes the connection once queued frames are sent.
    pub fn spawn(
        url: String,
        peer_id: PeerId,
        config: ReconnectConfig,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>, JoinHandle<()>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let task_peer_id = peer_id.clone();
        let task = tokio::spawn(async move {
            run_link(url, task_peer_id, config, outbound_rx, event_tx).await;
        });

        (
            Self {
                peer_id,
                outbound_tx,
            },
            event_rx,
            task,
        )
    }
}

impl Transport for RelayLink {
    fn local_identity(&self) -> &PeerId {
        &self.peer_id
    }

    fn broadcast(&self, payload: &[u8]) -> transport::Result<()> {
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(TransportError::TooLarge(payload.len()));
        }
        self.outbound_tx
            .send(payload.to_vec())
            .map_err(|_| TransportError::Closed)
    }
}

async fn run_link(
    url: String,
    peer_id: PeerId,
    config: ReconnectConfig,
    mut outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
) {
    let mut reconnect = ReconnectState::new();

    loop {
        match connect_once(&url, &peer_id, &mut outbound_rx, &event_tx, &mut reconnect).await {
            Ok(LinkExit::Shutdown) => {
                debug!("Relay link to {} shut down", url);
                return;
            }
            Ok(LinkExit::Remote) => info!("Relay {} closed the connection", url),
            Err(e) => warn!("Relay link to {} failed: {}", url, e),
        }

        if reconnect.exceeded_max_attempts(&config) {
            error!("Giving up on relay {} after {} attempts", url, reconnect.attempts);
            return;
        }
        let delay = reconnect.next_delay(&config);
        info!("Reconnecting to {} in {:?}", url, delay);

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        let mut dropped = 0usize;
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                frame = outbound_rx.recv() => match frame {
                    Some(_) => dropped += 1,
                    None => return,
                },
            }
        }
        if dropped > 0 {
            debug!("Dropped {} frame(s) while disconnected", dropped);
        }
    }
}

async fn connect_once(
    url: &str,
    peer_id: &PeerId,
    outbound_rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    event_tx: &mpsc::UnboundedSender<LinkEvent>,
    reconnect: &mut ReconnectState,
) -> Result<LinkExit> {
    let (ws_stream, _) = connect_async(url).await?;
    let (mut write, mut read) = ws_stream.split();

    let handshake = HandshakeMessage::new(peer_id.as_str()).to_binary()?;
    write.send(Message::Binary(handshake)).await?;

    reconnect.reset();
    info!("Connected to relay {} as {}", url, peer_id);
    if event_tx.send(LinkEvent::Connected).is_err() {
        return Ok(LinkExit::Shutdown);
    }

    let exit = loop {
        tokio::select! {
            frame = outbound_rx.recv() => match frame {
                Some(data) => {
                    if let Err(e) = write.send(Message::Binary(data)).await {
                        break Err(e.into());
                    }
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    break Ok(LinkExit::Shutdown);
                }
            },
            msg = read.next() => {
                let data = match msg {
                    Some(Ok(Message::Binary(data))) => data,
                    Some(Ok(Message::Text(text))) => text.into_bytes(),
                    Some(Ok(Message::Close(_))) | None => break Ok(LinkExit::Remote),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break Err(e.into()),
                };
                if data.len() > MAX_MESSAGE_SIZE {
                    warn!("Frame from relay exceeds max size ({} > {}), dropping", data.len(), MAX_MESSAGE_SIZE);
                    continue;
                }
                if event_tx.send(LinkEvent::Frame(data)).is_err() {
                    break Ok(LinkExit::Shutdown);
                }
            }
        }
    };

    let _ = event_tx.send(LinkEvent::Disconnected);
    exit
}
