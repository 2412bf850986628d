//! WebSocket fan-out relay: the broadcast channel peers share.
//!
//! The relay never inspects or originates session payloads. Every frame from
//! an identified peer is forwarded to every identified peer, the sender
//! included, which is exactly the group-broadcast contract peers expect.
//! Session scoping and directed messages are the peers' business.

use crate::connection::{ConnectionEvent, PeerConnection};
use anyhow::Result;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tracing::{debug, error, info, warn};

/// How long a client gets to complete the WebSocket upgrade.
pub const UPGRADE_TIMEOUT: Duration = Duration::from_secs(10);

/// A connection whose WebSocket upgrade finished.
struct Upgraded {
    conn_id: String,
    addr: SocketAddr,
    ws_stream: WebSocketStream<TcpStream>,
}

/// Event emitted by the relay after the handshake lifecycle is resolved.
#[derive(Debug)]
pub enum RelayEvent {
    /// A peer completed its handshake.
    PeerConnected { peer_id: String },
    /// A frame from an identified peer.
    Frame { peer_id: String, data: Vec<u8> },
    /// A previously identified peer disconnected.
    PeerDisconnected { peer_id: String },
}

pub struct Relay {
    /// Pre-handshake connections indexed by conn_id
    pending: HashMap<String, PeerConnection>,
    /// Identified peers indexed by peer ID
    peers: HashMap<String, PeerConnection>,
    /// Map from conn_id to peer ID
    conn_id_to_peer: HashMap<String, String>,
    next_conn_id: u64,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    event_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    upgrade_tx: mpsc::UnboundedSender<Upgraded>,
    upgrade_rx: mpsc::UnboundedReceiver<Upgraded>,
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

impl Relay {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (upgrade_tx, upgrade_rx) = mpsc::unbounded_channel();

        Self {
            pending: HashMap::new(),
            peers: HashMap::new(),
            conn_id_to_peer: HashMap::new(),
            next_conn_id: 1,
            event_tx,
            event_rx,
            upgrade_tx,
            upgrade_rx,
        }
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("Relay listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Upgrade a TCP connection to WebSocket in the background.
    ///
    /// The upgrade gets [`UPGRADE_TIMEOUT`]; a finished upgrade is registered
    /// as pending from [`Relay::poll_event`] and then waits for its handshake.
    pub fn accept_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        let conn_id = format!("conn-{}", self.next_conn_id);
        self.next_conn_id += 1;

        let upgrade_tx = self.upgrade_tx.clone();
        tokio::spawn(async move {
            let ws_stream = match tokio::time::timeout(UPGRADE_TIMEOUT, accept_async(stream)).await {
                Ok(Ok(ws)) => ws,
                Ok(Err(e)) => {
                    // Health checks connect and close without finishing the upgrade
                    let err_str = e.to_string();
                    if err_str.contains("Handshake not finished")
                        || err_str.contains("Connection reset")
                        || err_str.contains("unexpected EOF")
                    {
                        debug!("Connection closed before handshake from {}", addr);
                    } else {
                        error!("WebSocket upgrade failed for {}: {}", addr, e);
                    }
                    return;
                }
                Err(_) => {
                    debug!("WebSocket upgrade from {} timed out", addr);
                    return;
                }
            };
            let _ = upgrade_tx.send(Upgraded {
                conn_id,
                addr,
                ws_stream,
            });
        });
    }

    fn register(&mut self, upgraded: Upgraded) {
        let Upgraded {
            conn_id,
            addr,
            ws_stream,
        } = upgraded;
        info!("New connection from {} (conn_id: {})", addr, conn_id);

        let conn = PeerConnection::new(conn_id.clone(), ws_stream, self.event_tx.clone());
        self.pending.insert(conn_id, conn);
    }

    /// Wait for the next relay event.
    ///
    /// Connections that close before their handshake are cleaned up silently.
    /// Cancel safe: the only await points are channel receives.
    pub async fn poll_event(&mut self) -> Option<RelayEvent> {
        loop {
            let event = tokio::select! {
                upgraded = self.upgrade_rx.recv() => {
                    if let Some(upgraded) = upgraded {
                        self.register(upgraded);
                    }
                    continue;
                }
                event = self.event_rx.recv() => event?,
            };

            match event {
                ConnectionEvent::Handshake { conn_id, peer_id } => {
                    let Some(mut conn) = self.pending.remove(&conn_id) else {
                        continue;
                    };
                    conn.set_peer_id(peer_id.clone());

                    // A reconnecting peer replaces its stale connection
                    if let Some(mut stale) = self.peers.insert(peer_id.clone(), conn) {
                        debug!("Replacing stale connection {} for {}", stale.conn_id, peer_id);
                        self.conn_id_to_peer.remove(&stale.conn_id);
                        tokio::spawn(async move { stale.close().await });
                    }
                    self.conn_id_to_peer.insert(conn_id, peer_id.clone());

                    return Some(RelayEvent::PeerConnected { peer_id });
                }
                ConnectionEvent::Frame(frame) => {
                    let Some(peer_id) = self.conn_id_to_peer.get(&frame.conn_id) else {
                        continue;
                    };
                    return Some(RelayEvent::Frame {
                        peer_id: peer_id.clone(),
                        data: frame.data,
                    });
                }
                ConnectionEvent::Closed { conn_id } => {
                    if let Some(peer_id) = self.conn_id_to_peer.remove(&conn_id) {
                        self.peers.remove(&peer_id);
                        return Some(RelayEvent::PeerDisconnected { peer_id });
                    }
                    self.pending.remove(&conn_id);
                    debug!("Connection closed before handshake: {}", conn_id);
                }
            }
        }
    }

    /// Send a frame to every identified peer, the sender included.
    pub async fn fan_out(&self, data: &[u8]) {
        for (peer_id, conn) in &self.peers {
            if let Err(e) = conn.send(data).await {
                warn!("Failed to relay to {}: {}", peer_id, e);
            }
        }
    }

    /// Number of identified peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Accept connections and fan out frames. Runs until the task is dropped.
    pub async fn serve(mut self, listener: TcpListener) -> Result<()> {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.accept_connection(stream, addr),
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                }

                Some(event) = self.poll_event() => {
                    match event {
                        RelayEvent::PeerConnected { peer_id } => {
                            info!("Peer connected: {} ({} total)", peer_id, self.peer_count());
                        }
                        RelayEvent::Frame { peer_id, data } => {
                            debug!("Relaying {} bytes from {} to {} peer(s)", data.len(), peer_id, self.peer_count());
                            self.fan_out(&data).await;
                        }
                        RelayEvent::PeerDisconnected { peer_id } => {
                            info!("Peer disconnected: {} ({} left)", peer_id, self.peer_count());
                        }
                    }
                }
            }
        }
    }
}
