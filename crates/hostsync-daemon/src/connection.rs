//! A single peer's connection to the relay.
//!
//! Each connection wraps a WebSocket stream, handling the split between read
//! and write halves for async operation. The read half runs in its own task
//! and reports to the relay through an event channel.

use crate::message::{HandshakeMessage, MAX_MESSAGE_SIZE};
use anyhow::{Result, anyhow};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error, warn};

/// Frame received on a connection.
#[derive(Debug)]
pub struct IncomingFrame {
    /// Connection ID assigned by the relay (e.g. "conn-3")
    pub conn_id: String,
    /// Raw frame data
    pub data: Vec<u8>,
}

/// Event emitted by a connection.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The peer identified itself
    Handshake { conn_id: String, peer_id: String },
    /// A session payload to fan out
    Frame(IncomingFrame),
    /// Connection was closed
    Closed { conn_id: String },
}

type WriteHalf = futures::stream::SplitSink<WebSocketStream<TcpStream>, Message>;

/// Relay side of one WebSocket connection.
pub struct PeerConnection {
    pub conn_id: String,
    /// Peer ID (known after handshake)
    pub peer_id: Option<String>,
    write: Arc<Mutex<WriteHalf>>,
    read_task: Option<JoinHandle<()>>,
}

impl PeerConnection {
    /// Wrap an accepted WebSocket stream.
    ///
    /// Spawns a read task that forwards frames to the event channel.
    pub fn new(
        conn_id: String,
        ws_stream: WebSocketStream<TcpStream>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let (write, read) = ws_stream.split();
        let write = Arc::new(Mutex::new(write));

        let read_conn_id = conn_id.clone();
        let read_task = tokio::spawn(async move {
            Self::read_loop(read_conn_id, read, event_tx).await;
        });

        Self {
            conn_id,
            peer_id: None,
            write,
            read_task: Some(read_task),
        }
    }

    async fn read_loop(
        conn_id: String,
        mut read: futures::stream::SplitStream<WebSocketStream<TcpStream>>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) {
        let mut identified = false;
        loop {
            match read.next().await {
                Some(Ok(msg)) => {
                    let data = match msg {
                        Message::Binary(data) => data,
                        Message::Text(text) => text.into_bytes(),
                        Message::Ping(_) | Message::Pong(_) => continue,
                        Message::Close(_) => {
                            debug!("Received close frame from {}", conn_id);
                            break;
                        }
                        Message::Frame(_) => continue,
                    };

                    if data.len() > MAX_MESSAGE_SIZE {
                        warn!(
                            "Frame from {} exceeds max size ({} > {}), dropping",
                            conn_id,
                            data.len(),
                            MAX_MESSAGE_SIZE
                        );
                        continue;
                    }

                    if !identified {
                        if let Some(handshake) = HandshakeMessage::from_binary(&data) {
                            debug!("Received handshake from {} (peer_id: {})", conn_id, handshake.peer_id);
                            identified = true;
                            let _ = event_tx.send(ConnectionEvent::Handshake {
                                conn_id: conn_id.clone(),
                                peer_id: handshake.peer_id,
                            });
                        } else {
                            debug!("Dropping frame from {} before handshake", conn_id);
                        }
                        continue;
                    }

                    let _ = event_tx.send(ConnectionEvent::Frame(IncomingFrame {
                        conn_id: conn_id.clone(),
                        data,
                    }));
                }
                Some(Err(e)) => {
                    match e {
                        WsError::ConnectionClosed | WsError::AlreadyClosed => {
                            debug!("Connection {} closed", conn_id);
                        }
                        _ => {
                            error!("WebSocket error on {}: {}", conn_id, e);
                        }
                    }
                    break;
                }
                None => {
                    debug!("Connection {} stream ended", conn_id);
                    break;
                }
            }
        }

        let _ = event_tx.send(ConnectionEvent::Closed { conn_id });
    }

    /// Send a binary frame to the peer.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        let mut write = self.write.lock().await;
        write
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| anyhow!("Failed to send frame: {}", e))
    }

    pub fn set_peer_id(&mut self, peer_id: String) {
        self.peer_id = Some(peer_id);
    }

    /// Close the connection gracefully.
    pub async fn close(&mut self) {
        if let Ok(mut write) = self.write.try_lock() {
            let _ = write.send(Message::Close(None)).await;
        }

        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}
