//! End-to-end tests for hostsync-daemon.
//!
//! Runs a real relay on a random local port and exercises it with raw
//! WebSocket clients, relay links and full peer runtimes.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use hostsync_core::transport::Transport;
use hostsync_core::{CoordinatorConfig, PeerId, Session, SessionEvent};
use hostsync_daemon::{
    Arena, HandshakeMessage, LinkEvent, MAX_MESSAGE_SIZE, PeerRuntime, ReconnectConfig, Relay,
    RelayLink,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

/// Raw WebSocket client speaking the relay protocol.
struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    /// Connect without sending a handshake.
    async fn connect(addr: SocketAddr) -> Self {
        let url = format!("ws://{}", addr);
        let (ws, _) = connect_async(&url).await.expect("Failed to connect");
        Self { ws }
    }

    /// Connect and identify as `peer_id`.
    async fn connect_and_handshake(addr: SocketAddr, peer_id: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client.handshake(peer_id).await;
        client
    }

    async fn handshake(&mut self, peer_id: &str) {
        let hs = HandshakeMessage::new(peer_id).to_binary().unwrap();
        self.send_binary(&hs).await;
    }

    /// Receive binary message.
    async fn recv_message(&mut self) -> Vec<u8> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Binary(data))) => return data,
                Some(Ok(Message::Text(text))) => return text.into_bytes(),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => panic!("Connection closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {}", e),
                None => panic!("Stream ended unexpectedly"),
                _ => continue,
            }
        }
    }

    /// Receive message with timeout.
    async fn recv_message_timeout(&mut self, duration: Duration) -> Result<Vec<u8>, &'static str> {
        match timeout(duration, self.recv_message()).await {
            Ok(msg) => Ok(msg),
            Err(_) => Err("Timeout waiting for message"),
        }
    }

    async fn send_binary(&mut self, data: &[u8]) {
        self.ws
            .send(Message::Binary(data.to_vec()))
            .await
            .expect("Failed to send message");
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Start a relay on a random port.
async fn spawn_relay() -> SocketAddr {
    let listener = Relay::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(Relay::new().serve(listener));
    addr
}

/// Give the relay time to process handshakes.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

fn peer(s: &str) -> PeerId {
    s.parse().unwrap()
}

fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        election_settle: Duration::from_millis(300),
        heartbeat_interval: Duration::from_millis(100),
        liveness_check_interval: Duration::from_millis(300),
        host_timeout: Duration::from_millis(500),
        state_guard_window: Duration::from_millis(1000),
        publish_interval: Duration::from_millis(50),
        keyframe_every: 5,
    }
}

async fn next_frame(events: &mut mpsc::UnboundedReceiver<LinkEvent>) -> Vec<u8> {
    loop {
        match timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Some(LinkEvent::Frame(data))) => return data,
            Ok(Some(_)) => continue,
            Ok(None) => panic!("Link closed"),
            Err(_) => panic!("Timeout waiting for frame"),
        }
    }
}

async fn wait_connected(events: &mut mpsc::UnboundedReceiver<LinkEvent>) {
    match timeout(Duration::from_secs(5), events.recv()).await {
        Ok(Some(LinkEvent::Connected)) => {}
        other => panic!("Expected Connected, got {:?}", other),
    }
}

// ============================================================================
// Relay
// ============================================================================

#[tokio::test]
async fn test_relay_fans_out_to_everyone_including_sender() {
    let addr = spawn_relay().await;
    let mut a = TestClient::connect_and_handshake(addr, "peer-a").await;
    let mut b = TestClient::connect_and_handshake(addr, "peer-b").await;
    settle().await;

    a.send_binary(b"hello").await;

    let at_a = a.recv_message_timeout(Duration::from_secs(5)).await.unwrap();
    let at_b = b.recv_message_timeout(Duration::from_secs(5)).await.unwrap();
    assert_eq!(at_a, b"hello");
    assert_eq!(at_b, b"hello");
}

#[tokio::test]
async fn test_relay_ignores_frames_before_handshake() {
    let addr = spawn_relay().await;
    let mut a = TestClient::connect_and_handshake(addr, "peer-a").await;
    let mut c = TestClient::connect(addr).await;
    settle().await;

    c.send_binary(b"anonymous").await;
    c.handshake("peer-c").await;
    settle().await;
    c.send_binary(b"identified").await;

    let received = a.recv_message_timeout(Duration::from_secs(5)).await.unwrap();
    assert_eq!(received, b"identified");
}

#[tokio::test]
async fn test_relay_drops_oversized_frames() {
    let addr = spawn_relay().await;
    let mut a = TestClient::connect_and_handshake(addr, "peer-a").await;
    let mut b = TestClient::connect_and_handshake(addr, "peer-b").await;
    settle().await;

    a.send_binary(&vec![b'x'; MAX_MESSAGE_SIZE + 1]).await;
    a.send_binary(b"small").await;

    let received = b.recv_message_timeout(Duration::from_secs(5)).await.unwrap();
    assert_eq!(received, b"small");
}

#[tokio::test]
async fn test_relay_does_not_forward_handshakes() {
    let addr = spawn_relay().await;
    let mut a = TestClient::connect_and_handshake(addr, "peer-a").await;
    settle().await;

    let _b = TestClient::connect_and_handshake(addr, "peer-b").await;
    assert!(a.recv_message_timeout(Duration::from_millis(300)).await.is_err());
}

#[tokio::test]
async fn test_idle_socket_does_not_stall_relay() {
    let addr = spawn_relay().await;
    let mut a = TestClient::connect_and_handshake(addr, "peer-a").await;
    settle().await;

    // Plain TCP that never starts the WebSocket upgrade
    let _idle = TcpStream::connect(addr).await.unwrap();
    settle().await;

    a.send_binary(b"still here").await;
    let echoed = a.recv_message_timeout(Duration::from_secs(3)).await.unwrap();
    assert_eq!(echoed, b"still here");

    // New peers are still accepted too
    let mut b = TestClient::connect_and_handshake(addr, "peer-b").await;
    settle().await;
    a.send_binary(b"hello b").await;
    assert_eq!(b.recv_message_timeout(Duration::from_secs(3)).await.unwrap(), b"hello b");
}

#[tokio::test]
async fn test_reconnecting_peer_replaces_stale_connection() {
    let addr = spawn_relay().await;
    let mut observer = TestClient::connect_and_handshake(addr, "peer-z").await;
    let _stale = TestClient::connect_and_handshake(addr, "peer-a").await;
    settle().await;

    let mut fresh = TestClient::connect_and_handshake(addr, "peer-a").await;
    settle().await;

    fresh.send_binary(b"from fresh").await;
    assert_eq!(
        observer.recv_message_timeout(Duration::from_secs(3)).await.unwrap(),
        b"from fresh"
    );
    assert_eq!(
        fresh.recv_message_timeout(Duration::from_secs(3)).await.unwrap(),
        b"from fresh"
    );
}

// ============================================================================
// Relay link
// ============================================================================

#[tokio::test]
async fn test_links_exchange_frames() {
    let addr = spawn_relay().await;
    let url = format!("ws://{}", addr);

    let (link_a, mut events_a, _task_a) =
        RelayLink::spawn(url.clone(), peer("peer-a"), ReconnectConfig::default());
    let (_link_b, mut events_b, _task_b) =
        RelayLink::spawn(url, peer("peer-b"), ReconnectConfig::default());
    wait_connected(&mut events_a).await;
    wait_connected(&mut events_b).await;
    settle().await;

    link_a.broadcast(b"{\"ping\":1}").unwrap();

    assert_eq!(next_frame(&mut events_a).await, b"{\"ping\":1}");
    assert_eq!(next_frame(&mut events_b).await, b"{\"ping\":1}");
}

#[tokio::test]
async fn test_link_reconnects_when_relay_appears() {
    // Reserve a port, then free it so the first attempts fail
    let reserved = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = reserved.local_addr().unwrap();
    drop(reserved);

    let reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(200),
        ..Default::default()
    };
    let (_link, mut events, _task) =
        RelayLink::spawn(format!("ws://{}", addr), peer("peer-a"), reconnect);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let listener = Relay::bind(&addr.to_string()).await.unwrap();
    tokio::spawn(Relay::new().serve(listener));

    wait_connected(&mut events).await;
}

// ============================================================================
// Peer runtime
// ============================================================================

/// What a runtime reported through its event bus.
#[derive(Default)]
struct Observed {
    host: Option<PeerId>,
    state_updates: usize,
    inputs_from: Vec<PeerId>,
}

fn spawn_runtime(
    url: &str,
    id: &str,
) -> (
    Arc<Mutex<Observed>>,
    mpsc::UnboundedSender<serde_json::Value>,
    oneshot::Sender<()>,
    tokio::task::JoinHandle<anyhow::Result<()>>,
) {
    let runtime = PeerRuntime::connect(
        Session::new("e2e", peer(id)),
        url.to_string(),
        ReconnectConfig::default(),
        fast_config(),
        Arena::new(),
        Duration::from_millis(20),
    );

    let observed = Arc::new(Mutex::new(Observed::default()));
    let observed_clone = Arc::clone(&observed);
    let subscription = runtime.events().subscribe(move |event| {
        let mut observed = observed_clone.lock().unwrap();
        match event {
            SessionEvent::HostChanged { host_id, .. } => observed.host = host_id.clone(),
            SessionEvent::StateUpdated { .. } => observed.state_updates += 1,
            SessionEvent::InputReceived { from, .. } => observed.inputs_from.push(from.clone()),
            _ => {}
        }
    });

    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let _subscription = subscription;
        runtime
            .run(input_rx, async move {
                let _ = stop_rx.await;
            })
            .await
    });
    (observed, input_tx, stop_tx, task)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let result = timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "Condition not met in time");
}

#[tokio::test]
async fn test_runtimes_elect_greatest_and_replicate() {
    let addr = spawn_relay().await;
    let url = format!("ws://{}", addr);

    let (observed_a, inputs_a, stop_a, task_a) = spawn_runtime(&url, "peer-a");
    let (observed_b, _inputs_b, stop_b, task_b) = spawn_runtime(&url, "peer-b");

    wait_until(|| {
        let a = observed_a.lock().unwrap();
        let b = observed_b.lock().unwrap();
        a.host == Some(peer("peer-b")) && b.host == Some(peer("peer-b")) && a.state_updates > 0
    })
    .await;

    // Follower input is routed to the host only
    inputs_a.send(serde_json::json!({"dx": 2})).unwrap();
    wait_until(|| observed_b.lock().unwrap().inputs_from.contains(&peer("peer-a"))).await;
    assert!(observed_a.lock().unwrap().inputs_from.is_empty());

    let _ = stop_a.send(());
    let _ = stop_b.send(());
    task_a.await.unwrap().unwrap();
    task_b.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_runtime_failover_when_host_stops() {
    let addr = spawn_relay().await;
    let url = format!("ws://{}", addr);

    let (observed_a, _inputs_a, stop_a, task_a) = spawn_runtime(&url, "peer-a");
    let (observed_b, _inputs_b, stop_b, task_b) = spawn_runtime(&url, "peer-b");

    wait_until(|| {
        observed_a.lock().unwrap().host == Some(peer("peer-b"))
            && observed_b.lock().unwrap().host == Some(peer("peer-b"))
    })
    .await;

    let _ = stop_b.send(());
    task_b.await.unwrap().unwrap();

    wait_until(|| observed_a.lock().unwrap().host == Some(peer("peer-a"))).await;

    let _ = stop_a.send(());
    task_a.await.unwrap().unwrap();
}
