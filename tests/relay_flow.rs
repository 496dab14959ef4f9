//! Relay end-to-end tests
//!
//! Binds a real relay on loopback ephemeral ports, connects WebSocket peers
//! with tokio-tungstenite and drives the HTTP side with reqwest.
//!
//! Run with: cargo test -p peerbridge-tests --test relay_flow

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use peerbridge_core::PeerRegistry;
use peerbridge_relay::{RelayConfig, RelayService, ServiceError};

type PeerSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =========================================================================
// Harness
// =========================================================================

struct TestRelay {
    http_addr: SocketAddr,
    peer_addr: SocketAddr,
    registry: Arc<PeerRegistry>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), ServiceError>>,
}

impl TestRelay {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.http_addr, path)
    }

    fn peer_url(&self) -> String {
        format!("ws://{}/", self.peer_addr)
    }

    /// Wait until exactly `count` peers are registered
    async fn wait_for_peers(&self, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.registry.len().await != count {
            assert!(
                Instant::now() < deadline,
                "expected {} peers, have {}",
                count,
                self.registry.len().await
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn connect_peer(&self, expected_total: usize) -> PeerSocket {
        let (ws, _) = tokio_tungstenite::connect_async(self.peer_url())
            .await
            .expect("peer connect");
        self.wait_for_peers(expected_total).await;
        ws
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let result = tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("relay did not stop");
        result.unwrap().unwrap();
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn start_relay_with(config: RelayConfig) -> TestRelay {
    init_tracing();

    let service = RelayService::bind(config).await.unwrap();
    let http_addr = service.http_addr().unwrap();
    let peer_addr = service.peer_addr().unwrap();
    let registry = service.registry();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(service.run(async move {
        let _ = shutdown_rx.await;
    }));

    TestRelay {
        http_addr,
        peer_addr,
        registry,
        shutdown_tx: Some(shutdown_tx),
        handle,
    }
}

async fn start_relay(timeout: Duration) -> TestRelay {
    start_relay_with(RelayConfig::loopback().with_response_timeout(timeout)).await
}

/// Run a peer that answers every payload with `respond(payload)`
fn spawn_responder<F>(mut ws: PeerSocket, respond: F) -> JoinHandle<()>
where
    F: Fn(Message) -> Message + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(Ok(message)) = ws.next().await {
            match message {
                Message::Text(_) | Message::Binary(_) => {
                    if ws.send(respond(message)).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    })
}

fn spawn_echo(ws: PeerSocket) -> JoinHandle<()> {
    spawn_responder(ws, |message| message)
}

fn text(value: &str) -> Message {
    Message::Text(value.to_string().into())
}

async fn post(client: &reqwest::Client, url: &str, body: Vec<u8>) -> reqwest::Response {
    client.post(url).body(body).send().await.expect("POST failed")
}

// =========================================================================
// HTTP surface
// =========================================================================

#[tokio::test]
async fn get_returns_hello() {
    let relay = start_relay(Duration::from_secs(5)).await;

    let response = reqwest::get(relay.url("/")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "text/html");
    assert_eq!(response.text().await.unwrap(), "hello");

    relay.stop().await;
}

#[tokio::test]
async fn ping_is_answered_with_pong() {
    let relay = start_relay(Duration::from_secs(5)).await;
    let mut ws = relay.connect_peer(1).await;

    let peer = tokio::spawn(async move {
        let message = ws.next().await.unwrap().unwrap();
        assert_eq!(message.to_text().unwrap(), "ping");
        ws.send(text("pong")).await.unwrap();
        ws
    });

    let client = reqwest::Client::new();
    let response = post(&client, &relay.url("/"), b"ping".to_vec()).await;

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert_eq!(response.headers()["content-type"], "text/html");
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"pong");

    let _ws = peer.await.unwrap();
    relay.stop().await;
}

#[tokio::test]
async fn round_trip_preserves_payload_bytes() {
    let relay = start_relay(Duration::from_secs(5)).await;
    let ws = relay.connect_peer(1).await;
    let _peer = spawn_echo(ws);

    let client = reqwest::Client::new();
    let payloads: Vec<Vec<u8>> = vec![
        b"plain text payload".to_vec(),
        "multi-byte: \u{00e9}\u{4e16}\u{1f600}".as_bytes().to_vec(),
        (0u8..=255).cycle().take(4096).collect(),
        vec![0u8; 1],
        vec![b'x'; 256 * 1024],
    ];

    for payload in payloads {
        let response = post(&client, &relay.url("/"), payload.clone()).await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.bytes().await.unwrap().as_ref(), payload.as_slice());
    }

    relay.stop().await;
}

#[tokio::test]
async fn peers_endpoint_lists_registered_peers() {
    let relay = start_relay(Duration::from_secs(5)).await;
    let _a = relay.connect_peer(1).await;
    let _b = relay.connect_peer(2).await;

    let peers: serde_json::Value = reqwest::get(relay.url("/peers"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let peers = peers.as_array().unwrap();
    assert_eq!(peers.len(), 2);
    assert_eq!(peers[0]["state"], "open");
    assert!(peers[0]["id"].as_u64().unwrap() < peers[1]["id"].as_u64().unwrap());

    relay.stop().await;
}

// =========================================================================
// Peer selection
// =========================================================================

#[tokio::test]
async fn oldest_peer_is_selected_and_next_takes_over() {
    let relay = start_relay(Duration::from_secs(5)).await;
    let a = relay.connect_peer(1).await;
    let peer_a = spawn_responder(a, |_| text("from-a"));
    let b = relay.connect_peer(2).await;
    let _peer_b = spawn_responder(b, |_| text("from-b"));

    let client = reqwest::Client::new();
    let response = post(&client, &relay.url("/"), b"x".to_vec()).await;
    assert_eq!(response.text().await.unwrap(), "from-a");

    // A goes away, B becomes head
    peer_a.abort();
    relay.wait_for_peers(1).await;

    let response = post(&client, &relay.url("/"), b"x".to_vec()).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "from-b");

    relay.stop().await;
}

#[tokio::test]
async fn concurrent_requests_to_one_peer_get_their_own_replies() {
    let relay = start_relay(Duration::from_secs(10)).await;
    let ws = relay.connect_peer(1).await;
    let _peer = spawn_echo(ws);

    let client = reqwest::Client::new();
    let requests: Vec<_> = (0..8)
        .map(|i| {
            let client = client.clone();
            let url = relay.url("/");
            tokio::spawn(async move {
                let body = format!("request-{i}");
                let response = post(&client, &url, body.clone().into_bytes()).await;
                (body, response.status(), response.text().await.unwrap())
            })
        })
        .collect();

    for request in requests {
        let (sent, status, received) = request.await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(received, sent);
    }

    relay.stop().await;
}

// =========================================================================
// Failure modes
// =========================================================================

#[tokio::test]
async fn no_peer_returns_503_without_hanging() {
    let relay = start_relay(Duration::from_secs(30)).await;
    let client = reqwest::Client::new();

    let started = Instant::now();
    let response = post(&client, &relay.url("/"), b"ping".to_vec()).await;

    assert_eq!(response.status(), 503);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert!(started.elapsed() < Duration::from_secs(5));

    relay.stop().await;
}

#[tokio::test]
async fn silent_peer_returns_504() {
    let relay = start_relay(Duration::from_millis(300)).await;
    let _ws = relay.connect_peer(1).await;

    let client = reqwest::Client::new();
    let response = post(&client, &relay.url("/"), b"ping".to_vec()).await;
    assert_eq!(response.status(), 504);

    // The peer is still registered after a timeout
    assert_eq!(relay.registry.len().await, 1);

    relay.stop().await;
}

#[tokio::test]
async fn peer_disconnecting_mid_request_returns_502() {
    let relay = start_relay(Duration::from_secs(30)).await;
    let mut ws = relay.connect_peer(1).await;

    let peer = tokio::spawn(async move {
        let _ = ws.next().await;
        let _ = ws.close(None).await;
    });

    let client = reqwest::Client::new();
    let started = Instant::now();
    let response = post(&client, &relay.url("/"), b"ping".to_vec()).await;

    assert_eq!(response.status(), 502);
    assert!(started.elapsed() < Duration::from_secs(10));

    peer.await.unwrap();
    relay.wait_for_peers(0).await;
    relay.stop().await;
}

#[tokio::test]
async fn late_reply_after_timeout_is_not_returned_to_next_caller() {
    let relay = start_relay(Duration::from_millis(300)).await;
    let mut ws = relay.connect_peer(1).await;

    // Answers the first payload too late, everything after that at once
    let _peer = tokio::spawn(async move {
        let mut first = true;
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(_) | Message::Binary(_) = message {
                if first {
                    first = false;
                    tokio::time::sleep(Duration::from_millis(450)).await;
                }
                if ws.send(message).await.is_err() {
                    break;
                }
            }
        }
    });

    let client = reqwest::Client::new();
    let response = post(&client, &relay.url("/"), b"request-A".to_vec()).await;
    assert_eq!(response.status(), 504);

    let response = post(&client, &relay.url("/"), b"request-B".to_vec()).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "request-B");

    relay.stop().await;
}

#[tokio::test]
async fn peer_that_never_answers_pings_is_dropped() {
    let mut config = RelayConfig::loopback();
    config.peer.keepalive = Some(Duration::from_millis(100));
    let relay = start_relay_with(config).await;

    // Never polled, so the client never answers pings
    let _silent = relay.connect_peer(1).await;
    relay.wait_for_peers(0).await;

    relay.stop().await;
}

#[tokio::test]
async fn peer_answering_pings_stays_registered() {
    let mut config = RelayConfig::loopback();
    config.peer.keepalive = Some(Duration::from_millis(100));
    let relay = start_relay_with(config).await;

    let ws = relay.connect_peer(1).await;
    let _peer = spawn_echo(ws);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(relay.registry.len().await, 1);

    relay.stop().await;
}

#[tokio::test]
async fn disconnected_peer_is_unregistered() {
    let relay = start_relay(Duration::from_secs(5)).await;
    let mut ws = relay.connect_peer(1).await;

    ws.close(None).await.unwrap();
    relay.wait_for_peers(0).await;

    let client = reqwest::Client::new();
    let response = post(&client, &relay.url("/"), b"ping".to_vec()).await;
    assert_eq!(response.status(), 503);

    relay.stop().await;
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let config = RelayConfig {
        max_body_bytes: 1024,
        ..RelayConfig::loopback()
    };
    let relay = start_relay_with(config).await;
    let ws = relay.connect_peer(1).await;
    let _peer = spawn_echo(ws);

    let client = reqwest::Client::new();
    let response = post(&client, &relay.url("/"), vec![b'a'; 4096]).await;
    assert_eq!(response.status(), 413);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");

    let response = post(&client, &relay.url("/"), vec![b'a'; 512]).await;
    assert_eq!(response.status(), 200);

    relay.stop().await;
}

#[tokio::test]
async fn shutdown_closes_peer_sessions() {
    let relay = start_relay(Duration::from_secs(5)).await;
    let mut ws = relay.connect_peer(1).await;
    let registry = relay.registry.clone();

    relay.stop().await;

    let next = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("peer was not disconnected");
    assert!(!matches!(
        next,
        Some(Ok(Message::Text(_))) | Some(Ok(Message::Binary(_)))
    ));
    assert!(registry.is_empty().await);
}
