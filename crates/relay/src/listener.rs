//! Peer-facing WebSocket endpoint
//!
//! Every accepted socket becomes a `PeerConnection` in the registry for as
//! long as the socket stays up. Each WebSocket message from the peer is one
//! response payload; each forwarded payload is written as one message.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use axum::Router;
use bytes::Bytes;
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use peerbridge_core::{Payload, PeerConnection, PeerId, PeerRegistry};

use crate::PeerSessionConfig;

/// Accepts peer connections and binds them into the registry
pub struct PeerListener {
    registry: Arc<PeerRegistry>,
    config: PeerSessionConfig,
    shutdown: watch::Receiver<bool>,
}

impl PeerListener {
    pub fn new(
        registry: Arc<PeerRegistry>,
        config: PeerSessionConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            registry,
            config,
            shutdown,
        }
    }

    /// Routes for the peer listener. Any path upgrades to a peer session.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new().fallback(upgrade_peer).with_state(self)
    }

    /// Drive one peer session until the socket closes or the relay shuts down
    pub async fn run_session(self: Arc<Self>, socket: WebSocket, addr: SocketAddr) {
        let (peer, mut outbound) =
            PeerConnection::channel(Some(addr), self.config.outbound_buffer);
        let peer = Arc::new(peer);
        let id = peer.id();

        let mut shutdown = self.shutdown.clone();
        let shutting_down = *shutdown.borrow_and_update();
        if shutting_down {
            debug!(peer = %id, "rejecting peer during shutdown");
            return;
        }

        let (mut ws_tx, mut ws_rx) = socket.split();
        peer.mark_open();
        self.registry.register(peer.clone()).await;
        info!(peer = %id, addr = %addr, "peer connected");

        let write_limit = self.config.keepalive;
        let mut keepalive = self.config.keepalive.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        let mut awaiting_pong = false;

        let reason = loop {
            tokio::select! {
                inbound = ws_rx.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        awaiting_pong = false;
                        debug!(peer = %id, bytes = text.as_str().len(), "text message from peer");
                        peer.deliver_inbound(Bytes::copy_from_slice(text.as_str().as_bytes())).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        awaiting_pong = false;
                        debug!(peer = %id, bytes = data.len(), "binary message from peer");
                        peer.deliver_inbound(data).await;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break "closed by peer",
                    Some(Err(e)) => {
                        warn!(peer = %id, error = %e, "peer read error");
                        break "read error";
                    }
                },

                queued = outbound.recv() => match queued {
                    Some(queued) => {
                        if let Some(payload) = peer.begin_write(queued).await {
                            if let Err(reason) = write_frame(&mut ws_tx, id, frame_for(payload), write_limit).await {
                                break reason;
                            }
                        }
                    }
                    None => break "outbound channel closed",
                },

                _ = next_tick(&mut keepalive) => {
                    if awaiting_pong {
                        warn!(peer = %id, "no pong within a keepalive period");
                        break "keepalive timed out";
                    }
                    if let Err(reason) = write_frame(&mut ws_tx, id, Message::Ping(Bytes::new()), write_limit).await {
                        break reason;
                    }
                    awaiting_pong = true;
                }

                _ = shutdown.changed() => {
                    let _ = write_frame(&mut ws_tx, id, Message::Close(None), write_limit).await;
                    break "relay shutting down";
                }
            }
        };

        peer.close();
        self.registry.unregister(id).await;
        info!(peer = %id, addr = %addr, reason, "peer disconnected");
    }
}

async fn upgrade_peer(
    State(listener): State<Arc<PeerListener>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let max = listener.config.max_message_bytes;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_failed_upgrade(move |e| warn!(addr = %addr, error = %e, "peer upgrade failed"))
        .on_upgrade(move |socket| listener.run_session(socket, addr))
}

/// Write one frame. With keepalive on, a write that takes longer than one
/// keepalive period means the peer stopped reading.
async fn write_frame<S>(
    sink: &mut S,
    id: PeerId,
    frame: Message,
    limit: Option<Duration>,
) -> Result<(), &'static str>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let written = match limit {
        Some(limit) => match tokio::time::timeout(limit, sink.send(frame)).await {
            Ok(written) => written,
            Err(_) => {
                warn!(peer = %id, ?limit, "peer write stalled");
                return Err("write stalled");
            }
        },
        None => sink.send(frame).await,
    };

    written.map_err(|e| {
        warn!(peer = %id, error = %e, "peer write error");
        "write error"
    })
}

/// Text frame when the payload is UTF-8, binary frame otherwise
fn frame_for(payload: Payload) -> Message {
    match String::from_utf8(payload.to_vec()) {
        Ok(text) => Message::Text(text.into()),
        Err(_) => Message::Binary(payload),
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
