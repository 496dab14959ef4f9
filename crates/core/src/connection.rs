//! Per-peer session state
//!
//! A `PeerConnection` owns the outbound half of one peer's transport and a
//! single response slot. The transport task fills the slot with
//! [`PeerConnection::deliver_inbound`]; a forward request drains it with
//! [`PeerConnection::await_response`].
//!
//! Every request turn is a numbered exchange. Peers answer in the order
//! they were written to, so each inbound message is matched against the
//! oldest exchange still waiting for a reply. Replies to exchanges that
//! already gave up are dropped, as are payloads that were still queued
//! when their exchange ended.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex, MutexGuard, Notify};
use tracing::{debug, warn};

use crate::{Payload, PeerId, PeerState, PeerSummary, RelayError, Result};

/// No exchange in progress
const IDLE: u64 = 0;

/// Exclusive right to run one request/response exchange against a peer.
///
/// Held for the whole exchange; dropping it ends the exchange and lets the
/// next queued request in.
pub struct RequestTurn<'a> {
    exchange: u64,
    current: &'a AtomicU64,
    _guard: MutexGuard<'a, ()>,
}

impl RequestTurn<'_> {
    pub fn exchange(&self) -> u64 {
        self.exchange
    }
}

impl Drop for RequestTurn<'_> {
    fn drop(&mut self) {
        let _ = self.current.compare_exchange(
            self.exchange,
            IDLE,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// A payload queued for the peer, tagged with the exchange that sent it
#[derive(Debug, Clone)]
pub struct Outbound {
    exchange: u64,
    payload: Payload,
}

impl Outbound {
    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}

#[derive(Debug, Default)]
struct ResponseSlot {
    pending: Option<Payload>,
    /// Exchanges written to the peer and not answered yet, oldest first
    awaiting_reply: VecDeque<u64>,
}

/// One connected peer
pub struct PeerConnection {
    id: PeerId,
    remote_addr: Option<SocketAddr>,
    connected_at: Instant,
    state: AtomicU8,
    outbound: mpsc::Sender<Outbound>,
    slot: Mutex<ResponseSlot>,
    response_ready: Notify,
    turn: Mutex<()>,
    current_exchange: AtomicU64,
    next_exchange: AtomicU64,
}

impl PeerConnection {
    /// Create a connection around an existing outbound sender
    pub fn new(remote_addr: Option<SocketAddr>, outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            id: PeerId::next(),
            remote_addr,
            connected_at: Instant::now(),
            state: AtomicU8::new(PeerState::Connecting as u8),
            outbound,
            slot: Mutex::new(ResponseSlot::default()),
            response_ready: Notify::new(),
            turn: Mutex::new(()),
            current_exchange: AtomicU64::new(IDLE),
            next_exchange: AtomicU64::new(IDLE + 1),
        }
    }

    /// Create a connection together with the receiver the transport drains
    /// to write payloads to the peer
    pub fn channel(
        remote_addr: Option<SocketAddr>,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(remote_addr, tx), rx)
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn state(&self) -> PeerState {
        PeerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == PeerState::Open
    }

    /// Move `Connecting -> Open`. A closed connection stays closed.
    pub fn mark_open(&self) -> bool {
        self.state
            .compare_exchange(
                PeerState::Connecting as u8,
                PeerState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to `Closed` and wake anyone waiting for a response
    pub fn close(&self) {
        let previous = self.state.swap(PeerState::Closed as u8, Ordering::AcqRel);
        if previous != PeerState::Closed as u8 {
            debug!(peer = %self.id, "peer connection closed");
        }
        self.response_ready.notify_waiters();
    }

    /// Queue a payload for delivery to the peer, on behalf of the current
    /// exchange
    pub async fn send(&self, payload: Payload) -> Result<()> {
        if !self.is_open() {
            return Err(RelayError::ConnectionLost(format!("{} is not open", self.id)));
        }

        let len = payload.len();
        let outbound = Outbound {
            exchange: self.current_exchange.load(Ordering::Acquire),
            payload,
        };
        self.outbound
            .send(outbound)
            .await
            .map_err(|_| RelayError::ConnectionLost(format!("{} transport closed", self.id)))?;

        debug!(peer = %self.id, bytes = len, "payload queued for peer");
        Ok(())
    }

    /// Called by the transport right before it writes a queued payload.
    ///
    /// Returns `None` when the exchange that queued the payload has already
    /// ended; the payload must not be written then.
    pub async fn begin_write(&self, outbound: Outbound) -> Option<Payload> {
        let mut slot = self.slot.lock().await;
        if outbound.exchange != self.current_exchange.load(Ordering::Acquire) {
            debug!(
                peer = %self.id,
                exchange = outbound.exchange,
                "dropping payload of an abandoned exchange"
            );
            return None;
        }
        slot.awaiting_reply.push_back(outbound.exchange);
        Some(outbound.payload)
    }

    /// Deposit a payload received from the peer. Last write wins.
    ///
    /// A reply to an exchange that has already ended is dropped, and so is
    /// a message that arrives while the current exchange has not been
    /// written yet.
    pub async fn deliver_inbound(&self, payload: Payload) {
        {
            let mut slot = self.slot.lock().await;
            let current = self.current_exchange.load(Ordering::Acquire);
            let answers = slot.awaiting_reply.pop_front();

            let accepted = match answers {
                Some(exchange) => exchange == current,
                None => current == IDLE,
            };
            if !accepted {
                warn!(
                    peer = %self.id,
                    bytes = payload.len(),
                    answers = ?answers,
                    current,
                    "dropping late response"
                );
                return;
            }

            if slot.pending.is_some() {
                warn!(peer = %self.id, "overwriting unread response");
            }
            slot.pending = Some(payload);
        }
        self.response_ready.notify_waiters();
    }

    /// Wait until a response is deposited, then take it out of the slot.
    ///
    /// Fails with `ConnectionLost` if the connection closes first and with
    /// `ResponseTimeout` once `timeout` elapses. A response that was
    /// deposited before the close is still returned.
    pub async fn await_response(&self, timeout: Duration) -> Result<Payload> {
        tokio::time::timeout(timeout, self.wait_for_response())
            .await
            .map_err(|_| RelayError::ResponseTimeout(timeout))?
    }

    async fn wait_for_response(&self) -> Result<Payload> {
        loop {
            let notified = self.response_ready.notified();
            tokio::pin!(notified);
            // Register before checking so a deposit in between is not missed
            notified.as_mut().enable();

            if let Some(payload) = self.take_pending().await {
                return Ok(payload);
            }
            if self.state() == PeerState::Closed {
                return Err(RelayError::ConnectionLost(format!(
                    "{} disconnected before responding",
                    self.id
                )));
            }

            notified.await;
        }
    }

    /// Atomically read and clear the response slot
    pub async fn take_pending(&self) -> Option<Payload> {
        self.slot.lock().await.pending.take()
    }

    /// Wait for this peer to be free, then start a new exchange.
    ///
    /// Anything still sitting in the response slot is discarded first.
    pub async fn acquire_turn(&self) -> RequestTurn<'_> {
        let guard = self.turn.lock().await;
        let exchange = self.next_exchange.fetch_add(1, Ordering::Relaxed);

        let mut slot = self.slot.lock().await;
        self.current_exchange.store(exchange, Ordering::Release);
        if let Some(stale) = slot.pending.take() {
            warn!(peer = %self.id, bytes = stale.len(), "discarding stale response");
        }
        drop(slot);

        RequestTurn {
            exchange,
            current: &self.current_exchange,
            _guard: guard,
        }
    }

    pub fn summary(&self) -> PeerSummary {
        PeerSummary {
            id: self.id,
            remote_addr: self.remote_addr.map(|addr| addr.to_string()),
            state: self.state(),
            connected_secs: self.connected_at.elapsed().as_secs(),
        }
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("state", &self.state())
            .finish()
    }
}
