//! Registry of connected peers
//!
//! Ordered by connection time. Selection always picks the oldest peer that
//! is still registered.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{PeerConnection, PeerId, PeerSummary, RelayError, Result};

/// Process-wide set of peers available for selection
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: RwLock<Vec<Arc<PeerConnection>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a peer. Registering the same peer twice is a no-op.
    pub async fn register(&self, peer: Arc<PeerConnection>) {
        let mut peers = self.peers.write().await;
        if peers.iter().any(|p| p.id() == peer.id()) {
            debug!(peer = %peer.id(), "peer already registered");
            return;
        }

        info!(peer = %peer.id(), total = peers.len() + 1, "peer registered");
        peers.push(peer);
    }

    /// Remove a peer, returning it if it was registered
    pub async fn unregister(&self, id: PeerId) -> Option<Arc<PeerConnection>> {
        let mut peers = self.peers.write().await;
        let index = peers.iter().position(|p| p.id() == id)?;
        let removed = peers.remove(index);

        info!(peer = %id, total = peers.len(), "peer unregistered");
        Some(removed)
    }

    /// Head of the sequence. The peer stays registered.
    pub async fn select_peer(&self) -> Result<Arc<PeerConnection>> {
        self.peers
            .read()
            .await
            .first()
            .cloned()
            .ok_or(RelayError::NoPeerAvailable)
    }

    pub async fn get(&self, id: PeerId) -> Option<Arc<PeerConnection>> {
        self.peers.read().await.iter().find(|p| p.id() == id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Summaries in selection order
    pub async fn summaries(&self) -> Vec<PeerSummary> {
        self.peers.read().await.iter().map(|p| p.summary()).collect()
    }

    /// Close and drop every registered peer
    pub async fn clear(&self) {
        let drained: Vec<_> = self.peers.write().await.drain(..).collect();
        for peer in drained {
            peer.close();
        }
    }
}
