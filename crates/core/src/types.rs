//! Peer identity and lifecycle types

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique handle for one peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(u64);

impl PeerId {
    /// Allocate the next identifier. Never reused within a process.
    pub fn next() -> Self {
        Self(NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for PeerId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Peer connection lifecycle: `Connecting -> Open -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PeerState {
    /// Transport accepted, not yet registered
    Connecting = 0,
    /// Registered and able to take requests
    Open = 1,
    /// Transport closed or failed
    Closed = 2,
}

impl PeerState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            _ => Self::Closed,
        }
    }
}

/// Snapshot of a registered peer, as reported by the peer inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    pub id: PeerId,
    /// Remote socket address, if the transport reported one
    pub remote_addr: Option<String>,
    pub state: PeerState,
    /// Seconds since the connection was accepted
    pub connected_secs: u64,
}
