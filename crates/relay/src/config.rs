//! Runtime configuration for the relay listeners

use std::net::SocketAddr;
use std::time::Duration;

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// HTTP listener address
    pub http_addr: SocketAddr,
    /// Peer listener address
    pub peer_addr: SocketAddr,
    /// Upper bound on one forward request, queueing included
    pub response_timeout: Duration,
    /// Maximum POST body size (bytes)
    pub max_body_bytes: usize,
    /// Per-peer session settings
    pub peer: PeerSessionConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            peer_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            response_timeout: Duration::from_secs(30),
            max_body_bytes: 10 * 1024 * 1024, // 10 MB
            peer: PeerSessionConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Both listeners on ephemeral loopback ports
    pub fn loopback() -> Self {
        Self {
            http_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            peer_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Self::default()
        }
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }
}

/// Per-peer session settings
#[derive(Debug, Clone)]
pub struct PeerSessionConfig {
    /// Maximum inbound message size (bytes)
    pub max_message_bytes: usize,
    /// Ping interval, `None` disables pings
    pub keepalive: Option<Duration>,
    /// Outbound payloads queued before `send` waits
    pub outbound_buffer: usize,
}

impl Default for PeerSessionConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: 10 * 1024 * 1024, // 10 MB
            keepalive: Some(Duration::from_secs(30)),
            outbound_buffer: 16,
        }
    }
}
