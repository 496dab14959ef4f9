//! PeerBridge Core Types
//!
//! Peer bookkeeping for the bridge relay: the registry of connected peers,
//! the per-peer response slot, and the error taxonomy shared by the HTTP
//! and peer-facing sides. Nothing in this crate touches the network.

mod connection;
mod error;
mod registry;
mod types;

pub use connection::{Outbound, PeerConnection, RequestTurn};
pub use error::*;
pub use registry::PeerRegistry;
pub use types::*;

/// Opaque payload carried between HTTP callers and peers
pub type Payload = bytes::Bytes;
