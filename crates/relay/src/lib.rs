//! PeerBridge Relay
//!
//! Couples one-shot HTTP requests to long-lived peer connections. A `POST /`
//! body is forwarded to the oldest connected peer and the caller is held
//! until that peer answers.
//!
//! ## Components
//!
//! - **RelayServer**: HTTP endpoint (`GET /`, `POST /`, `GET /peers`)
//! - **PeerListener**: WebSocket endpoint peers connect to
//! - **RelayService**: binds both listeners and runs them until shutdown

mod config;
mod listener;
mod server;
mod service;

pub use config::{PeerSessionConfig, RelayConfig};
pub use listener::PeerListener;
pub use server::{ForwardFailure, RelayServer, STATUS_BODY};
pub use service::RelayService;

use std::net::SocketAddr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
