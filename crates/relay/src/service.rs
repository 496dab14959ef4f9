//! Relay service: binds the HTTP and peer listeners and runs them together

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use peerbridge_core::PeerRegistry;

use crate::{PeerListener, RelayConfig, RelayServer, Result, ServiceError};

/// Both relay listeners, bound and ready to serve
pub struct RelayService {
    config: RelayConfig,
    registry: Arc<PeerRegistry>,
    http_listener: TcpListener,
    peer_listener: TcpListener,
}

impl RelayService {
    /// Bind both listeners. Nothing is served until [`RelayService::run`].
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        let http_listener = bind(config.http_addr).await?;
        let peer_listener = bind(config.peer_addr).await?;

        Ok(Self {
            config,
            registry: Arc::new(PeerRegistry::new()),
            http_listener,
            peer_listener,
        })
    }

    /// Address the HTTP listener is bound to
    pub fn http_addr(&self) -> Result<SocketAddr> {
        Ok(self.http_listener.local_addr()?)
    }

    /// Address the peer listener is bound to
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.peer_listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<PeerRegistry> {
        self.registry.clone()
    }

    /// Serve until `shutdown` resolves. Peer sessions are closed on the way
    /// out, which fails any forward request still waiting on them.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let server = Arc::new(RelayServer::new(
            self.registry.clone(),
            self.config.response_timeout,
        ));
        let listener = Arc::new(PeerListener::new(
            self.registry.clone(),
            self.config.peer.clone(),
            shutdown_rx.clone(),
        ));

        let http_app = server
            .router(self.config.max_body_bytes)
            .into_make_service_with_connect_info::<SocketAddr>();
        let peer_app = listener
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        info!("HTTP listener on {}", self.http_addr()?);
        info!("Peer listener on {}", self.peer_addr()?);

        tokio::spawn(async move {
            shutdown.await;
            info!("Relay shutting down");
            let _ = shutdown_tx.send(true);
        });

        let http = axum::serve(self.http_listener, http_app)
            .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));
        let peers = axum::serve(self.peer_listener, peer_app)
            .with_graceful_shutdown(wait_for_shutdown(shutdown_rx));

        let result = tokio::try_join!(
            async move { http.await },
            async move { peers.await },
        );

        self.registry.clear().await;
        result.map(|_| ()).map_err(ServiceError::Io)
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServiceError::Bind { addr, source })
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    loop {
        let stopping = *rx.borrow_and_update();
        if stopping || rx.changed().await.is_err() {
            return;
        }
    }
}
