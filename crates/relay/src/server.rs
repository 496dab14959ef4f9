//! HTTP-facing endpoint
//!
//! `GET /` is a fixed probe, `POST /` forwards the body to the selected peer
//! and answers with whatever the peer sends back.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use peerbridge_core::{Payload, PeerConnection, PeerRegistry, RelayError, Result};

/// Body returned by `GET /`
pub const STATUS_BODY: &str = "hello";

const CONTENT_TYPE_HTML: &str = "text/html";

/// Forwards HTTP payloads to registered peers
pub struct RelayServer {
    registry: Arc<PeerRegistry>,
    response_timeout: Duration,
}

impl RelayServer {
    pub fn new(registry: Arc<PeerRegistry>, response_timeout: Duration) -> Self {
        Self {
            registry,
            response_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Read-only probe
    pub fn handle_status(&self) -> &'static str {
        STATUS_BODY
    }

    /// Forward a payload to the head-of-registry peer and wait for its answer
    pub async fn handle_forward(&self, payload: Payload) -> Result<Payload> {
        let peer = self.registry.select_peer().await.map_err(|e| {
            warn!("forward rejected: no peer registered");
            e
        })?;
        self.forward_to(&peer, payload).await
    }

    /// Run one exchange against a specific peer.
    ///
    /// Exchanges with the same peer run one at a time. The response timeout
    /// bounds the whole exchange, from waiting for a turn to the answer.
    pub async fn forward_to(&self, peer: &PeerConnection, payload: Payload) -> Result<Payload> {
        let deadline = Instant::now() + self.response_timeout;
        let id = peer.id();

        let turn = tokio::time::timeout_at(deadline, peer.acquire_turn())
            .await
            .map_err(|_| {
                warn!(peer = %id, "timed out waiting for peer to become free");
                RelayError::ResponseTimeout(self.response_timeout)
            })?;
        let exchange = turn.exchange();

        debug!(peer = %id, exchange, bytes = payload.len(), "forwarding payload");
        tokio::time::timeout_at(deadline, peer.send(payload))
            .await
            .map_err(|_| {
                warn!(peer = %id, exchange, "timed out queueing payload, peer is not draining");
                RelayError::ResponseTimeout(self.response_timeout)
            })??;

        let remaining = deadline.saturating_duration_since(Instant::now());
        match peer.await_response(remaining).await {
            Ok(response) => {
                debug!(peer = %id, exchange, bytes = response.len(), "peer responded");
                Ok(response)
            }
            Err(RelayError::ResponseTimeout(_)) => {
                warn!(peer = %id, exchange, timeout = ?self.response_timeout, "peer did not respond in time");
                Err(RelayError::ResponseTimeout(self.response_timeout))
            }
            Err(e) => {
                warn!(peer = %id, exchange, error = %e, "forward failed");
                Err(e)
            }
        }
    }

    /// HTTP routes for this server
    pub fn router(self: Arc<Self>, max_body_bytes: usize) -> Router {
        Router::new()
            .route("/", get(status))
            .route("/", post(forward).layer(middleware::map_response(allow_any_origin)))
            .route("/peers", get(peers))
            .layer(DefaultBodyLimit::max(max_body_bytes))
            .with_state(self)
    }
}

/// A failed forward request, rendered as its gateway status
#[derive(Debug)]
pub struct ForwardFailure(pub RelayError);

impl IntoResponse for ForwardFailure {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.gateway_status().code())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        (
            status,
            [
                (header::CONTENT_TYPE, "text/plain"),
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            ],
            self.0.to_string(),
        )
            .into_response()
    }
}

async fn status(State(server): State<Arc<RelayServer>>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, CONTENT_TYPE_HTML)], server.handle_status())
}

async fn forward(State(server): State<Arc<RelayServer>>, body: Bytes) -> Response {
    match server.handle_forward(body).await {
        Ok(response) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, CONTENT_TYPE_HTML)],
            response,
        )
            .into_response(),
        Err(e) => {
            info!(error = %e, "forward request failed");
            ForwardFailure(e).into_response()
        }
    }
}

/// Applied to `POST /` so extractor rejections carry the header too
async fn allow_any_origin(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

async fn peers(State(server): State<Arc<RelayServer>>) -> impl IntoResponse {
    Json(server.registry.summaries().await)
}
