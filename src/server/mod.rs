//! Optional HTTP status server.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns 200 if the agent is running
//! - `GET /api/v1/streams` - Returns the status of every enabled stream
//! - `GET /api/v1/streams/{stream}` - Returns one stream's status

use std::net::SocketAddr;

use axum::http::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub mod streams;

pub use streams::{list_streams_handler, stream_handler};

use crate::worker::StatusBoard;

/// Shared application state, passed to handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    status: StatusBoard,
}

impl AppState {
    pub fn new(status: StatusBoard) -> Self {
        AppState { status }
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }
}

/// Liveness probe. Answers while the process is up, whatever the streams' state.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/streams", get(list_streams_handler))
        .route("/api/v1/streams/{stream}", get(stream_handler))
        .with_state(app_state)
}

/// Serves the status endpoints on `addr` until `shutdown` fires.
pub async fn serve(
    addr: SocketAddr,
    status: StatusBoard,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Status server listening");

    axum::serve(listener, build_router(AppState::new(status)))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
