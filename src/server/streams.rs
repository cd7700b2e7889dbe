//! Read-only view of per-stream polling progress.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use super::AppState;
use crate::types::StreamKind;
use crate::worker::StreamStatus;

/// Errors returned by the stream endpoints.
#[derive(Debug, Error)]
pub enum StreamsError {
    #[error("unknown stream: {0}")]
    UnknownStream(String),

    #[error("stream is not enabled: {0}")]
    NotEnabled(StreamKind),
}

impl IntoResponse for StreamsError {
    fn into_response(self) -> Response {
        (StatusCode::NOT_FOUND, self.to_string()).into_response()
    }
}

/// Lists every enabled stream, keyed by its config section name.
///
/// ```ignore
/// GET /api/v1/streams HTTP/1.1
///
/// HTTP/1.1 200 OK
/// Content-Type: application/json
///
/// {
///   "item_usages": {
///     "state": "idle",
///     "cursor": "{ \"cursor\": \"aGVsbG8\" }",
///     "pages_fetched": 12,
///     "items_emitted": 340,
///     ...
///   }
/// }
/// ```
pub async fn list_streams_handler(
    State(app_state): State<AppState>,
) -> Json<BTreeMap<&'static str, StreamStatus>> {
    let snapshot = app_state.status().snapshot().await;
    Json(
        snapshot
            .into_iter()
            .map(|(kind, status)| (kind.config_key(), status))
            .collect(),
    )
}

/// Returns one stream's status. The path segment is the config section name.
pub async fn stream_handler(
    State(app_state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<StreamStatus>, StreamsError> {
    let kind = StreamKind::ALL
        .into_iter()
        .find(|k| k.config_key() == name)
        .ok_or(StreamsError::UnknownStream(name))?;

    app_state
        .status()
        .get(kind)
        .await
        .map(Json)
        .ok_or(StreamsError::NotEnabled(kind))
}
