//! Shared per-stream status, read by the status server.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::types::StreamKind;

/// Where a poller is in its tick cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollState {
    /// Waiting for the next tick.
    Idle,
    /// Fetching pages.
    Draining,
    /// Stopped after an error. Terminal.
    Failed,
}

/// Snapshot of one stream's progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStatus {
    pub state: PollState,
    /// Cursor the next fetch will use.
    pub cursor: String,
    pub pages_fetched: u64,
    pub items_emitted: u64,
    pub last_drained_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl StreamStatus {
    fn new(cursor: &str) -> Self {
        StreamStatus {
            state: PollState::Idle,
            cursor: cursor.to_string(),
            pages_fetched: 0,
            items_emitted: 0,
            last_drained_at: None,
            last_error: None,
        }
    }
}

/// Status of every running stream, shared between pollers and readers.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<BTreeMap<StreamKind, StreamStatus>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `stream` in the idle state.
    pub async fn register(&self, stream: StreamKind, cursor: &str) {
        self.inner
            .write()
            .await
            .insert(stream, StreamStatus::new(cursor));
    }

    pub async fn set_state(&self, stream: StreamKind, state: PollState) {
        if let Some(status) = self.inner.write().await.get_mut(&stream) {
            status.state = state;
            if state == PollState::Idle {
                status.last_drained_at = Some(Utc::now());
            }
        }
    }

    /// Records one fetched page and the cursor persisted after it.
    pub async fn record_page(&self, stream: StreamKind, items: usize, cursor: &str) {
        if let Some(status) = self.inner.write().await.get_mut(&stream) {
            status.pages_fetched += 1;
            status.items_emitted += items as u64;
            status.cursor = cursor.to_string();
        }
    }

    /// Marks `stream` as failed with `error`.
    pub async fn record_failure(&self, stream: StreamKind, error: &str) {
        if let Some(status) = self.inner.write().await.get_mut(&stream) {
            status.state = PollState::Failed;
            status.last_error = Some(error.to_string());
        }
    }

    pub async fn get(&self, stream: StreamKind) -> Option<StreamStatus> {
        self.inner.read().await.get(&stream).cloned()
    }

    /// Copies the status of every stream.
    pub async fn snapshot(&self) -> BTreeMap<StreamKind, StreamStatus> {
        self.inner.read().await.clone()
    }
}
