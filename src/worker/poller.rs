//! Per-stream polling loop.
//!
//! A poller owns one stream's cursor store and drives the stream's
//! paginate-until-exhausted cycle:
//!
//! ```text
//!            tick                     has_more = false
//!   Idle ─────────────▶ Draining ──────────────────────▶ Idle
//!                          │
//!                          │ fetch or persist error
//!                          ▼
//!                       Failed (terminal)
//! ```
//!
//! Within a drain, every item of a page is sent to the event channel in page
//! order, then the page's cursor is persisted, and only then is the next page
//! requested. A crash at any point therefore resumes from the last persisted
//! page boundary: items after it are delivered again, none are skipped.
//!
//! A persist error does not undo events already sent and does not stop the
//! drain; it is collected and reported with any fetch error once the drain
//! ends. A fetch error ends the drain immediately.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::api::EventsApi;
use crate::config::StreamSettings;
use crate::normalize::NormalizedEvent;
use crate::persistence::{CursorStore, CursorStoreError};
use crate::types::{Cursor, StreamKind};

use super::message::StreamFailure;
use super::poll::PollSchedule;
use super::status::{PollState, StatusBoard};

/// Separator between errors collected during one drain.
const ERROR_SEPARATOR: &str = ".";

/// Errors that stop a poller.
#[derive(Debug, Error)]
pub enum PollerError {
    /// The persisted cursor could not be read at startup.
    #[error("failed to get {stream} cursor: {source}")]
    InitialCursor {
        stream: StreamKind,
        #[source]
        source: CursorStoreError,
    },

    /// One or more fetch or persist errors in a single drain.
    #[error("{0}")]
    Drain(String),

    /// Shutdown interrupted the poller. Not a failure.
    #[error("cancelled")]
    Cancelled,
}

impl PollerError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PollerError::Cancelled)
    }
}

/// Result type for poller operations.
pub type Result<T> = std::result::Result<T, PollerError>;

/// Drives one stream from its current cursor.
pub struct StreamPoller<A, S> {
    settings: Arc<StreamSettings>,
    api: Arc<A>,
    store: S,
    cursor: Cursor,
    status: StatusBoard,
}

impl<A, S> StreamPoller<A, S>
where
    A: EventsApi,
    S: CursorStore,
{
    /// Creates a poller seeded from the store's last cursor, or from the
    /// configured starting cursor when the store is empty.
    ///
    /// On error the store is handed back so the caller can still close it.
    pub async fn new(
        settings: Arc<StreamSettings>,
        api: Arc<A>,
        mut store: S,
        status: StatusBoard,
    ) -> std::result::Result<Self, (PollerError, S)> {
        let stored = match store.get_value() {
            Ok(value) => value,
            Err(source) => {
                let err = PollerError::InitialCursor {
                    stream: settings.kind,
                    source,
                };
                return Err((err, store));
            }
        };

        let cursor = if stored.is_empty() {
            debug!(stream = %settings.kind, "No stored cursor, using starting cursor");
            settings.starting_cursor.clone()
        } else {
            Cursor::new(stored)
        };
        status.register(settings.kind, cursor.as_str()).await;

        Ok(StreamPoller {
            settings,
            api,
            store,
            cursor,
            status,
        })
    }

    pub fn stream(&self) -> StreamKind {
        self.settings.kind
    }

    /// The cursor the next fetch will use.
    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Gives up the poller without running it.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Runs until cancelled or until a drain fails.
    ///
    /// A failure is sent on `failures` before returning. The store is returned
    /// in every case so the supervisor can close it.
    #[instrument(skip_all, fields(stream = %self.settings.kind))]
    pub async fn run(
        mut self,
        events: mpsc::Sender<NormalizedEvent>,
        failures: mpsc::Sender<StreamFailure>,
        cancel: CancellationToken,
    ) -> S {
        let stream = self.settings.kind;
        let mut ticker = PollSchedule::new(self.settings.sample_frequency).ticker();
        info!(
            interval_ms = self.settings.sample_frequency.as_millis() as u64,
            "Poller started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Shutdown signal received, stopping poller");
                    break;
                }

                _ = ticker.tick() => {
                    self.status.set_state(stream, PollState::Draining).await;
                    match self.drain(&events, &cancel).await {
                        Ok(()) => {
                            self.status.set_state(stream, PollState::Idle).await;
                        }
                        Err(PollerError::Cancelled) => {
                            self.status.set_state(stream, PollState::Idle).await;
                            debug!("Drain interrupted by shutdown");
                            break;
                        }
                        Err(e) => {
                            error!(error = %e, "Poller failed");
                            self.status.record_failure(stream, &e.to_string()).await;
                            if failures.send(StreamFailure { stream, error: e }).await.is_err() {
                                warn!("Supervisor is gone, dropping failure");
                            }
                            break;
                        }
                    }
                }
            }
        }

        info!("Poller stopped");
        self.store
    }

    /// Fetches pages until the API reports no more data.
    pub async fn drain(
        &mut self,
        events: &mpsc::Sender<NormalizedEvent>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let stream = self.settings.kind;
        let mut errors = Vec::new();
        let mut pages = 0u32;

        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PollerError::Cancelled),
                result = self.api.fetch_page(stream, &self.settings.auth_token, &self.cursor) => result,
            };

            let page = match fetched {
                Ok(page) => page,
                Err(e) if e.is_cancelled() => return Err(PollerError::Cancelled),
                Err(e) => {
                    errors.push(format!("failed to fetch {}: {}", stream, e));
                    break;
                }
            };
            pages += 1;

            let item_count = page.items.len();
            for item in &page.items {
                let event = NormalizedEvent::from_raw(stream, item);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PollerError::Cancelled),
                    sent = events.send(event) => {
                        if sent.is_err() {
                            // The receiver only goes away during teardown.
                            return Err(PollerError::Cancelled);
                        }
                    }
                }
            }

            self.cursor = page.next_cursor;
            if let Err(e) = self.store.set_value(self.cursor.as_str()) {
                warn!(error = %e, "Failed to persist cursor");
                errors.push(format!("failed to set {} cursor: {}", stream, e));
            }
            self.status
                .record_page(stream, item_count, self.cursor.as_str())
                .await;

            if !page.has_more {
                break;
            }
        }

        debug!(pages, errors = errors.len(), "Drain finished");
        if errors.is_empty() {
            Ok(())
        } else {
            Err(PollerError::Drain(errors.join(ERROR_SEPARATOR)))
        }
    }
}
