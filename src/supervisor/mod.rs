//! Stream supervisor.
//!
//! The supervisor owns the agent's run: it checks every enabled stream's
//! token before anything starts, opens the cursor stores, spawns one poller
//! task per stream and then forwards events to the publisher until shutdown
//! or the first stream failure.
//!
//! # Startup order
//!
//! 1. Decode each token and require the stream's feature scope. A missing
//!    scope fails the run before any store is opened or any fetch is made.
//! 2. Optionally introspect each token and log what the API reports.
//! 3. Open every cursor store and seed every poller.
//! 4. Spawn the pollers.
//!
//! # Teardown
//!
//! Pollers are cancelled through a child token and joined. Events they queued
//! before stopping are then published, since their cursors are already on
//! disk. Each poller returns its store, which is then closed; close errors are
//! logged and do not change the run's result. The publisher is closed last.

use std::sync::Arc;

use secrecy::ExposeSecret;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::api::{ClaimsError, EventsApi, TokenClaims};
use crate::config::{AgentConfig, StreamSettings};
use crate::normalize::NormalizedEvent;
use crate::persistence::{CursorStore, CursorStoreError, HistoryFileStore};
use crate::publish::{PublishError, Publisher};
use crate::types::StreamKind;
use crate::worker::{PollerError, StatusBoard, StreamPoller};

/// Capacity of the shared event channel. A slow publisher blocks pollers
/// once this many events are queued.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Errors that end a supervisor run.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A token could not be decoded.
    #[error("invalid {stream} token: {source}")]
    InvalidToken {
        stream: StreamKind,
        #[source]
        source: ClaimsError,
    },

    /// A token lacks the feature scope its stream needs.
    #[error("{stream} token does not have the {scope} feature")]
    MissingScope {
        stream: StreamKind,
        scope: &'static str,
    },

    /// A cursor store could not be opened.
    #[error("failed to open {stream} cursor file: {source}")]
    OpenStore {
        stream: StreamKind,
        #[source]
        source: CursorStoreError,
    },

    /// A poller stopped with an error.
    #[error("failed when processing {stream}: {source}")]
    Stream {
        stream: StreamKind,
        #[source]
        source: PollerError,
    },

    /// The publisher rejected an event.
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Result type for supervisor runs.
pub type Result<T> = std::result::Result<T, SupervisorError>;

type PollerHandle = (StreamKind, JoinHandle<HistoryFileStore>);

/// Runs every enabled stream against one API client and one publisher.
pub struct Supervisor<A, P> {
    config: Arc<AgentConfig>,
    api: Arc<A>,
    publisher: P,
    status: StatusBoard,
}

impl<A, P> Supervisor<A, P>
where
    A: EventsApi + 'static,
    P: Publisher,
{
    pub fn new(config: Arc<AgentConfig>, api: Arc<A>, publisher: P) -> Self {
        Supervisor {
            config,
            api,
            publisher,
            status: StatusBoard::new(),
        }
    }

    /// The status board pollers report to. Clone it before calling `run`.
    pub fn status(&self) -> StatusBoard {
        self.status.clone()
    }

    /// Runs until `cancel` fires (returning `Ok`) or a stream fails.
    #[instrument(skip_all)]
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        for settings in &self.config.streams {
            check_scope(settings)?;
        }

        if self.config.introspect_on_start {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = self.introspect_all() => {}
            }
        }

        let pollers = self.open_pollers().await?;

        let (events_tx, mut events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (failures_tx, mut failures_rx) = mpsc::channel(pollers.len().max(1));
        let child = cancel.child_token();

        let mut handles: Vec<PollerHandle> = Vec::with_capacity(pollers.len());
        for poller in pollers {
            let stream = poller.stream();
            info!(%stream, "Starting poller");
            let task = poller.run(events_tx.clone(), failures_tx.clone(), child.clone());
            handles.push((stream, tokio::spawn(task)));
        }
        drop(events_tx);
        drop(failures_tx);

        let mut result = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Shutdown signal received, stopping streams");
                    break Ok(());
                }

                Some(failure) = failures_rx.recv() => {
                    break Err(SupervisorError::Stream {
                        stream: failure.stream,
                        source: failure.error,
                    });
                }

                event = events_rx.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.publisher.publish(event).await {
                            break Err(e.into());
                        }
                    }
                    None => {
                        debug!("All pollers exited");
                        break Ok(());
                    }
                }
            }
        };

        child.cancel();
        let stores = join_pollers(handles).await;

        // Queued events are already covered by persisted cursors.
        if !matches!(result, Err(SupervisorError::Publish(_)))
            && let Err(e) = self.publish_pending(&mut events_rx).await
        {
            if result.is_ok() {
                result = Err(e);
            } else {
                error!(error = %e, "Failed to publish pending events");
            }
        }

        for (stream, store) in stores {
            close_store(stream, store);
        }
        if let Err(e) = self.publisher.close().await {
            error!(error = %e, "Failed to close publisher");
        }

        if let Err(e) = &result {
            error!(error = %e, "Supervisor stopped with error");
        }
        result
    }

    /// Publishes whatever is still queued once every poller has stopped.
    async fn publish_pending(
        &mut self,
        events_rx: &mut mpsc::Receiver<NormalizedEvent>,
    ) -> Result<()> {
        let mut pending = 0usize;
        while let Some(event) = events_rx.recv().await {
            self.publisher.publish(event).await?;
            pending += 1;
        }
        if pending > 0 {
            info!(pending, "Published events queued before shutdown");
        }
        Ok(())
    }

    async fn introspect_all(&self) {
        for settings in &self.config.streams {
            match self.api.introspect(&settings.auth_token).await {
                Ok(info) => info!(
                    stream = %settings.kind,
                    token_uuid = %info.uuid,
                    issued_at = %info.issued_at,
                    features = ?info.features,
                    "Token introspected"
                ),
                Err(e) => warn!(stream = %settings.kind, error = %e, "Token introspection failed"),
            }
        }
    }

    /// Opens every store and seeds every poller, closing whatever was opened
    /// if any step fails.
    async fn open_pollers(&self) -> Result<Vec<StreamPoller<A, HistoryFileStore>>> {
        let mut pollers = Vec::with_capacity(self.config.streams.len());

        for settings in &self.config.streams {
            let opened = HistoryFileStore::open(&settings.cursor_state_file)
                .map_err(|source| SupervisorError::OpenStore {
                    stream: settings.kind,
                    source,
                });
            let store = match opened {
                Ok(store) => store,
                Err(e) => {
                    close_unstarted(pollers);
                    return Err(e);
                }
            };

            let seeded = StreamPoller::new(
                Arc::clone(settings),
                Arc::clone(&self.api),
                store,
                self.status.clone(),
            )
            .await;
            match seeded {
                Ok(poller) => pollers.push(poller),
                Err((source, store)) => {
                    close_store(settings.kind, store);
                    close_unstarted(pollers);
                    return Err(SupervisorError::Stream {
                        stream: settings.kind,
                        source,
                    });
                }
            }
        }

        Ok(pollers)
    }
}

/// Requires the stream's feature scope in its token.
pub fn check_scope(settings: &StreamSettings) -> Result<()> {
    let stream = settings.kind;
    let claims = TokenClaims::decode(settings.auth_token.expose_secret())
        .map_err(|source| SupervisorError::InvalidToken { stream, source })?;

    let scope = stream.feature_scope();
    if !claims.has_feature(scope) {
        return Err(SupervisorError::MissingScope { stream, scope });
    }
    Ok(())
}

/// Waits for every poller to stop. Once this returns, no sender to the event
/// channel is left, so draining it terminates.
async fn join_pollers(handles: Vec<PollerHandle>) -> Vec<(StreamKind, HistoryFileStore)> {
    let mut stores = Vec::with_capacity(handles.len());
    for (stream, handle) in handles {
        match handle.await {
            Ok(store) => stores.push((stream, store)),
            Err(e) => error!(%stream, error = %e, "Poller task panicked"),
        }
    }
    stores
}

fn close_unstarted<A: EventsApi>(pollers: Vec<StreamPoller<A, HistoryFileStore>>) {
    for poller in pollers {
        let stream = poller.stream();
        close_store(stream, poller.into_store());
    }
}

fn close_store<S: CursorStore>(stream: StreamKind, store: S) {
    if let Err(e) = store.close() {
        error!(%stream, error = %e, "Failed to close cursor store");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, encode_test_token};
    use crate::test_utils::{CollectingPublisher, ScriptedApi, page};
    use serde_json::json;
    use std::path::Path;
    use std::time::Duration;

    fn token(scopes: &[&str]) -> String {
        encode_test_token(
            &json!({"alg": "ES256", "typ": "JWT"}),
            &json!({"aud": ["events.example.com"], "1password.com/fts": scopes}),
        )
    }

    fn stream(kind: StreamKind, token: String, dir: &Path) -> Arc<StreamSettings> {
        let mut settings = StreamSettings::with_defaults(kind, token);
        settings.cursor_state_file = dir.join(format!("{}.state", kind.event_type()));
        Arc::new(settings)
    }

    fn config(streams: Vec<Arc<StreamSettings>>) -> Arc<AgentConfig> {
        Arc::new(AgentConfig {
            api_host: None,
            insecure_skip_verify: false,
            introspect_on_start: false,
            status_addr: None,
            output: None,
            streams,
        })
    }

    // ─── Scope gating ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn missing_scope_fails_before_anything_starts() {
        let dir = tempfile::tempdir().unwrap();
        let signin = stream(
            StreamKind::SignInAttempts,
            token(&["signinattempts"]),
            dir.path(),
        );
        let usages = stream(StreamKind::ItemUsages, token(&["signinattempts"]), dir.path());
        let api = ScriptedApi::new();
        let publisher = CollectingPublisher::new();

        let err = Supervisor::new(
            config(vec![signin.clone(), usages.clone()]),
            Arc::new(api.clone()),
            publisher.clone(),
        )
        .run(CancellationToken::new())
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            SupervisorError::MissingScope {
                stream: StreamKind::ItemUsages,
                scope: "itemusages"
            }
        ));
        assert_eq!(
            err.to_string(),
            "item usages token does not have the itemusages feature"
        );
        assert!(api.calls().is_empty());
        assert!(!signin.cursor_state_file.exists());
        assert!(!usages.cursor_state_file.exists());
    }

    #[tokio::test]
    async fn undecodable_token_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let settings = stream(StreamKind::AuditEvents, "not-a-jwt".to_string(), dir.path());

        let err = Supervisor::new(
            config(vec![settings]),
            Arc::new(ScriptedApi::new()),
            CollectingPublisher::new(),
        )
        .run(CancellationToken::new())
        .await
        .unwrap_err();

        assert!(matches!(err, SupervisorError::InvalidToken { .. }));
    }

    #[test]
    fn check_scope_accepts_granted_feature() {
        let dir = tempfile::tempdir().unwrap();
        let settings = stream(
            StreamKind::AuditEvents,
            token(&["itemusages", "auditevents"]),
            dir.path(),
        );
        assert!(check_scope(&settings).is_ok());
    }

    // ─── Running ──────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn forwards_events_and_closes_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let settings = stream(StreamKind::ItemUsages, token(&["itemusages"]), dir.path());
        let api = ScriptedApi::new();
        api.push(StreamKind::ItemUsages, Ok(page(&["e1", "e2"], "A", true)));
        api.push(StreamKind::ItemUsages, Ok(page(&["e3"], "B", false)));
        let publisher = CollectingPublisher::new();
        let cancel = CancellationToken::new();

        let supervisor = Supervisor::new(
            config(vec![settings.clone()]),
            Arc::new(api.clone()),
            publisher.clone(),
        );
        let status = supervisor.status();
        let handle = tokio::spawn(supervisor.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(15)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(publisher.actions(), vec!["e1", "e2", "e3"]);
        assert!(publisher.is_closed());
        let content = std::fs::read_to_string(&settings.cursor_state_file).unwrap();
        assert_eq!(content.lines().last(), Some(r#"{ "cursor": "B" }"#));
        let snapshot = status.get(StreamKind::ItemUsages).await.unwrap();
        assert_eq!(snapshot.items_emitted, 3);
    }

    fn last_persisted(settings: &StreamSettings) -> Option<String> {
        std::fs::read_to_string(&settings.cursor_state_file)
            .ok()?
            .lines()
            .last()
            .map(str::to_string)
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_publishes_events_queued_behind_persisted_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let settings = stream(StreamKind::ItemUsages, token(&["itemusages"]), dir.path());
        let api = ScriptedApi::new();
        api.push(
            StreamKind::ItemUsages,
            Ok(page(&["e1", "e2", "e3", "e4", "e5"], "B", false)),
        );
        let publisher = CollectingPublisher::slow(Duration::from_secs(1));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            Supervisor::new(
                config(vec![settings.clone()]),
                Arc::new(api),
                publisher.clone(),
            )
            .run(cancel.clone()),
        );
        // First tick at 10s queues all five events; only one is published
        // by the time shutdown is requested.
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(
            last_persisted(&settings).as_deref(),
            Some(r#"{ "cursor": "B" }"#)
        );
        assert_eq!(publisher.actions(), vec!["e1", "e2", "e3", "e4", "e5"]);
        assert!(publisher.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn stream_failure_still_publishes_other_streams_queued_events() {
        let dir = tempfile::tempdir().unwrap();
        let usages = stream(StreamKind::ItemUsages, token(&["itemusages"]), dir.path());
        let mut signin = (*stream(
            StreamKind::SignInAttempts,
            token(&["signinattempts"]),
            dir.path(),
        ))
        .clone();
        signin.sample_frequency = Duration::from_secs(12);
        let api = ScriptedApi::new();
        api.push(
            StreamKind::ItemUsages,
            Ok(page(&["e1", "e2", "e3", "e4", "e5"], "B", false)),
        );
        api.push(
            StreamKind::SignInAttempts,
            Err(ApiError::from_status(401, "token revoked")),
        );
        let publisher = CollectingPublisher::slow(Duration::from_secs(1));

        // Item usages queue their page at 10s; sign-in attempts fail at 12s
        // while the publisher is still working through that page.
        let err = Supervisor::new(
            config(vec![Arc::new(signin), usages.clone()]),
            Arc::new(api),
            publisher.clone(),
        )
        .run(CancellationToken::new())
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            SupervisorError::Stream {
                stream: StreamKind::SignInAttempts,
                ..
            }
        ));
        assert_eq!(
            last_persisted(&usages).as_deref(),
            Some(r#"{ "cursor": "B" }"#)
        );
        assert_eq!(publisher.actions(), vec!["e1", "e2", "e3", "e4", "e5"]);
        assert!(publisher.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn resumes_from_persisted_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let settings = stream(StreamKind::ItemUsages, token(&["itemusages"]), dir.path());
        std::fs::write(&settings.cursor_state_file, "{ \"cursor\": \"old\" }\n").unwrap();
        let api = ScriptedApi::new();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            Supervisor::new(
                config(vec![settings]),
                Arc::new(api.clone()),
                CollectingPublisher::new(),
            )
            .run(cancel.clone()),
        );
        tokio::time::sleep(Duration::from_secs(11)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(api.calls()[0].1.as_str(), r#"{ "cursor": "old" }"#);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_failure_ends_run() {
        let dir = tempfile::tempdir().unwrap();
        let signin = stream(
            StreamKind::SignInAttempts,
            token(&["signinattempts"]),
            dir.path(),
        );
        let usages = stream(StreamKind::ItemUsages, token(&["itemusages"]), dir.path());
        let api = ScriptedApi::new();
        api.push(StreamKind::SignInAttempts, Ok(page(&["s1"], "S", false)));
        api.push(
            StreamKind::ItemUsages,
            Err(ApiError::from_status(401, "token revoked")),
        );
        let publisher = CollectingPublisher::new();

        let err = Supervisor::new(
            config(vec![signin, usages.clone()]),
            Arc::new(api),
            publisher.clone(),
        )
        .run(CancellationToken::new())
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            SupervisorError::Stream {
                stream: StreamKind::ItemUsages,
                ..
            }
        ));
        assert!(err.to_string().starts_with("failed when processing item usages: "));
        assert!(err.to_string().contains("token revoked"));
        assert!(publisher.is_closed());
        assert!(usages.cursor_state_file.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn publish_error_ends_run() {
        let dir = tempfile::tempdir().unwrap();
        let settings = stream(StreamKind::AuditEvents, token(&["auditevents"]), dir.path());
        let api = ScriptedApi::new();
        api.push(StreamKind::AuditEvents, Ok(page(&["a1"], "A", false)));

        let err = Supervisor::new(
            config(vec![settings]),
            Arc::new(api),
            CollectingPublisher::failing(),
        )
        .run(CancellationToken::new())
        .await
        .unwrap_err();

        assert!(matches!(err, SupervisorError::Publish(_)));
    }

    #[tokio::test]
    async fn unopenable_store_fails_without_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = StreamSettings::with_defaults(StreamKind::ItemUsages, token(&["itemusages"]));
        settings.cursor_state_file = dir.path().join("missing/dir/usages.state");
        let api = ScriptedApi::new();

        let err = Supervisor::new(
            config(vec![Arc::new(settings)]),
            Arc::new(api.clone()),
            CollectingPublisher::new(),
        )
        .run(CancellationToken::new())
        .await
        .unwrap_err();

        assert!(matches!(err, SupervisorError::OpenStore { .. }));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn introspects_each_stream_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut agent = (*config(vec![
            stream(StreamKind::SignInAttempts, token(&["signinattempts"]), dir.path()),
            stream(StreamKind::AuditEvents, token(&["auditevents"]), dir.path()),
        ]))
        .clone();
        agent.introspect_on_start = true;
        let api = ScriptedApi::new();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            Supervisor::new(Arc::new(agent), Arc::new(api.clone()), CollectingPublisher::new())
                .run(cancel.clone()),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(api.introspections(), 2);
    }

    #[tokio::test]
    async fn cancel_before_first_tick_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let settings = stream(StreamKind::ItemUsages, token(&["itemusages"]), dir.path());
        let api = ScriptedApi::new();
        let publisher = CollectingPublisher::new();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(
            Supervisor::new(config(vec![settings.clone()]), Arc::new(api.clone()), publisher.clone())
                .run(cancel.clone()),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        assert!(handle.await.unwrap().is_ok());
        assert!(api.calls().is_empty());
        assert!(publisher.is_closed());
        assert!(settings.cursor_state_file.exists());
    }
}
