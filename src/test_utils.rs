//! Shared test fakes and arbitrary generators for property-based testing.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use secrecy::SecretString;

use crate::api::{ApiError, EventsApi, Introspection, ItemUsage, Page, RawItem, wrap_cursor};
use crate::normalize::NormalizedEvent;
use crate::persistence::{CursorStore, CursorStoreError};
use crate::publish::{PublishError, Publisher};
use crate::types::{Cursor, StreamKind};

// ─── Generators ───────────────────────────────────────────────────────────────

/// A cursor value as the store accepts it: any text without line breaks.
pub fn arb_cursor_value() -> impl Strategy<Value = String> {
    "[^\r\n]{0,64}"
}

pub fn arb_stream_kind() -> impl Strategy<Value = StreamKind> {
    prop_oneof![
        Just(StreamKind::SignInAttempts),
        Just(StreamKind::ItemUsages),
        Just(StreamKind::AuditEvents),
    ]
}

// ─── Builders ─────────────────────────────────────────────────────────────────

/// An item usage whose `action` identifies it in assertions.
pub fn usage(action: &str) -> RawItem {
    RawItem::ItemUsage(ItemUsage {
        uuid: format!("uuid-{}", action),
        timestamp: Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap(),
        used_version: 1,
        vault_uuid: "vault".to_string(),
        item_uuid: "item".to_string(),
        action: action.to_string(),
        user: Default::default(),
        client: Default::default(),
        location: None,
    })
}

/// A page of item usages with the given actions and continuation token.
pub fn page(actions: &[&str], token: &str, has_more: bool) -> Page {
    Page {
        items: actions.iter().map(|a| usage(a)).collect(),
        next_cursor: wrap_cursor(token),
        has_more,
    }
}

/// Returns the `event.action` of a normalized event.
pub fn action_of(event: &NormalizedEvent) -> String {
    event.fields["event"]["action"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

// ─── Fake events API ──────────────────────────────────────────────────────────

/// An [`EventsApi`] that replays scripted responses per stream.
///
/// When a stream's script runs out, fetches return an empty final page that
/// echoes the request cursor. Every fetch is recorded.
#[derive(Clone, Default)]
pub struct ScriptedApi {
    scripts: Arc<Mutex<HashMap<StreamKind, VecDeque<Result<Page, ApiError>>>>>,
    calls: Arc<Mutex<Vec<(StreamKind, Cursor)>>>,
    introspections: Arc<Mutex<u32>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, stream: StreamKind, response: Result<Page, ApiError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(stream)
            .or_default()
            .push_back(response);
    }

    pub fn calls(&self) -> Vec<(StreamKind, Cursor)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn introspections(&self) -> u32 {
        *self.introspections.lock().unwrap()
    }
}

impl EventsApi for ScriptedApi {
    async fn fetch_page(
        &self,
        stream: StreamKind,
        _token: &SecretString,
        cursor: &Cursor,
    ) -> Result<Page, ApiError> {
        self.calls.lock().unwrap().push((stream, cursor.clone()));
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&stream)
            .and_then(|q| q.pop_front());
        next.unwrap_or_else(|| {
            Ok(Page {
                items: Vec::new(),
                next_cursor: cursor.clone(),
                has_more: false,
            })
        })
    }

    async fn introspect(&self, _token: &SecretString) -> Result<Introspection, ApiError> {
        *self.introspections.lock().unwrap() += 1;
        Ok(Introspection {
            uuid: "TOKEN".to_string(),
            issued_at: Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap(),
            features: Vec::new(),
        })
    }
}

/// An [`EventsApi`] whose fetches never complete.
#[derive(Clone, Default)]
pub struct HangingApi;

impl EventsApi for HangingApi {
    async fn fetch_page(
        &self,
        _stream: StreamKind,
        _token: &SecretString,
        _cursor: &Cursor,
    ) -> Result<Page, ApiError> {
        std::future::pending().await
    }

    async fn introspect(&self, _token: &SecretString) -> Result<Introspection, ApiError> {
        std::future::pending().await
    }
}

// ─── Fake cursor store ────────────────────────────────────────────────────────

/// An in-memory [`CursorStore`] that keeps its full history.
#[derive(Clone, Default)]
pub struct MemoryStore {
    values: Arc<Mutex<Vec<String>>>,
    fail_writes: bool,
    closed: Arc<Mutex<bool>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `value`.
    pub fn with_value(value: &str) -> Self {
        let store = Self::default();
        store.values.lock().unwrap().push(value.to_string());
        store
    }

    /// A store whose `set_value` always fails.
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn history(&self) -> Vec<String> {
        self.values.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

impl CursorStore for MemoryStore {
    fn get_value(&mut self) -> crate::persistence::cursor_store::Result<String> {
        Ok(self.values.lock().unwrap().last().cloned().unwrap_or_default())
    }

    fn set_value(&mut self, value: &str) -> crate::persistence::cursor_store::Result<()> {
        if self.fail_writes {
            return Err(CursorStoreError::Write {
                value: value.to_string(),
                source: std::io::Error::other("disk full"),
            });
        }
        self.values.lock().unwrap().push(value.to_string());
        Ok(())
    }

    fn close(self) -> crate::persistence::cursor_store::Result<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

// ─── Fake publisher ───────────────────────────────────────────────────────────

/// A [`Publisher`] that collects events in memory.
#[derive(Clone, Default)]
pub struct CollectingPublisher {
    events: Arc<Mutex<Vec<NormalizedEvent>>>,
    closed: Arc<Mutex<bool>>,
    fail: bool,
    delay: Option<Duration>,
}

impl CollectingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A publisher that rejects every event.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// A publisher that takes `delay` to accept each event.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<NormalizedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.events().iter().map(action_of).collect()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

impl Publisher for CollectingPublisher {
    async fn publish(&mut self, event: NormalizedEvent) -> crate::publish::Result<()> {
        if self.fail {
            return Err(PublishError::Write(std::io::Error::other("sink unavailable")));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }

    async fn close(self) -> crate::publish::Result<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}
