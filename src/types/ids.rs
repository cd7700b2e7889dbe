//! Newtype wrappers for stream identifiers and cursors.
//!
//! These types keep stream names and opaque cursor tokens from being mixed up
//! with ordinary strings as they flow between the config, the poller and the
//! cursor store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One independently scheduled category of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    SignInAttempts,
    ItemUsages,
    AuditEvents,
}

impl StreamKind {
    /// All streams, in the order the supervisor starts them.
    pub const ALL: [StreamKind; 3] = [
        StreamKind::SignInAttempts,
        StreamKind::ItemUsages,
        StreamKind::AuditEvents,
    ];

    /// The event type tag attached to every event from this stream.
    pub fn event_type(&self) -> &'static str {
        match self {
            StreamKind::SignInAttempts => "signinattempts",
            StreamKind::ItemUsages => "itemusages",
            StreamKind::AuditEvents => "auditevents",
        }
    }

    /// The feature scope a bearer token must carry to read this stream.
    pub fn feature_scope(&self) -> &'static str {
        // The API uses the same identifiers for scopes and event types.
        self.event_type()
    }

    /// The API path that serves pages for this stream.
    pub fn api_path(&self) -> &'static str {
        match self {
            StreamKind::SignInAttempts => "/api/v1/signinattempts",
            StreamKind::ItemUsages => "/api/v1/itemusages",
            StreamKind::AuditEvents => "/api/v1/auditevents",
        }
    }

    /// The section name used for this stream in the config file.
    pub fn config_key(&self) -> &'static str {
        match self {
            StreamKind::SignInAttempts => "signin_attempts",
            StreamKind::ItemUsages => "item_usages",
            StreamKind::AuditEvents => "audit_events",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamKind::SignInAttempts => "sign-in attempts",
            StreamKind::ItemUsages => "item usages",
            StreamKind::AuditEvents => "audit events",
        };
        f.write_str(name)
    }
}

/// An opaque pagination cursor.
///
/// The value is stored and replayed byte-for-byte; nothing outside the API
/// client ever looks inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub String);

impl Cursor {
    pub fn new(s: impl Into<String>) -> Self {
        Cursor(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Cursor {
    fn from(s: String) -> Self {
        Cursor(s)
    }
}

impl From<&str> for Cursor {
    fn from(s: &str) -> Self {
        Cursor(s.to_string())
    }
}
