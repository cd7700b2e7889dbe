//! Wire types for the events API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cursor::wrap_cursor;
use super::Page;

/// A cursor-paginated response body.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct PageResponse<T> {
    /// Continuation token for the next request.
    pub cursor: String,

    /// Whether more items are available right now.
    #[serde(default)]
    pub has_more: bool,

    /// Items in API order.
    #[serde(default = "Vec::new", deserialize_with = "null_as_empty")]
    pub items: Vec<T>,
}

impl<T> PageResponse<T> {
    /// Converts into a stream-agnostic [`Page`].
    pub fn into_page(self, wrap: impl Fn(T) -> RawItem) -> Page {
        Page {
            items: self.items.into_iter().map(wrap).collect(),
            next_cursor: wrap_cursor(&self.cursor),
            has_more: self.has_more,
        }
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// One raw item from any stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RawItem {
    SignInAttempt(SignInAttempt),
    ItemUsage(ItemUsage),
    AuditEvent(AuditEvent),
}

/// A sign-in attempt record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignInAttempt {
    pub uuid: String,
    #[serde(default)]
    pub session_uuid: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub category: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub details: Option<SignInAttemptDetails>,
    #[serde(default)]
    pub target_user: User,
    #[serde(default)]
    pub client: Client,
    #[serde(default)]
    pub location: Option<Location>,
}

/// Extra detail attached to some sign-in attempt categories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignInAttemptDetails {
    pub value: String,
}

/// An item usage record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemUsage {
    pub uuid: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub used_version: u32,
    #[serde(default)]
    pub vault_uuid: String,
    #[serde(default)]
    pub item_uuid: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub user: User,
    #[serde(default)]
    pub client: Client,
    #[serde(default)]
    pub location: Option<Location>,
}

/// An account audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub uuid: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub actor_uuid: String,
    #[serde(default)]
    pub actor_details: Option<User>,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub object_type: String,
    #[serde(default)]
    pub object_uuid: String,
    #[serde(default)]
    pub object_details: Option<User>,
    #[serde(default)]
    pub aux_id: Option<i64>,
    #[serde(default)]
    pub aux_uuid: Option<String>,
    #[serde(default)]
    pub aux_details: Option<User>,
    #[serde(default)]
    pub aux_info: Option<String>,
    #[serde(default)]
    pub session: Option<Session>,
    #[serde(default)]
    pub location: Option<Location>,
}

/// A user as referenced by an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// The client application that produced an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Client {
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub platform_name: String,
    #[serde(default)]
    pub platform_version: String,
    #[serde(default)]
    pub os_name: String,
    #[serde(default)]
    pub os_version: String,
    #[serde(default)]
    pub ip_address: String,
}

/// The session an audit event was performed in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub login_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub device_uuid: String,
    #[serde(default)]
    pub ip: String,
}

/// Approximate geolocation of the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

/// Token metadata returned by the introspection endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Introspection {
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "IssuedAt")]
    pub issued_at: DateTime<Utc>,
    #[serde(rename = "Features", default)]
    pub features: Vec<String>,
}
