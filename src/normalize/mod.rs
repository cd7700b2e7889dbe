//! Mapping of raw API items to downstream documents.
//!
//! Fields follow the Elastic Common Schema where one exists (`event.action`,
//! `user.*`, `os.*`, `host.ip`, `source.geo.*`). Everything vendor-specific is
//! kept under the [`CUSTOM_FIELD_SET`] object. The stream an event came from
//! travels in `@metadata.event_type`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value, json};

use crate::api::{AuditEvent, Client, ItemUsage, Location, RawItem, SignInAttempt, User};
use crate::types::StreamKind;

/// Name of the object holding fields with no ECS equivalent.
pub const CUSTOM_FIELD_SET: &str = "onepassword";

/// An event ready for publishing.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    /// When the event happened, per the API.
    pub timestamp: DateTime<Utc>,

    /// The stream the event came from.
    pub event_type: StreamKind,

    /// Document body, without `@timestamp` and `@metadata`.
    pub fields: Map<String, Value>,
}

impl NormalizedEvent {
    /// Maps a raw item from `stream` into a normalized event.
    pub fn from_raw(stream: StreamKind, item: &RawItem) -> Self {
        let (timestamp, fields) = match item {
            RawItem::SignInAttempt(a) => (a.timestamp, sign_in_attempt_fields(a)),
            RawItem::ItemUsage(u) => (u.timestamp, item_usage_fields(u)),
            RawItem::AuditEvent(e) => (e.timestamp, audit_event_fields(e)),
        };
        Self {
            timestamp,
            event_type: stream,
            fields,
        }
    }

    /// Renders the full document as published downstream.
    pub fn to_document(&self) -> Value {
        let mut doc = Map::with_capacity(self.fields.len() + 2);
        doc.insert(
            "@timestamp".to_string(),
            Value::String(self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        doc.insert(
            "@metadata".to_string(),
            json!({ "event_type": self.event_type.event_type() }),
        );
        for (key, value) in &self.fields {
            doc.insert(key.clone(), value.clone());
        }
        Value::Object(doc)
    }
}

fn sign_in_attempt_fields(a: &SignInAttempt) -> Map<String, Value> {
    let details = match &a.details {
        Some(d) => json!({ "value": d.value }),
        None => json!({}),
    };

    let mut fields = common_fields(&a.target_user, &a.client, a.location.as_ref());
    fields.insert("event".to_string(), json!({ "action": a.category }));
    fields.insert(
        CUSTOM_FIELD_SET.to_string(),
        json!({
            "uuid": a.uuid,
            "session_uuid": a.session_uuid,
            "type": a.kind,
            "country": a.country,
            "details": details,
            "client": client_fields(&a.client),
        }),
    );
    fields
}

fn item_usage_fields(u: &ItemUsage) -> Map<String, Value> {
    let mut fields = common_fields(&u.user, &u.client, u.location.as_ref());
    if !u.action.is_empty() {
        fields.insert("event".to_string(), json!({ "action": u.action }));
    }
    fields.insert(
        CUSTOM_FIELD_SET.to_string(),
        json!({
            "uuid": u.uuid,
            "used_version": u.used_version,
            "vault_uuid": u.vault_uuid,
            "item_uuid": u.item_uuid,
            "client": client_fields(&u.client),
        }),
    );
    fields
}

fn audit_event_fields(e: &AuditEvent) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("event".to_string(), json!({ "action": e.action }));

    let actor = e.actor_details.clone().unwrap_or_else(|| User {
        uuid: e.actor_uuid.clone(),
        ..User::default()
    });
    fields.insert("user".to_string(), user_fields(&actor));

    if let Some(session) = &e.session
        && !session.ip.is_empty()
    {
        fields.insert("host".to_string(), json!({ "ip": session.ip }));
    }
    if let Some(location) = &e.location {
        fields.insert("source".to_string(), geo_fields(location));
    }

    let mut custom = Map::new();
    custom.insert("uuid".to_string(), json!(e.uuid));
    custom.insert("object_type".to_string(), json!(e.object_type));
    custom.insert("object_uuid".to_string(), json!(e.object_uuid));
    if let Some(object) = &e.object_details {
        custom.insert("object_details".to_string(), user_fields(object));
    }
    if let Some(aux_id) = e.aux_id {
        custom.insert("aux_id".to_string(), json!(aux_id));
    }
    if let Some(aux_uuid) = &e.aux_uuid {
        custom.insert("aux_uuid".to_string(), json!(aux_uuid));
    }
    if let Some(aux) = &e.aux_details {
        custom.insert("aux_details".to_string(), user_fields(aux));
    }
    if let Some(aux_info) = &e.aux_info {
        custom.insert("aux_info".to_string(), json!(aux_info));
    }
    if let Some(session) = &e.session {
        custom.insert(
            "session".to_string(),
            json!({
                "uuid": session.uuid,
                "login_time": session
                    .login_time
                    .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
                "device_uuid": session.device_uuid,
                "ip": session.ip,
            }),
        );
    }
    fields.insert(CUSTOM_FIELD_SET.to_string(), Value::Object(custom));
    fields
}

fn common_fields(user: &User, client: &Client, location: Option<&Location>) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("user".to_string(), user_fields(user));
    fields.insert(
        "os".to_string(),
        json!({ "name": client.os_name, "version": client.os_version }),
    );
    fields.insert("host".to_string(), json!({ "ip": client.ip_address }));
    if let Some(location) = location {
        fields.insert("source".to_string(), geo_fields(location));
    }
    fields
}

fn user_fields(user: &User) -> Value {
    json!({ "id": user.uuid, "full_name": user.name, "email": user.email })
}

fn client_fields(client: &Client) -> Value {
    json!({
        "app_name": client.app_name,
        "app_version": client.app_version,
        "platform_name": client.platform_name,
        "platform_version": client.platform_version,
    })
}

fn geo_fields(location: &Location) -> Value {
    json!({
        "geo": {
            "country_name": location.country,
            "region_name": location.region,
            "city_name": location.city,
            "location": { "lat": location.latitude, "lon": location.longitude },
        }
    })
}
