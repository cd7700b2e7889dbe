//! The request envelope the events API expects around a continuation token.

use crate::types::Cursor;

/// Wraps a continuation token returned by the API into the body of the next
/// page request.
pub fn wrap_cursor(token: &str) -> Cursor {
    let quoted = serde_json::Value::String(token.to_string());
    Cursor::new(format!(r#"{{ "cursor": {} }}"#, quoted))
}
