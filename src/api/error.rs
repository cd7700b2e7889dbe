//! Events API error types.
//!
//! Errors are categorized for the retry layer:
//!
//! - **Transient** errors are retriable (network failures, timeouts, 429, 5xx)
//! - **Permanent** errors are returned immediately (other 4xx, undecodable
//!   bodies, malformed tokens)
//! - **Cancelled** means the process-wide shutdown fired while a call was in
//!   flight. It is never retried and is not reported as a stream failure.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Safe to retry with backoff.
    Transient,

    /// Retrying the same request would fail the same way.
    Permanent,

    /// The call was abandoned because shutdown was requested.
    Cancelled,
}

impl ApiErrorKind {
    pub fn is_retriable(&self) -> bool {
        matches!(self, ApiErrorKind::Transient)
    }
}

/// An events API error with categorization for retry decisions.
#[derive(Debug, Error)]
pub struct ApiError {
    /// The kind of error.
    pub kind: ApiErrorKind,

    /// The HTTP status code, if the server answered.
    pub status_code: Option<u16>,

    /// A human-readable description of the error.
    pub message: String,

    /// The underlying HTTP client error, if any.
    #[source]
    pub source: Option<reqwest::Error>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "events API error (HTTP {}): {}", code, self.message),
            None => write!(f, "events API error: {}", self.message),
        }
    }
}

impl ApiError {
    fn new(
        kind: ApiErrorKind,
        status_code: Option<u16>,
        message: impl Into<String>,
        source: Option<reqwest::Error>,
    ) -> Self {
        Self {
            kind,
            status_code,
            message: message.into(),
            source,
        }
    }

    pub fn permanent(message: impl Into<String>, source: reqwest::Error) -> Self {
        let status = source.status().map(|s| s.as_u16());
        Self::new(ApiErrorKind::Permanent, status, message, Some(source))
    }

    pub fn transient_without_source(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Transient, None, message, None)
    }

    pub fn permanent_without_source(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Permanent, None, message, None)
    }

    /// The error a call resolves to when shutdown interrupts it.
    pub fn cancelled() -> Self {
        Self::new(
            ApiErrorKind::Cancelled,
            None,
            "request cancelled by shutdown",
            None,
        )
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ApiErrorKind::Cancelled
    }

    /// Builds an error from a non-200 response, keeping a bounded excerpt of
    /// the body for the log.
    pub fn from_status(status: u16, body: &str) -> Self {
        let body = body.trim();
        let message = if body.is_empty() {
            "unexpected status code".to_string()
        } else {
            format!("unexpected status code: {}", truncate(body, 200))
        };
        Self::new(classify_status(status), Some(status), message, None)
    }

    /// Categorizes a reqwest failure. Anything that never produced a
    /// response is treated as a network problem worth retrying, except
    /// builder and decode errors.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        let message = err.to_string();
        let status = err.status().map(|s| s.as_u16());

        let kind = match status {
            Some(code) => classify_status(code),
            None if err.is_decode() || err.is_builder() => ApiErrorKind::Permanent,
            None if err.is_timeout()
                || err.is_connect()
                || err.is_request()
                || err.is_body()
                || looks_like_network_failure(&message) =>
            {
                ApiErrorKind::Transient
            }
            None => ApiErrorKind::Permanent,
        };

        Self::new(kind, status, message, Some(err))
    }
}

/// Maps an HTTP status code to an error kind.
pub fn classify_status(status: u16) -> ApiErrorKind {
    match status {
        408 | 429 => ApiErrorKind::Transient,
        500..=599 => ApiErrorKind::Transient,
        _ => ApiErrorKind::Permanent,
    }
}

fn looks_like_network_failure(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["timeout", "timed out", "connection", "network", "dns"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
