//! Events API client and pagination contract.
//!
//! The poller only sees the [`EventsApi`] trait: hand it a stream, a token and
//! an opaque cursor, get back a [`Page`] of raw items, the cursor for the next
//! request and a more-data flag. Everything vendor-specific (URLs, envelopes,
//! per-stream response shapes, retries) lives behind it.
//!
//! Key features:
//! - Host derived from the bearer token's audience claim
//! - Exponential backoff retry for transient failures
//! - Distinguishes transient, permanent and cancelled errors

mod claims;
mod client;
mod cursor;
mod error;
mod models;
mod retry;

use std::future::Future;

use secrecy::SecretString;

use crate::types::{Cursor, StreamKind};

#[cfg(test)]
pub(crate) use claims::encode_test_token;
pub use claims::{AUDIENCE_DEPRECATED, ClaimsError, TokenClaims};
pub use client::{ClientOptions, DEFAULT_USER_AGENT, EventsApiClient};
pub use cursor::wrap_cursor;
pub use error::{ApiError, ApiErrorKind};
pub use models::{
    AuditEvent, Client, Introspection, ItemUsage, Location, PageResponse, RawItem, Session,
    SignInAttempt, SignInAttemptDetails, User,
};
pub use retry::{Backoff, RetryConfig, retry_with_backoff};

/// One fetched page, independent of stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Items in API order.
    pub items: Vec<RawItem>,

    /// Cursor to submit for the following page.
    pub next_cursor: Cursor,

    /// Whether the API has more items available right now.
    pub has_more: bool,
}

/// A cursor-paginated source of events.
///
/// # Example (fake for testing)
///
/// ```ignore
/// struct FixedPages(Vec<Page>);
///
/// impl EventsApi for FixedPages {
///     async fn fetch_page(&self, _: StreamKind, _: &SecretString, _: &Cursor) -> Result<Page, ApiError> {
///         Ok(self.0[0].clone())
///     }
///     async fn introspect(&self, _: &SecretString) -> Result<Introspection, ApiError> {
///         Err(ApiError::permanent_without_source("not supported"))
///     }
/// }
/// ```
pub trait EventsApi: Send + Sync {
    /// Fetches the page that follows `cursor` for `stream`.
    fn fetch_page(
        &self,
        stream: StreamKind,
        token: &SecretString,
        cursor: &Cursor,
    ) -> impl Future<Output = Result<Page, ApiError>> + Send;

    /// Returns metadata about `token`.
    fn introspect(
        &self,
        token: &SecretString,
    ) -> impl Future<Output = Result<Introspection, ApiError>> + Send;
}
