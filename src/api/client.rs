//! HTTP implementation of [`EventsApi`].

use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::claims::TokenClaims;
use super::error::ApiError;
use super::models::{AuditEvent, Introspection, ItemUsage, PageResponse, RawItem, SignInAttempt};
use super::retry::{RetryConfig, retry_with_backoff};
use super::{EventsApi, Page};
use crate::types::{Cursor, StreamKind};

/// User agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("events-agent/", env!("CARGO_PKG_VERSION"));

const INTROSPECT_PATH: &str = "/api/auth/introspect";

/// Connection options for [`EventsApiClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Overrides the host derived from each token's audience.
    pub api_host: Option<String>,

    /// Accept invalid TLS certificates. For test deployments only.
    pub insecure_skip_verify: bool,

    /// Backoff for transient failures.
    pub retry: RetryConfig,

    /// Whole-request timeout.
    pub request_timeout: Duration,

    /// TCP connect timeout.
    pub connect_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            api_host: None,
            insecure_skip_verify: false,
            retry: RetryConfig::DEFAULT,
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(15),
        }
    }
}

/// Events API client backed by reqwest.
///
/// One client serves every stream; the host for each request comes from the
/// token passed with it unless `api_host` overrides it.
pub struct EventsApiClient {
    http: reqwest::Client,
    options: ClientOptions,
    // Last token decoded, so steady-state polling does not re-parse it.
    resolved: Mutex<Option<(String, String)>>,
}

impl EventsApiClient {
    /// Builds a client with the given options.
    pub fn new(options: ClientOptions) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .danger_accept_invalid_certs(options.insecure_skip_verify)
            .build()
            .map_err(|e| ApiError::permanent("failed to build HTTP client", e))?;

        Ok(Self {
            http,
            options,
            resolved: Mutex::new(None),
        })
    }

    /// Returns the base URL requests with `token` are sent to.
    pub async fn base_url(&self, token: &SecretString) -> Result<String, ApiError> {
        if let Some(host) = &self.options.api_host {
            return Ok(normalize_host(host));
        }

        let raw = token.expose_secret();
        let mut resolved = self.resolved.lock().await;
        if let Some((cached_token, url)) = resolved.as_ref()
            && cached_token == raw
        {
            return Ok(url.clone());
        }

        let url = TokenClaims::decode(raw)
            .and_then(|claims| claims.events_url())
            .map_err(|e| ApiError::permanent_without_source(e.to_string()))?;
        *resolved = Some((raw.to_string(), url.clone()));
        Ok(url)
    }

    async fn post_once(
        &self,
        url: &str,
        token: &SecretString,
        cursor: &Cursor,
    ) -> Result<String, ApiError> {
        let response = self
            .http
            .post(url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .bearer_auth(token.expose_secret())
            .body(cursor.as_str().to_string())
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;

        read_body(response).await
    }

    async fn get_once(&self, url: &str, token: &SecretString) -> Result<String, ApiError> {
        let response = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;

        read_body(response).await
    }
}

impl EventsApi for EventsApiClient {
    #[instrument(skip(self, token, cursor), fields(stream = %stream))]
    async fn fetch_page(
        &self,
        stream: StreamKind,
        token: &SecretString,
        cursor: &Cursor,
    ) -> Result<Page, ApiError> {
        let url = format!("{}{}", self.base_url(token).await?, stream.api_path());

        let body =
            retry_with_backoff(self.options.retry, || self.post_once(&url, token, cursor)).await?;

        let page = parse_page(stream, &body)?;
        debug!(
            items = page.items.len(),
            has_more = page.has_more,
            "Fetched page"
        );
        Ok(page)
    }

    #[instrument(skip(self, token))]
    async fn introspect(&self, token: &SecretString) -> Result<Introspection, ApiError> {
        let url = format!("{}{}", self.base_url(token).await?, INTROSPECT_PATH);

        let body = retry_with_backoff(self.options.retry, || self.get_once(&url, token)).await?;

        serde_json::from_str(&body).map_err(|e| {
            ApiError::permanent_without_source(format!("invalid introspection response: {}", e))
        })
    }
}

async fn read_body(response: reqwest::Response) -> Result<String, ApiError> {
    let status = response.status();
    let body = response.text().await.map_err(ApiError::from_reqwest)?;
    if status != reqwest::StatusCode::OK {
        return Err(ApiError::from_status(status.as_u16(), &body));
    }
    Ok(body)
}

/// Decodes a page body according to the stream's item shape.
pub(crate) fn parse_page(stream: StreamKind, body: &str) -> Result<Page, ApiError> {
    let page = match stream {
        StreamKind::SignInAttempts => serde_json::from_str::<PageResponse<SignInAttempt>>(body)
            .map(|r| r.into_page(RawItem::SignInAttempt)),
        StreamKind::ItemUsages => serde_json::from_str::<PageResponse<ItemUsage>>(body)
            .map(|r| r.into_page(RawItem::ItemUsage)),
        StreamKind::AuditEvents => serde_json::from_str::<PageResponse<AuditEvent>>(body)
            .map(|r| r.into_page(RawItem::AuditEvent)),
    };
    page.map_err(|e| {
        ApiError::permanent_without_source(format!("invalid {} response: {}", stream, e))
    })
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}
