//! Agent configuration.
//!
//! The TOML file is parsed into [`FileConfig`], a permissive mirror of the
//! file with every field optional. Environment overrides are applied on top,
//! then [`FileConfig::validate`] produces the immutable [`AgentConfig`] the
//! rest of the agent runs on. Each enabled stream's settings are shared with
//! its poller through an `Arc`.
//!
//! ```toml
//! introspect_on_start = true
//! status_addr = "127.0.0.1:9090"
//!
//! [item_usages]
//! enabled = true
//! auth_token = "eyJhbGciOiJFUzI1NiIs..."
//! sample_frequency = "30s"
//! ```

mod frequency;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

use crate::types::{Cursor, StreamKind};

pub use frequency::FrequencySetting;

/// Cursor used on first start, before any state has been persisted.
pub const DEFAULT_STARTING_CURSOR: &str =
    r#"{ "limit": 1000, "start_time": "2020-01-01T00:00:00Z" }"#;

/// Default interval between polls of one stream.
pub const DEFAULT_SAMPLE_FREQUENCY: Duration = Duration::from_secs(10);

/// Shortest poll interval the agent accepts.
pub const MIN_SAMPLE_FREQUENCY: Duration = Duration::from_secs(1);

/// Prefix of the per-stream token environment variables.
pub const TOKEN_ENV_PREFIX: &str = "EVENTS_AGENT_";

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML or has the wrong shape.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is present but unusable.
    #[error("invalid {section}: {message}")]
    Validation { section: String, message: String },

    /// Every stream is disabled.
    #[error("no streams are enabled")]
    NoStreamsEnabled,
}

impl ConfigError {
    fn validation(section: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Validation {
            section: section.into(),
            message: message.into(),
        }
    }
}

/// Result type for configuration loading.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// The config file as written.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Overrides the API host derived from each token.
    #[serde(default)]
    pub api_host: Option<String>,

    /// Accept invalid TLS certificates.
    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// Log token metadata from the introspection endpoint at startup.
    #[serde(default)]
    pub introspect_on_start: bool,

    /// Listen address for the status server; disabled when absent.
    #[serde(default)]
    pub status_addr: Option<SocketAddr>,

    /// File to append events to; stdout when absent.
    #[serde(default)]
    pub output: Option<PathBuf>,

    #[serde(default)]
    pub signin_attempts: StreamFileConfig,

    #[serde(default)]
    pub item_usages: StreamFileConfig,

    #[serde(default)]
    pub audit_events: StreamFileConfig,
}

/// One stream's section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamFileConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub auth_token: Option<String>,

    #[serde(default)]
    pub starting_cursor: Option<String>,

    #[serde(default)]
    pub cursor_state_file: Option<PathBuf>,

    #[serde(default)]
    pub sample_frequency: Option<FrequencySetting>,
}

/// Validated configuration for the whole agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub api_host: Option<String>,
    pub insecure_skip_verify: bool,
    pub introspect_on_start: bool,
    pub status_addr: Option<SocketAddr>,
    pub output: Option<PathBuf>,

    /// Enabled streams, in [`StreamKind::ALL`] order.
    pub streams: Vec<Arc<StreamSettings>>,
}

/// Validated settings for one enabled stream.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub kind: StreamKind,
    pub auth_token: SecretString,
    pub starting_cursor: Cursor,
    pub cursor_state_file: PathBuf,
    pub sample_frequency: Duration,
}

impl StreamSettings {
    /// Builds settings with defaults for everything but the token.
    pub fn with_defaults(kind: StreamKind, auth_token: impl Into<String>) -> Self {
        Self {
            kind,
            auth_token: SecretString::from(auth_token.into()),
            starting_cursor: Cursor::new(DEFAULT_STARTING_CURSOR),
            cursor_state_file: default_state_file(kind),
            sample_frequency: DEFAULT_SAMPLE_FREQUENCY,
        }
    }
}

/// Default cursor state file for `kind`, relative to the working directory.
pub fn default_state_file(kind: StreamKind) -> PathBuf {
    PathBuf::from(format!("events_agent_{}.state", kind.event_type()))
}

/// Name of the environment variable that overrides `kind`'s token.
pub fn token_env_var(kind: StreamKind) -> String {
    format!(
        "{}{}_TOKEN",
        TOKEN_ENV_PREFIX,
        kind.config_key().to_ascii_uppercase()
    )
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Returns the section for `kind`.
    pub fn stream(&self, kind: StreamKind) -> &StreamFileConfig {
        match kind {
            StreamKind::SignInAttempts => &self.signin_attempts,
            StreamKind::ItemUsages => &self.item_usages,
            StreamKind::AuditEvents => &self.audit_events,
        }
    }

    fn stream_mut(&mut self, kind: StreamKind) -> &mut StreamFileConfig {
        match kind {
            StreamKind::SignInAttempts => &mut self.signin_attempts,
            StreamKind::ItemUsages => &mut self.item_usages,
            StreamKind::AuditEvents => &mut self.audit_events,
        }
    }

    /// Replaces tokens with values from the environment where set.
    ///
    /// `lookup` is `std::env::var` in production.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for kind in StreamKind::ALL {
            if let Some(token) = lookup(&token_env_var(kind))
                && !token.trim().is_empty()
            {
                self.stream_mut(kind).auth_token = Some(token);
            }
        }
    }

    /// Checks every enabled stream and fills in defaults.
    pub fn validate(self) -> Result<AgentConfig> {
        if let Some(host) = &self.api_host
            && host.trim().is_empty()
        {
            return Err(ConfigError::validation("api_host", "can't be empty"));
        }

        let mut streams = Vec::new();
        for kind in StreamKind::ALL {
            let section = self.stream(kind);
            if !section.enabled {
                continue;
            }
            streams.push(Arc::new(validate_stream(kind, section)?));
        }

        if streams.is_empty() {
            return Err(ConfigError::NoStreamsEnabled);
        }

        Ok(AgentConfig {
            api_host: self.api_host,
            insecure_skip_verify: self.insecure_skip_verify,
            introspect_on_start: self.introspect_on_start,
            status_addr: self.status_addr,
            output: self.output,
            streams,
        })
    }
}

fn validate_stream(kind: StreamKind, section: &StreamFileConfig) -> Result<StreamSettings> {
    let name = kind.config_key();

    let sample_frequency = match &section.sample_frequency {
        Some(setting) => setting
            .to_duration()
            .map_err(|e| ConfigError::validation(name, format!("sample_frequency: {}", e)))?,
        None => DEFAULT_SAMPLE_FREQUENCY,
    };
    if sample_frequency < MIN_SAMPLE_FREQUENCY {
        return Err(ConfigError::validation(
            name,
            "sample_frequency can't be less than 1000ms",
        ));
    }

    let auth_token = section.auth_token.as_deref().unwrap_or("").trim();
    if auth_token.is_empty() {
        return Err(ConfigError::validation(name, "auth_token can't be empty"));
    }

    let starting_cursor = section
        .starting_cursor
        .as_deref()
        .unwrap_or(DEFAULT_STARTING_CURSOR);
    if starting_cursor.is_empty() {
        return Err(ConfigError::validation(name, "starting_cursor can't be empty"));
    }
    if starting_cursor.contains(['\n', '\r']) {
        return Err(ConfigError::validation(
            name,
            "starting_cursor can't contain line breaks",
        ));
    }

    let cursor_state_file = section
        .cursor_state_file
        .clone()
        .unwrap_or_else(|| default_state_file(kind));
    if cursor_state_file.as_os_str().is_empty() {
        return Err(ConfigError::validation(name, "cursor_state_file can't be empty"));
    }

    Ok(StreamSettings {
        kind,
        auth_token: SecretString::from(auth_token.to_string()),
        starting_cursor: Cursor::new(starting_cursor),
        cursor_state_file,
        sample_frequency,
    })
}

impl AgentConfig {
    /// Loads, overrides from the process environment and validates.
    pub fn load(path: &Path) -> Result<Self> {
        let mut file = FileConfig::from_file(path)?;
        file.apply_env_overrides(|name| std::env::var(name).ok());
        file.validate()
    }

    /// Returns the settings for `kind` if that stream is enabled.
    pub fn stream(&self, kind: StreamKind) -> Option<&Arc<StreamSettings>> {
        self.streams.iter().find(|s| s.kind == kind)
    }
}

impl PartialEq for StreamSettings {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.auth_token.expose_secret() == other.auth_token.expose_secret()
            && self.starting_cursor == other.starting_cursor
            && self.cursor_state_file == other.cursor_state_file
            && self.sample_frequency == other.sample_frequency
    }
}
