//! Parsing for `sample_frequency` values.
//!
//! Accepts either an integer number of seconds or a humantime string such as
//! `500ms`, `10s`, `5m` or `1h 30m`.

use std::time::Duration;

use serde::Deserialize;

/// A poll interval as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FrequencySetting {
    Seconds(u64),
    Text(String),
}

impl FrequencySetting {
    /// Resolves the setting to a duration.
    pub fn to_duration(&self) -> Result<Duration, humantime::DurationError> {
        match self {
            FrequencySetting::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            FrequencySetting::Text(text) => humantime::parse_duration(text.trim()),
        }
    }
}
