//! Downstream sinks for normalized events.

mod jsonl;

use std::future::Future;

use thiserror::Error;

use crate::normalize::NormalizedEvent;

pub use jsonl::JsonLinesPublisher;

/// Errors that can occur while publishing.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The sink could not be opened.
    #[error("failed to open output {target}: {source}")]
    Open {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing to the sink failed.
    #[error("failed to write event: {0}")]
    Write(#[source] std::io::Error),

    /// The event could not be serialized.
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type for publisher operations.
pub type Result<T> = std::result::Result<T, PublishError>;

/// A sink that accepts events one at a time.
///
/// The supervisor is the only caller, so implementations need no internal
/// locking.
pub trait Publisher: Send {
    /// Delivers one event.
    fn publish(&mut self, event: NormalizedEvent) -> impl Future<Output = Result<()>> + Send;

    /// Flushes and releases the sink.
    fn close(self) -> impl Future<Output = Result<()>> + Send
    where
        Self: Sized;
}
