//! Newline-delimited JSON output.

use std::path::Path;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};
use tracing::debug;

use super::{PublishError, Publisher, Result};
use crate::normalize::NormalizedEvent;

enum Sink {
    Stdout(Stdout),
    File(File),
}

/// Writes one JSON document per line to stdout or an append-only file.
///
/// Every event is flushed before `publish` returns.
pub struct JsonLinesPublisher {
    sink: Sink,
    written: u64,
}

impl JsonLinesPublisher {
    /// Publishes to the process's standard output.
    pub fn stdout() -> Self {
        Self {
            sink: Sink::Stdout(tokio::io::stdout()),
            written: 0,
        }
    }

    /// Publishes to `path`, creating it if needed and appending otherwise.
    pub async fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|source| PublishError::Open {
                target: path.display().to_string(),
                source,
            })?;
        Ok(Self {
            sink: Sink::File(file),
            written: 0,
        })
    }

    /// Number of events written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    fn writer(&mut self) -> &mut (dyn AsyncWrite + Send + Unpin) {
        match &mut self.sink {
            Sink::Stdout(out) => out,
            Sink::File(file) => file,
        }
    }
}

impl Publisher for JsonLinesPublisher {
    async fn publish(&mut self, event: NormalizedEvent) -> Result<()> {
        let mut line = serde_json::to_vec(&event.to_document())?;
        line.push(b'\n');

        let writer = self.writer();
        writer.write_all(&line).await.map_err(PublishError::Write)?;
        writer.flush().await.map_err(PublishError::Write)?;
        self.written += 1;
        Ok(())
    }

    async fn close(mut self) -> Result<()> {
        self.writer().flush().await.map_err(PublishError::Write)?;
        if let Sink::File(file) = &self.sink {
            file.sync_all().await.map_err(PublishError::Write)?;
        }
        debug!(events = self.written, "Publisher closed");
        Ok(())
    }
}
