//! Durable single-value storage for a stream's pagination cursor.
//!
//! The store is an append-only history file: every `set_value` appends one
//! line and fsyncs, and the last complete line is the current cursor. This
//! keeps each update to a single append, with no rename or rewrite on the hot
//! path.
//!
//! # Recovery
//!
//! On open, an oversized history is compacted (see [`super::compaction`]).
//! `get_value` then scans backward from the end of the file for the last
//! line, skipping one trailing terminator. An empty file yields an empty
//! string and the caller falls back to its configured starting cursor.
//!
//! # Ownership
//!
//! A store is owned by exactly one poller for the life of the process.
//! Concurrent writers to the same file are not supported.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use super::compaction::compact_if_needed;
use super::fsync::{fsync_file, fsync_parent};
use super::scan::{is_terminator, last_line_bounds, read_range};

/// Errors that can occur while reading or writing a cursor history file.
#[derive(Debug, Error)]
pub enum CursorStoreError {
    /// Failed to open or create the history file.
    #[error("failed to open cursor file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to compact an oversized history file.
    #[error("failed to compact cursor file {path}: {source}")]
    Compact {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to read the current cursor.
    #[error("failed to read cursor: {0}")]
    Read(#[source] io::Error),

    /// Failed to append or sync a cursor.
    #[error("failed to save cursor {value}: {source}")]
    Write {
        value: String,
        #[source]
        source: io::Error,
    },

    /// Failed to sync or release the file at shutdown.
    #[error("failed to close cursor file: {0}")]
    Close(#[source] io::Error),

    /// The last line of the file is not valid UTF-8.
    #[error("cursor file ends with a line that is not valid UTF-8")]
    InvalidUtf8,

    /// The value would split into more than one line.
    #[error("cursor value contains a line terminator")]
    EmbeddedTerminator,
}

/// Result type for cursor store operations.
pub type Result<T> = std::result::Result<T, CursorStoreError>;

/// Persistence for a single stream's resume point.
pub trait CursorStore: Send {
    /// Returns the most recently stored cursor, or an empty string if none.
    fn get_value(&mut self) -> Result<String>;

    /// Durably records `value` as the current cursor.
    ///
    /// Returns only after the value has reached stable storage.
    fn set_value(&mut self, value: &str) -> Result<()>;

    /// Releases the store.
    fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// A [`CursorStore`] backed by an append-only, self-compacting history file.
#[derive(Debug)]
pub struct HistoryFileStore {
    /// The history file, opened for read and append.
    file: File,
    /// Path to the history file.
    path: PathBuf,
}

impl HistoryFileStore {
    /// Opens the history file at `path`, creating it if absent.
    ///
    /// Files larger than the high-water mark are compacted before the handle
    /// is returned.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let existed = path.exists();

        let file = open_history(&path)?;
        if !existed {
            fsync_parent(&path).map_err(|source| CursorStoreError::Open {
                path: path.clone(),
                source,
            })?;
            debug!(path = %path.display(), "Created cursor history file");
        }

        let compacted =
            compact_if_needed(&path).map_err(|source| CursorStoreError::Compact {
                path: path.clone(),
                source,
            })?;

        // Compaction replaces the file by rename, so the old handle is stale.
        let file = if compacted {
            drop(file);
            open_history(&path)?
        } else {
            file
        };

        Ok(HistoryFileStore { file, path })
    }

    /// Returns the path to the history file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current size of the history file in bytes.
    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Returns true if no cursor has ever been stored.
    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl CursorStore for HistoryFileStore {
    fn get_value(&mut self) -> Result<String> {
        let len = self.len().map_err(CursorStoreError::Read)?;
        if len == 0 {
            return Ok(String::new());
        }

        let (start, end) = last_line_bounds(&mut self.file, len).map_err(CursorStoreError::Read)?;
        let line = read_range(&mut self.file, start, end).map_err(CursorStoreError::Read)?;
        String::from_utf8(line).map_err(|_| CursorStoreError::InvalidUtf8)
    }

    fn set_value(&mut self, value: &str) -> Result<()> {
        if value.bytes().any(is_terminator) {
            return Err(CursorStoreError::EmbeddedTerminator);
        }

        // One write call per line keeps a crash from interleaving partial lines.
        let mut line = Vec::with_capacity(value.len() + 1);
        line.extend_from_slice(value.as_bytes());
        line.push(b'\n');

        let to_error = |source| CursorStoreError::Write {
            value: value.to_string(),
            source,
        };
        self.file.write_all(&line).map_err(to_error)?;
        fsync_file(&self.file).map_err(to_error)?;
        Ok(())
    }

    fn close(self) -> Result<()> {
        fsync_file(&self.file).map_err(CursorStoreError::Close)?;
        debug!(path = %self.path.display(), "Closed cursor history file");
        Ok(())
    }
}

fn open_history(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .read(true)
        .open(path)
        .map_err(|source| CursorStoreError::Open {
            path: path.to_path_buf(),
            source,
        })
}
