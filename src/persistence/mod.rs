//! Persistence layer for per-stream pagination cursors.
//!
//! Each enabled stream owns one cursor history file. The file is append-only
//! and every update is fsynced before the poller requests the next page, so a
//! crash can cost at most one re-delivered page and never a skipped one.
//!
//! # File Layout
//!
//! ```text
//! <cursor_state_file>       # one cursor per line, most recent last
//! <cursor_state_file>.compact.tmp   # only present mid-compaction
//! ```
//!
//! # Crash Safety
//!
//! - Appends: one write per line, followed by fsync
//! - Compaction: write-to-temp-then-rename with a directory fsync
//! - Creation: the parent directory is fsynced when a new file is created

pub mod compaction;
pub mod cursor_store;
pub mod fsync;
pub mod scan;

pub use compaction::{HIGH_WATER, LOW_WATER, compact_if_needed, should_compact};
pub use cursor_store::{CursorStore, CursorStoreError, HistoryFileStore};
pub use fsync::{fsync_dir, fsync_file, fsync_parent};
