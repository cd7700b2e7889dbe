//! Open-time compaction of cursor history files.
//!
//! Every fetched page appends one line to its stream's history file, so a
//! long-running agent grows the file without bound. When a file is opened and
//! found larger than [`HIGH_WATER`], it is rewritten to hold only its most
//! recent [`LOW_WATER`] bytes, realigned so that it starts on a line boundary.
//!
//! The low-water mark is a target rather than a hard limit: the partial first
//! line inside the tail window is dropped, and if the last line alone is longer
//! than the window it is kept whole.
//!
//! # Crash Safety
//!
//! The retained tail is written to a sibling temp file, synced, and renamed over
//! the history file before the parent directory is synced. A crash at any point
//! leaves either the full old file or the complete compacted one.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::fsync::{fsync_file, fsync_parent};
use super::scan::{is_terminator, last_line_bounds, read_range};

/// Rough upper estimate of a single cursor line in bytes.
pub const CURSOR_LENGTH: u64 = 200;

/// File size above which a history file is compacted on open.
pub const HIGH_WATER: u64 = CURSOR_LENGTH * 1000;

/// Target size of a history file after compaction.
pub const LOW_WATER: u64 = CURSOR_LENGTH * 100;

/// Returns true if a file of `len` bytes should be compacted.
pub fn should_compact(len: u64) -> bool {
    len > HIGH_WATER
}

/// Computes the offset from which a file of length `len` is retained when
/// keeping roughly its last `keep` bytes.
///
/// The result always lies on a line boundary and never past the start of
/// the file's last line.
pub fn retain_offset(file: &mut File, len: u64, keep: u64) -> io::Result<u64> {
    let window_start = len.saturating_sub(keep);
    if window_start == 0 {
        return Ok(0);
    }

    let (last_start, _) = last_line_bounds(file, len)?;
    if last_start <= window_start {
        return Ok(last_start);
    }

    // A terminator sits at `last_start - 1`, so one exists in the window.
    let window = read_range(file, window_start, last_start)?;
    let first = window
        .iter()
        .position(|b| is_terminator(*b))
        .map(|idx| window_start + idx as u64)
        .unwrap_or(last_start - 1);

    let mut offset = first + 1;
    if window.get((first - window_start) as usize) == Some(&b'\r')
        && window.get((offset - window_start) as usize) == Some(&b'\n')
    {
        offset += 1;
    }
    Ok(offset)
}

/// Rewrites the file at `path` to hold only roughly its last `keep` bytes.
///
/// Returns the number of bytes retained. Callers must not hold an open handle
/// they intend to keep using; the file is replaced by rename.
pub fn compact(path: &Path, keep: u64) -> io::Result<u64> {
    let mut file = OpenOptions::new().read(true).open(path)?;
    let len = file.metadata()?.len();

    let offset = retain_offset(&mut file, len, keep)?;
    let retained = read_range(&mut file, offset, len)?;
    drop(file);

    let tmp_path = compaction_tmp_path(path);
    {
        let mut tmp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(&retained)?;
        fsync_file(&tmp)?;
    }

    std::fs::rename(&tmp_path, path)?;
    fsync_parent(path)?;

    info!(
        path = %path.display(),
        before = len,
        after = retained.len(),
        "Compacted cursor history file"
    );
    Ok(retained.len() as u64)
}

/// Compacts the file at `path` down to [`LOW_WATER`] if it exceeds
/// [`HIGH_WATER`]. Returns true if compaction ran.
pub fn compact_if_needed(path: &Path) -> io::Result<bool> {
    let len = std::fs::metadata(path)?.len();
    if !should_compact(len) {
        debug!(path = %path.display(), len, "Cursor history below high-water mark");
        return Ok(false);
    }
    compact(path, LOW_WATER)?;
    Ok(true)
}

fn compaction_tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".compact.tmp");
    path.with_file_name(name)
}
