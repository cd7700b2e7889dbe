//! fsync helpers for the cursor files.
//!
//! A cursor only counts as persisted once both its bytes and, for newly
//! created or renamed files, the parent directory entry have reached disk.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Flushes a file's contents and metadata to stable storage.
pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Flushes a directory so that entries created or renamed inside it survive
/// a power loss.
///
/// An empty path (a bare file name relative to the working directory) syncs
/// the current directory.
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    let dir_path = if dir_path.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir_path
    };
    let dir = OpenOptions::new().read(true).open(dir_path)?;
    dir.sync_all()
}

/// Syncs the parent directory of `path`, if it has one.
pub fn fsync_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => fsync_dir(parent),
        None => Ok(()),
    }
}
