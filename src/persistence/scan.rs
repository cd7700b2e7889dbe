//! Backward scanning over a line-oriented file.
//!
//! The cursor history only ever needs its last line, so these helpers read
//! fixed-size chunks from the end of the file instead of loading it whole.

use std::io::{self, Read, Seek, SeekFrom};

/// Size of each backward read.
const CHUNK_SIZE: u64 = 4096;

/// Returns true for the bytes treated as line terminators.
pub fn is_terminator(byte: u8) -> bool {
    byte == b'\n' || byte == b'\r'
}

/// Reads the byte range `[start, end)`.
pub fn read_range<R: Read + Seek>(reader: &mut R, start: u64, end: u64) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; (end - start) as usize];
    reader.seek(SeekFrom::Start(start))?;
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Finds the offset of the last terminator strictly before `end`.
pub fn rfind_terminator<R: Read + Seek>(reader: &mut R, end: u64) -> io::Result<Option<u64>> {
    let mut chunk_end = end;
    while chunk_end > 0 {
        let chunk_start = chunk_end.saturating_sub(CHUNK_SIZE);
        let chunk = read_range(reader, chunk_start, chunk_end)?;
        if let Some(idx) = chunk.iter().rposition(|b| is_terminator(*b)) {
            return Ok(Some(chunk_start + idx as u64));
        }
        chunk_end = chunk_start;
    }
    Ok(None)
}

/// Returns `end` with one trailing line terminator removed, if present.
///
/// `\r\n` counts as a single terminator.
pub fn strip_trailing_terminator<R: Read + Seek>(reader: &mut R, end: u64) -> io::Result<u64> {
    if end == 0 {
        return Ok(0);
    }
    let tail_start = end.saturating_sub(2);
    let tail = read_range(reader, tail_start, end)?;
    let stripped = match tail.as_slice() {
        [.., b'\r', b'\n'] => 2,
        [.., last] if is_terminator(*last) => 1,
        _ => 0,
    };
    Ok(end - stripped)
}

/// Returns the byte range `[start, end)` of the last line of a file of length
/// `len`, excluding its terminator.
pub fn last_line_bounds<R: Read + Seek>(reader: &mut R, len: u64) -> io::Result<(u64, u64)> {
    let end = strip_trailing_terminator(reader, len)?;
    let start = match rfind_terminator(reader, end)? {
        Some(pos) => pos + 1,
        None => 0,
    };
    Ok((start, end))
}
