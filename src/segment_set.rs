//! Open file handles for every known segment.
//!
//! Every segment — active and immutable — is held open for the lifetime of
//! the engine. This trades file-descriptor pressure for lookup latency and
//! pins file identity against concurrent filesystem mutations external to
//! the engine; compaction is the primary tool for keeping the segment count
//! small under normal operation.

use crate::error::{CaskError, CaskResult};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A single open, seekable segment file.
#[derive(Debug)]
struct SegmentFile {
    path: PathBuf,
    file: File,
}

/// Holds one open file handle per known segment id.
#[derive(Debug, Default)]
pub struct SegmentSet {
    handles: HashMap<u64, SegmentFile>,
}

impl SegmentSet {
    /// Creates an empty segment set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handles: HashMap::new(),
        }
    }

    /// Opens the file at `path` for segment `id` in read+write mode,
    /// creating it if missing, and inserts the handle.
    pub fn open(&mut self, id: u64, path: &Path) -> CaskResult<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        self.handles.insert(
            id,
            SegmentFile {
                path: path.to_path_buf(),
                file,
            },
        );
        Ok(())
    }

    /// Flushes and removes the handle for `id`, if present.
    pub fn close(&mut self, id: u64) -> CaskResult<()> {
        if let Some(mut segment) = self.handles.remove(&id) {
            segment.file.flush()?;
        }
        Ok(())
    }

    /// Flushes every open handle.
    pub fn flush_all(&mut self) -> CaskResult<()> {
        for segment in self.handles.values_mut() {
            segment.file.flush()?;
        }
        Ok(())
    }

    /// Truncates segment `id`'s file to exactly `len` bytes, discarding any
    /// trailing bytes beyond it. Used to drop a crash-truncated tail record
    /// that replay could not fully decode.
    ///
    /// # Errors
    ///
    /// Returns [`CaskError::NotOpen`] if `id` has no open handle.
    pub fn truncate(&mut self, id: u64, len: u64) -> CaskResult<()> {
        let segment = self.require_mut(id)?;
        segment.file.set_len(len)?;
        segment.file.seek(SeekFrom::End(0))?;
        Ok(())
    }

    /// Returns the current length in bytes of segment `id`'s file.
    ///
    /// # Errors
    ///
    /// Returns [`CaskError::NotOpen`] if `id` has no open handle.
    pub fn len(&self, id: u64) -> CaskResult<u64> {
        let segment = self.require(id)?;
        Ok(segment.file.metadata()?.len())
    }

    /// Appends `data` to segment `id` at its current end-of-file, returning
    /// the offset at which it was written.
    ///
    /// # Errors
    ///
    /// Returns [`CaskError::NotOpen`] if `id` has no open handle.
    pub fn append(&mut self, id: u64, data: &[u8]) -> CaskResult<u64> {
        let segment = self.require_mut(id)?;
        let offset = segment.file.seek(SeekFrom::End(0))?;
        segment.file.write_all(data)?;
        Ok(offset)
    }

    /// Reads exactly `len` bytes from segment `id` starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`CaskError::NotOpen`] if `id` has no open handle, or an I/O
    /// error if fewer than `len` bytes are available.
    pub fn read_at(&mut self, id: u64, offset: u64, len: usize) -> CaskResult<Vec<u8>> {
        let segment = self.require_mut(id)?;
        segment.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        segment.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Returns the path of segment `id`'s file.
    ///
    /// # Errors
    ///
    /// Returns [`CaskError::NotOpen`] if `id` has no open handle.
    pub fn path_of(&self, id: u64) -> CaskResult<&Path> {
        Ok(&self.require(id)?.path)
    }

    fn require(&self, id: u64) -> CaskResult<&SegmentFile> {
        self.handles
            .get(&id)
            .ok_or(CaskError::NotOpen { segment_id: id })
    }

    fn require_mut(&mut self, id: u64) -> CaskResult<&mut SegmentFile> {
        self.handles
            .get_mut(&id)
            .ok_or(CaskError::NotOpen { segment_id: id })
    }
}
