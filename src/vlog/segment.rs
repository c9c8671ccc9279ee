//! A fixed-capacity, memory-mapped value segment.

use crate::error::{Error, Result};
use crate::mmap::MappedFile;
use std::path::Path;

/// One append-only data file of a value store.
///
/// The file is sized to its full capacity when created, so every byte of
/// the mapping is valid from the start; the value store tracks how much of
/// it is in use.
#[derive(Debug)]
pub struct Segment {
    id: u32,
    file: MappedFile,
}

impl Segment {
    /// Create a new zero-filled segment of `capacity` bytes.
    ///
    /// A stale file at `path` (left behind by a crash before the metadata
    /// recorded it) is truncated.
    pub fn create(path: &Path, id: u32, capacity: usize) -> Result<Self> {
        let file = MappedFile::create(path, capacity)?;
        Ok(Self { id, file })
    }

    /// Open an existing segment and check its capacity.
    pub fn open(path: &Path, id: u32, capacity: usize) -> Result<Self> {
        let file = MappedFile::open(path)?;
        if file.len() != capacity {
            return Err(Error::corruption(format!(
                "segment {:?} is {} bytes, expected {}",
                path,
                file.len(),
                capacity
            )));
        }
        Ok(Self { id, file })
    }

    /// Segment number
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Capacity in bytes
    pub fn capacity(&self) -> usize {
        self.file.len()
    }

    /// Copy `data` into the segment at `offset`.
    pub fn write(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        self.file.write_at(offset as usize, data)
    }

    /// Borrow `len` bytes at `offset`.
    pub fn read(&self, offset: u32, len: u16) -> Result<&[u8]> {
        self.file.bytes(offset as usize, len as usize)
    }

    /// Sync the pages holding `offset..offset + len`.
    pub fn flush_range(&self, offset: u32, len: u16) -> Result<()> {
        self.file.flush_range(offset as usize, len as usize)
    }

    /// Sync the whole segment.
    pub fn flush(&self) -> Result<()> {
        self.file.flush()
    }
}
