//! Memory-mapped file regions.
//!
//! `MappedFile` owns a file and a writable shared mapping of its full length.
//! Every access goes through bounds-checked accessors, so a bad offset read
//! from disk surfaces as `Error::Corruption` instead of touching memory
//! outside the mapping.
//!
//! ## Remapping
//!
//! Growing a file invalidates the old mapping. `grow()` takes `&mut self`,
//! so the borrow checker guarantees that no slice handed out by `bytes()` is
//! alive while the mapping is replaced.
//!
//! ## Durability
//!
//! The mapping is `MAP_SHARED`: stores become visible in the page cache
//! immediately and reach the disk through OS write-back. `flush()` and
//! `flush_range()` force the write-back (msync).

use crate::error::{Error, Result};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Page granularity used when rounding file sizes.
pub const PAGE_SIZE: usize = 4096;

/// Rounds `value` up to the next multiple of `multiple`.
pub fn round_up(value: usize, multiple: usize) -> usize {
    value.div_ceil(multiple) * multiple
}

/// A file mapped read-write into the address space.
#[derive(Debug)]
pub struct MappedFile {
    path: PathBuf,
    file: File,
    mmap: MmapMut,
}

impl MappedFile {
    /// Opens `path`, creating it with `initial_len` zero bytes if it does not
    /// exist or is empty.
    ///
    /// Returns the mapping and whether the file was freshly initialized.
    pub fn open_or_create<P: AsRef<Path>>(path: P, initial_len: usize) -> Result<(Self, bool)> {
        let path = path.as_ref().to_path_buf();
        if initial_len == 0 {
            return Err(Error::invalid_argument(format!(
                "cannot map {:?} with zero length",
                path
            )));
        }

        let file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;

        let created = file.metadata()?.len() == 0;
        if created {
            file.set_len(initial_len as u64)?;
        }

        let mmap = Self::map(&file)?;
        Ok((Self { path, file, mmap }, created))
    }

    /// Opens an existing, non-empty file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        if file.metadata()?.len() == 0 {
            return Err(Error::corruption(format!("{:?} is empty", path)));
        }

        let mmap = Self::map(&file)?;
        Ok(Self { path, file, mmap })
    }

    /// Creates (or truncates) `path` to exactly `len` zero bytes.
    pub fn create<P: AsRef<Path>>(path: P, len: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if len == 0 {
            return Err(Error::invalid_argument(format!(
                "cannot map {:?} with zero length",
                path
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(len as u64)?;

        let mmap = Self::map(&file)?;
        Ok(Self { path, file, mmap })
    }

    fn map(file: &File) -> Result<MmapMut> {
        // SAFETY: the mapping is owned by `MappedFile` together with the file
        // handle, is only reachable through bounds-checked accessors, and is
        // never resized while a borrow of it exists (`grow` takes `&mut self`).
        // The engine's files are not expected to be modified by other processes.
        let mmap = unsafe { MmapMut::map_mut(file)? };
        Ok(mmap)
    }

    /// Length of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns true if the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.mmap.len() => Ok(()),
            _ => Err(Error::corruption(format!(
                "range {}+{} out of bounds for {:?} ({} bytes)",
                offset,
                len,
                self.path,
                self.mmap.len()
            ))),
        }
    }

    /// Borrows `len` bytes starting at `offset`.
    pub fn bytes(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.check(offset, len)?;
        Ok(&self.mmap[offset..offset + len])
    }

    /// Mutably borrows `len` bytes starting at `offset`.
    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8]> {
        self.check(offset, len)?;
        Ok(&mut self.mmap[offset..offset + len])
    }

    /// Copies `data` into the mapping at `offset`.
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.bytes_mut(offset, data.len())?.copy_from_slice(data);
        Ok(())
    }

    /// Extends the file to `new_len` bytes and remaps it.
    ///
    /// Existing contents are preserved; the new tail is zero-filled. Does
    /// nothing if the file is already at least `new_len` bytes.
    pub fn grow(&mut self, new_len: usize) -> Result<()> {
        if new_len <= self.mmap.len() {
            return Ok(());
        }

        self.mmap.flush()?;
        self.file.set_len(new_len as u64)?;
        self.mmap = Self::map(&self.file)?;

        log::debug!("Remapped {:?} to {} bytes", self.path, new_len);
        Ok(())
    }

    /// Writes every dirty page of the mapping back to disk.
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }

    /// Writes the pages covering `offset..offset + len` back to disk.
    pub fn flush_range(&self, offset: usize, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        self.check(offset, len)?;
        self.mmap.flush_range(offset, len)?;
        Ok(())
    }
}
