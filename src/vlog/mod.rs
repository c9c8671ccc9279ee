//! Append-only value store.
//!
//! Every shard keeps its values in a log of fixed-size segments. A write
//! appends the value to the active segment and yields a `Location`; the
//! index maps keys to these locations.
//!
//! ## Layout
//!
//! - **Metadata**: `<prefix>.metadata`, a 12-byte record (see `Metadata`)
//! - **Segments**: `<prefix>.<n>.data`, each exactly `segment_size` bytes
//!
//! ## Invariants
//!
//! - Segments are numbered densely `0..segment_count`; the last one is active
//! - A value is never split across segments: when it does not fit behind
//!   `write_offset`, a new segment is allocated first
//! - Bytes below `write_offset` are never rewritten
//!
//! Overwritten values stay in their segments; there is no compaction.

pub mod metadata;
pub mod segment;

pub use metadata::{Metadata, METADATA_SIZE};
pub use segment::Segment;

use crate::error::{Error, Result};
use crate::mmap::MappedFile;
use crate::paths;
use bytes::{Buf, BufMut};
use std::path::{Path, PathBuf};

/// Where a value lives: segment number, byte offset and length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    /// Segment number
    pub segment: i32,
    /// Byte offset within the segment
    pub offset: u32,
    /// Value length in bytes
    pub length: u16,
}

impl Location {
    /// Size of an encoded location.
    pub const ENCODED_SIZE: usize = 10;

    /// Segment number of the on-disk "absent" sentinel.
    pub const ABSENT_SEGMENT: i32 = -1;

    /// Create a new location
    pub fn new(segment: i32, offset: u32, length: u16) -> Self {
        Self { segment, offset, length }
    }

    /// Encode as `[segment: i32][offset: u32][length: u16]`, little-endian.
    pub fn encode_into(&self, mut buf: &mut [u8]) {
        buf.put_i32_le(self.segment);
        buf.put_u32_le(self.offset);
        buf.put_u16_le(self.length);
    }

    /// Decode a location; the sentinel segment decodes to `None`.
    pub fn decode(mut data: &[u8]) -> Result<Option<Self>> {
        if data.len() < Self::ENCODED_SIZE {
            return Err(Error::corruption("Location too short"));
        }

        let segment = data.get_i32_le();
        let offset = data.get_u32_le();
        let length = data.get_u16_le();

        if segment == Self::ABSENT_SEGMENT {
            return Ok(None);
        }
        if segment < 0 {
            return Err(Error::corruption(format!("Invalid segment number {}", segment)));
        }
        Ok(Some(Self { segment, offset, length }))
    }
}

/// The per-shard value log.
pub struct ValueStore {
    prefix: PathBuf,
    metadata_file: MappedFile,
    metadata: Metadata,
    segments: Vec<Segment>,
    segment_size: usize,
    max_segments: u32,
}

impl ValueStore {
    /// Open the value store under `prefix`, creating it if needed.
    ///
    /// A new store starts with segment 0 allocated. An existing store maps
    /// every segment recorded in its metadata.
    pub fn open(prefix: &Path, segment_size: usize, max_segments: u32) -> Result<Self> {
        let prefix = prefix.to_path_buf();
        let (metadata_file, created) =
            MappedFile::open_or_create(paths::metadata_path(&prefix), METADATA_SIZE)?;

        let metadata = if created {
            Metadata::default()
        } else {
            let metadata = Metadata::load(&metadata_file)?;
            metadata.validate(segment_size)?;
            metadata
        };

        let mut segments = Vec::with_capacity(metadata.segment_count as usize);
        for id in 0..metadata.segment_count {
            segments.push(Segment::open(&paths::segment_path(&prefix, id), id, segment_size)?);
        }

        let mut store =
            Self { prefix, metadata_file, metadata, segments, segment_size, max_segments };

        if store.segments.is_empty() {
            // Fresh store, or a crash between metadata creation and the
            // first segment allocation.
            store.metadata = Metadata::default();
            store.allocate_segment()?;
        } else {
            let last = store.metadata.segment_count - 1;
            if store.metadata.active_segment != last {
                log::warn!(
                    "{:?}: active segment {} is not the last segment {}, using the last",
                    store.prefix,
                    store.metadata.active_segment,
                    last
                );
                store.metadata.active_segment = last;
                store.metadata.store(&mut store.metadata_file)?;
            }
        }

        log::debug!(
            "Opened value store {:?}: {} segments, offset {}",
            store.prefix,
            store.metadata.segment_count,
            store.metadata.write_offset
        );

        Ok(store)
    }

    /// Allocate the next segment and make it active.
    fn allocate_segment(&mut self) -> Result<()> {
        let id = self.metadata.segment_count;
        if id >= self.max_segments {
            return Err(Error::storage_full(format!(
                "{:?}: segment limit {} reached",
                self.prefix, self.max_segments
            )));
        }

        let segment = Segment::create(&paths::segment_path(&self.prefix, id), id, self.segment_size)?;
        self.segments.push(segment);

        // The file exists before the metadata refers to it.
        self.metadata = Metadata { segment_count: id + 1, active_segment: id, write_offset: 0 };
        self.metadata.store(&mut self.metadata_file)?;

        log::info!("Allocated segment {} for {:?}", id, self.prefix);
        Ok(())
    }

    /// Append a value and return its location.
    ///
    /// # Errors
    ///
    /// - `ValueTooLarge` if the value exceeds 65535 bytes or one segment
    /// - `StorageFull` if a new segment is needed but the limit is reached
    /// - `Io` if the segment file cannot be created or mapped
    pub fn append(&mut self, value: &[u8]) -> Result<Location> {
        let max = self.max_value_size();
        if value.len() > max {
            return Err(Error::ValueTooLarge { len: value.len(), max });
        }

        if self.metadata.write_offset as usize + value.len() > self.segment_size {
            self.allocate_segment()?;
        }

        let segment = self.metadata.active_segment;
        let offset = self.metadata.write_offset;
        self.segments[segment as usize].write(offset, value)?;

        // Value bytes land before the offset that makes them reachable.
        self.metadata.write_offset = offset + value.len() as u32;
        self.metadata.store(&mut self.metadata_file)?;

        Ok(Location::new(segment as i32, offset, value.len() as u16))
    }

    /// Copy the value at `location` out of its segment.
    pub fn read(&self, location: Location) -> Result<Vec<u8>> {
        Ok(self.get(location)?.to_vec())
    }

    /// Borrow the value at `location`.
    pub fn get(&self, location: Location) -> Result<&[u8]> {
        let segment = usize::try_from(location.segment)
            .ok()
            .and_then(|id| self.segments.get(id))
            .ok_or_else(|| {
                Error::corruption(format!(
                    "{:?}: location refers to missing segment {}",
                    self.prefix, location.segment
                ))
            })?;

        let end = location.offset as u64 + location.length as u64;
        if location.segment as u32 == self.metadata.active_segment
            && end > self.metadata.write_offset as u64
        {
            return Err(Error::corruption(format!(
                "{:?}: location {:?} beyond write offset {}",
                self.prefix, location, self.metadata.write_offset
            )));
        }

        segment.read(location.offset, location.length)
    }

    /// Sync the bytes of one appended value together with the metadata.
    pub fn sync_value(&self, location: Location) -> Result<()> {
        if let Some(segment) = usize::try_from(location.segment)
            .ok()
            .and_then(|id| self.segments.get(id))
        {
            segment.flush_range(location.offset, location.length)?;
        }
        self.metadata_file.flush()
    }

    /// Sync every segment and the metadata.
    pub fn flush(&self) -> Result<()> {
        for segment in &self.segments {
            segment.flush()?;
        }
        self.metadata_file.flush()
    }

    /// Largest value `append` accepts.
    pub fn max_value_size(&self) -> usize {
        self.segment_size.min(u16::MAX as usize)
    }

    /// Current metadata record
    pub fn metadata(&self) -> Metadata {
        self.metadata
    }

    /// Number of allocated segments
    pub fn segment_count(&self) -> u32 {
        self.metadata.segment_count
    }

    /// Bytes appended across all segments, excluding unused segment tails.
    pub fn bytes_used(&self) -> u64 {
        // Earlier segments count as full even though a value that did not
        // fit may have left slack at their end.
        (self.metadata.segment_count as u64 - 1) * self.segment_size as u64
            + self.metadata.write_offset as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_location_encoding() {
        let loc = Location::new(5, 1234, 77);
        let mut buf = [0u8; Location::ENCODED_SIZE];
        loc.encode_into(&mut buf);
        assert_eq!(Location::decode(&buf).unwrap(), Some(loc));

        Location::new(Location::ABSENT_SEGMENT, 0, 0).encode_into(&mut buf);
        assert_eq!(Location::decode(&buf).unwrap(), None);

        Location::new(-7, 0, 0).encode_into(&mut buf);
        assert!(Location::decode(&buf).is_err());
    }

    #[test]
    fn test_new_store_allocates_first_segment() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("000");
        let store = ValueStore::open(&prefix, 1024, 16).unwrap();

        assert_eq!(
            store.metadata(),
            Metadata { segment_count: 1, active_segment: 0, write_offset: 0 }
        );
        assert!(paths::segment_path(&prefix, 0).exists());
        assert!(paths::metadata_path(&prefix).exists());
    }

    #[test]
    fn test_append_and_read() {
        let dir = tempdir().unwrap();
        let mut store = ValueStore::open(&dir.path().join("000"), 1024, 16).unwrap();

        let a = store.append(b"first").unwrap();
        let b = store.append(b"second value").unwrap();
        let empty = store.append(b"").unwrap();

        assert_eq!(a, Location::new(0, 0, 5));
        assert_eq!(b, Location::new(0, 5, 12));
        assert_eq!(empty, Location::new(0, 17, 0));

        assert_eq!(store.read(a).unwrap(), b"first");
        assert_eq!(store.read(b).unwrap(), b"second value");
        assert_eq!(store.read(empty).unwrap(), b"");
        assert_eq!(store.bytes_used(), 17);
    }

    #[test]
    fn test_value_never_spans_segments() {
        let dir = tempdir().unwrap();
        let mut store = ValueStore::open(&dir.path().join("000"), 100, 16).unwrap();

        let first = store.append(&[1u8; 60]).unwrap();
        let second = store.append(&[2u8; 60]).unwrap();

        assert_eq!(first, Location::new(0, 0, 60));
        assert_eq!(second, Location::new(1, 0, 60));
        assert_eq!(store.segment_count(), 2);
        assert_eq!(store.read(second).unwrap(), vec![2u8; 60]);

        // Exactly filling the segment does not allocate.
        let third = store.append(&[3u8; 40]).unwrap();
        assert_eq!(third, Location::new(1, 60, 40));
        assert_eq!(store.segment_count(), 2);
    }

    #[test]
    fn test_rejects_oversized_values() {
        let dir = tempdir().unwrap();
        let mut store = ValueStore::open(&dir.path().join("000"), 100, 16).unwrap();
        assert!(matches!(
            store.append(&[0u8; 101]),
            Err(Error::ValueTooLarge { len: 101, max: 100 })
        ));

        let mut store = ValueStore::open(&dir.path().join("001"), 1 << 20, 16).unwrap();
        assert!(matches!(
            store.append(&vec![0u8; 65536]),
            Err(Error::ValueTooLarge { len: 65536, max: 65535 })
        ));
        assert!(store.append(&vec![0u8; 65535]).is_ok());
    }

    #[test]
    fn test_segment_limit() {
        let dir = tempdir().unwrap();
        let mut store = ValueStore::open(&dir.path().join("000"), 10, 2).unwrap();

        store.append(&[0u8; 10]).unwrap();
        store.append(&[0u8; 10]).unwrap();
        assert!(matches!(store.append(&[0u8; 1]), Err(Error::StorageFull(_))));

        // The failed append left the store untouched.
        assert_eq!(store.segment_count(), 2);
        assert_eq!(store.metadata().write_offset, 10);
    }

    #[test]
    fn test_reopen_with_lower_segment_limit() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("000");

        let locations: Vec<Location> = {
            let mut store = ValueStore::open(&prefix, 100, 16).unwrap();
            (0..3u8).map(|i| store.append(&[i; 100]).unwrap()).collect()
        };

        let mut store = ValueStore::open(&prefix, 100, 2).unwrap();
        assert_eq!(store.segment_count(), 3);
        for (i, location) in locations.iter().enumerate() {
            assert_eq!(store.read(*location).unwrap(), vec![i as u8; 100]);
        }

        assert!(matches!(store.append(&[9u8; 1]), Err(Error::StorageFull(_))));
        assert_eq!(store.segment_count(), 3);
    }

    #[test]
    fn test_reopen_restores_state() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("000");

        let (a, b) = {
            let mut store = ValueStore::open(&prefix, 64, 16).unwrap();
            let a = store.append(&[7u8; 50]).unwrap();
            let b = store.append(&[8u8; 50]).unwrap();
            store.flush().unwrap();
            (a, b)
        };

        let mut store = ValueStore::open(&prefix, 64, 16).unwrap();
        assert_eq!(store.segment_count(), 2);
        assert_eq!(store.metadata().write_offset, 50);
        assert_eq!(store.read(a).unwrap(), vec![7u8; 50]);
        assert_eq!(store.read(b).unwrap(), vec![8u8; 50]);

        let c = store.append(b"more").unwrap();
        assert_eq!(c, Location::new(1, 50, 4));
    }

    #[test]
    fn test_read_rejects_bad_locations() {
        let dir = tempdir().unwrap();
        let mut store = ValueStore::open(&dir.path().join("000"), 64, 16).unwrap();
        store.append(b"abc").unwrap();

        assert!(matches!(store.read(Location::new(3, 0, 1)), Err(Error::Corruption(_))));
        assert!(matches!(store.read(Location::new(0, 2, 5)), Err(Error::Corruption(_))));
        assert!(matches!(store.read(Location::new(-1, 0, 1)), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_missing_segment_file_is_corruption() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("000");
        {
            let mut store = ValueStore::open(&prefix, 16, 16).unwrap();
            store.append(&[1u8; 16]).unwrap();
            store.append(&[1u8; 16]).unwrap();
        }
        std::fs::remove_file(paths::segment_path(&prefix, 1)).unwrap();

        assert!(ValueStore::open(&prefix, 16, 16).is_err());
    }
}
