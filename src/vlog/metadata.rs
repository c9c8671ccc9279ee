//! Persisted value-store metadata.
//!
//! The metadata file holds one fixed 12-byte record:
//!
//! ```text
//! [segment_count: u32][active_segment: u32][write_offset: u32]
//! ```
//!
//! All fields are little-endian. The record is decoded once on open, kept in
//! memory, and re-encoded as a whole after every mutation.

use crate::error::{Error, Result};
use crate::mmap::MappedFile;
use bytes::{Buf, BufMut};

/// Size of the encoded metadata record.
pub const METADATA_SIZE: usize = 12;

/// Segment bookkeeping of one value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Metadata {
    /// Number of allocated segments.
    pub segment_count: u32,
    /// Segment currently receiving writes.
    pub active_segment: u32,
    /// Next free byte in the active segment.
    pub write_offset: u32,
}

impl Metadata {
    /// Encode the record (12 bytes)
    pub fn encode(&self) -> [u8; METADATA_SIZE] {
        let mut buf = [0u8; METADATA_SIZE];
        let mut out = &mut buf[..];
        out.put_u32_le(self.segment_count);
        out.put_u32_le(self.active_segment);
        out.put_u32_le(self.write_offset);
        buf
    }

    /// Decode a record from bytes
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < METADATA_SIZE {
            return Err(Error::corruption(format!(
                "Metadata too short: {} bytes",
                data.len()
            )));
        }

        Ok(Self {
            segment_count: data.get_u32_le(),
            active_segment: data.get_u32_le(),
            write_offset: data.get_u32_le(),
        })
    }

    /// Read the record from the start of a mapped file.
    pub fn load(file: &MappedFile) -> Result<Self> {
        Self::decode(file.bytes(0, METADATA_SIZE)?)
    }

    /// Write the record to the start of a mapped file.
    pub fn store(&self, file: &mut MappedFile) -> Result<()> {
        file.write_at(0, &self.encode())
    }

    /// Checks the record against the store's segment size.
    ///
    /// The segment limit is not checked here: it only bounds growth, so a
    /// store opened with a lower limit than it already uses stays readable.
    pub fn validate(&self, segment_size: usize) -> Result<()> {
        if self.segment_count > i32::MAX as u32 {
            return Err(Error::corruption(format!(
                "segment count {} not addressable",
                self.segment_count
            )));
        }
        if self.write_offset as usize > segment_size {
            return Err(Error::corruption(format!(
                "write offset {} beyond segment size {}",
                self.write_offset, segment_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_metadata_layout() {
        let meta = Metadata { segment_count: 3, active_segment: 2, write_offset: 0x0102_0304 };
        let encoded = meta.encode();

        assert_eq!(&encoded[0..4], &3u32.to_le_bytes());
        assert_eq!(&encoded[4..8], &2u32.to_le_bytes());
        assert_eq!(&encoded[8..12], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(Metadata::decode(&encoded).unwrap(), meta);
    }

    #[test]
    fn test_decode_too_short() {
        assert!(matches!(Metadata::decode(&[0u8; 11]), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_load_and_store() {
        let dir = tempdir().unwrap();
        let mut file = MappedFile::create(dir.path().join("meta"), METADATA_SIZE).unwrap();

        assert_eq!(Metadata::load(&file).unwrap(), Metadata::default());

        let meta = Metadata { segment_count: 1, active_segment: 0, write_offset: 99 };
        meta.store(&mut file).unwrap();
        assert_eq!(Metadata::load(&file).unwrap(), meta);
    }

    #[test]
    fn test_validate() {
        let meta = Metadata { segment_count: 2, active_segment: 1, write_offset: 100 };
        assert!(meta.validate(100).is_ok());
        assert!(meta.validate(99).is_err());

        let meta = Metadata { segment_count: u32::MAX, active_segment: 0, write_offset: 0 };
        assert!(meta.validate(100).is_err());
    }
}
