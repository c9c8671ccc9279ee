//! Engine manifest.
//!
//! A small JSON document at `{db_dir}/MANIFEST` that pins the parameters
//! which decide where data lives: the shard count (routing) and the segment
//! size (segment file length). Both are fixed when the database is created;
//! a reopen with different options uses the recorded values.

use crate::config::{Options, MAX_SHARD_COUNT};
use crate::error::{Error, Result};
use crate::paths::MANIFEST_FILENAME;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Parameters recorded when a database is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Layout version of the database files
    pub format_version: u32,
    /// Number of shards
    pub shard_count: usize,
    /// Capacity of each value segment
    pub segment_size: usize,
}

impl Manifest {
    /// Manifest describing a new database opened with `options`.
    pub fn from_options(options: &Options) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            shard_count: options.shard_count,
            segment_size: options.segment_size,
        }
    }

    /// Read the manifest in `db_dir`, or `None` if there is none yet.
    pub fn load(db_dir: &Path) -> Result<Option<Self>> {
        let path = db_dir.join(MANIFEST_FILENAME);
        if !path.exists() {
            return Ok(None);
        }

        let data = fs::read(&path)?;
        let manifest: Manifest = serde_json::from_slice(&data)?;
        manifest.validate()?;
        Ok(Some(manifest))
    }

    /// Write the manifest into `db_dir`, replacing any previous one.
    pub fn store(&self, db_dir: &Path) -> Result<()> {
        let path = db_dir.join(MANIFEST_FILENAME);
        let tmp = db_dir.join(format!("{}.tmp", MANIFEST_FILENAME));

        {
            let mut file = File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut file, self)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        log::info!("Wrote manifest {:?}: {:?}", path, self);
        Ok(())
    }

    /// Check that the recorded values describe a database this build can open.
    pub fn validate(&self) -> Result<()> {
        if self.format_version != FORMAT_VERSION {
            return Err(Error::corruption(format!(
                "manifest: unsupported format version {}",
                self.format_version
            )));
        }
        if self.shard_count == 0 || !self.shard_count.is_power_of_two() {
            return Err(Error::corruption(format!(
                "manifest: shard count {} is not a power of two",
                self.shard_count
            )));
        }
        if self.shard_count > MAX_SHARD_COUNT {
            return Err(Error::corruption(format!(
                "manifest: shard count {} exceeds {}",
                self.shard_count, MAX_SHARD_COUNT
            )));
        }
        if self.segment_size == 0 || self.segment_size > u32::MAX as usize {
            return Err(Error::corruption(format!(
                "manifest: invalid segment size {}",
                self.segment_size
            )));
        }
        Ok(())
    }

    /// Load the manifest of an existing database, or record `options` for a
    /// new one. Returns the options to open the shards with.
    ///
    /// Recorded values override the caller's `shard_count` and
    /// `segment_size`; a mismatch is logged.
    pub fn load_or_create(db_dir: &Path, options: &Options) -> Result<(Self, Options)> {
        let mut effective = options.clone();

        match Self::load(db_dir)? {
            Some(manifest) => {
                if manifest.shard_count != options.shard_count {
                    log::warn!(
                        "Options request {} shards but {:?} was created with {}; using {}",
                        options.shard_count,
                        db_dir,
                        manifest.shard_count,
                        manifest.shard_count
                    );
                }
                if manifest.segment_size != options.segment_size {
                    log::warn!(
                        "Options request segment size {} but {:?} was created with {}; using {}",
                        options.segment_size,
                        db_dir,
                        manifest.segment_size,
                        manifest.segment_size
                    );
                }
                effective.shard_count = manifest.shard_count;
                effective.segment_size = manifest.segment_size;
                Ok((manifest, effective))
            }
            None => {
                let manifest = Self::from_options(options);
                manifest.store(db_dir)?;
                Ok((manifest, effective))
            }
        }
    }
}
