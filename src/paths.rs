//! File naming for the on-disk layout.
//!
//! ```text
//! {db_dir}/
//!   MANIFEST                 engine manifest (JSON)
//!   000.metadata             value-store metadata of shard 0
//!   000.000000.data          segment 0 of shard 0
//!   000.000001.data          segment 1 of shard 0
//!   000.index                index node arena of shard 0
//!   001.metadata
//!   ...
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Name of the engine manifest inside the database directory.
pub const MANIFEST_FILENAME: &str = "MANIFEST";

/// Path prefix shared by every file of one shard.
pub fn shard_prefix(db_dir: &Path, shard_id: usize) -> PathBuf {
    db_dir.join(format!("{:03}", shard_id))
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(prefix.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Value-store metadata file of a shard.
pub fn metadata_path(prefix: &Path) -> PathBuf {
    with_suffix(prefix, ".metadata")
}

/// Segment file `segment` of a shard.
pub fn segment_path(prefix: &Path, segment: u32) -> PathBuf {
    with_suffix(prefix, &format!(".{:06}.data", segment))
}

/// Index arena file of a shard.
pub fn index_path(prefix: &Path) -> PathBuf {
    with_suffix(prefix, ".index")
}

/// Extracts the shard number from a file name produced by this module.
pub fn parse_shard_id(filename: &str) -> Option<usize> {
    let (shard, rest) = filename.split_once('.')?;
    if shard.len() != 3 || !(rest == "metadata" || rest == "index" || rest.ends_with(".data")) {
        return None;
    }
    shard.parse().ok()
}
