//! Configuration options for the mapkv storage engine.

use crate::index::node::KEY_CAPACITY;

/// Default number of shards.
pub const DEFAULT_SHARD_COUNT: usize = 64;

/// Default capacity of one value segment (32MB).
pub const DEFAULT_SEGMENT_SIZE: usize = 32 * 1024 * 1024;

/// Largest supported shard count.
pub const MAX_SHARD_COUNT: usize = 1024;

/// Default upper bound on segments per shard.
pub const DEFAULT_MAX_SEGMENTS: u32 = 4096;

/// Default size of a freshly created index file (16MB).
pub const DEFAULT_INITIAL_INDEX_SIZE: usize = 16 * 1024 * 1024;

/// When mapped pages are explicitly written back to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// Rely on OS write-back; pages are synced on `flush`, `close` and drop.
    #[default]
    Never,

    /// msync the value, the segment metadata and the index before a write
    /// is acknowledged.
    EveryWrite,
}

/// Configuration options for opening a database.
#[derive(Debug, Clone)]
pub struct Options {
    /// Create the database if it doesn't exist.
    /// Default: true
    pub create_if_missing: bool,

    /// Error if the database already exists.
    /// Default: false
    pub error_if_exists: bool,

    /// Number of independent shards. Must be a power of two.
    /// Ignored when reopening: the count recorded in the manifest wins.
    /// Default: 64
    pub shard_count: usize,

    /// Capacity of each value segment file (in bytes).
    /// Ignored when reopening: the size recorded in the manifest wins.
    /// Default: 32MB
    pub segment_size: usize,

    /// Maximum number of segments per shard.
    /// Default: 4096
    pub max_segments: u32,

    /// Size of a newly created index file (in bytes).
    /// Default: 16MB
    pub initial_index_size: usize,

    /// Maximum key length (in bytes), at most 1024.
    /// Default: 1024
    pub max_key_size: usize,

    /// Durability policy for writes.
    /// Default: SyncPolicy::Never
    pub sync: SyncPolicy,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            shard_count: DEFAULT_SHARD_COUNT,
            segment_size: DEFAULT_SEGMENT_SIZE,
            max_segments: DEFAULT_MAX_SEGMENTS,
            initial_index_size: DEFAULT_INITIAL_INDEX_SIZE,
            max_key_size: KEY_CAPACITY,
            sync: SyncPolicy::Never,
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if it doesn't exist.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether opening an existing database is an error.
    pub fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets the number of shards.
    pub fn shard_count(mut self, count: usize) -> Self {
        self.shard_count = count;
        self
    }

    /// Sets the segment capacity.
    pub fn segment_size(mut self, size: usize) -> Self {
        self.segment_size = size;
        self
    }

    /// Sets the per-shard segment limit.
    pub fn max_segments(mut self, count: u32) -> Self {
        self.max_segments = count;
        self
    }

    /// Sets the initial index file size.
    pub fn initial_index_size(mut self, size: usize) -> Self {
        self.initial_index_size = size;
        self
    }

    /// Sets the maximum key length.
    pub fn max_key_size(mut self, size: usize) -> Self {
        self.max_key_size = size;
        self
    }

    /// Sets the durability policy.
    pub fn sync(mut self, policy: SyncPolicy) -> Self {
        self.sync = policy;
        self
    }

    /// Largest value a single write may carry under these options.
    pub fn max_value_size(&self) -> usize {
        self.segment_size.min(u16::MAX as usize)
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.shard_count == 0 || !self.shard_count.is_power_of_two() {
            return Err(crate::Error::invalid_argument("shard_count must be a power of two"));
        }
        if self.shard_count > MAX_SHARD_COUNT {
            return Err(crate::Error::invalid_argument(format!(
                "shard_count must be <= {}",
                MAX_SHARD_COUNT
            )));
        }
        if self.segment_size == 0 || self.segment_size > u32::MAX as usize {
            return Err(crate::Error::invalid_argument(
                "segment_size must be > 0 and fit in 32 bits",
            ));
        }
        if self.max_segments == 0 || self.max_segments > i32::MAX as u32 {
            return Err(crate::Error::invalid_argument("max_segments must be > 0"));
        }
        if self.initial_index_size < crate::index::arena::min_file_size() {
            return Err(crate::Error::invalid_argument(
                "initial_index_size must hold at least one node",
            ));
        }
        if self.max_key_size == 0 || self.max_key_size > KEY_CAPACITY {
            return Err(crate::Error::invalid_argument(format!(
                "max_key_size must be between 1 and {}",
                KEY_CAPACITY
            )));
        }
        Ok(())
    }
}
