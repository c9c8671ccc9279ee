//! # mapkv - A Sharded, Memory-Mapped Key-Value Engine
//!
//! mapkv is an embedded storage engine that persists binary key/value pairs
//! in memory-mapped files. Writes append the value to a log and index its
//! location in an on-disk AVL tree; reads are a tree descent plus one copy
//! out of the mapped log.
//!
//! ## Architecture
//!
//! The key space is split into a fixed number of independent shards:
//!
//! - **Value Store**: append-only log of fixed-size segments with a small
//!   metadata record (`vlog`)
//! - **Index Tree**: self-balancing tree of fixed-size nodes in a growable
//!   mapped arena (`index`)
//! - **Shard**: one value store and one index behind a reader/writer lock
//!   (`shard`)
//! - **Router**: picks a shard from the key's leading bytes (`router`)
//! - **Manifest**: pins the shard count and segment size (`manifest`)
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use mapkv::{DB, Options};
//!
//! # fn main() -> Result<(), mapkv::Error> {
//! // Open or create a database
//! let options = Options::default();
//! let db = DB::open("./data", options)?;
//!
//! // Write operations
//! db.put(b"key1", b"value1")?;
//! db.put(b"key2", b"value2")?;
//!
//! // Read operations
//! if let Some(value) = db.get(b"key1")? {
//!     println!("Found: {:?}", value);
//! }
//!
//! // Range scan over [key1, key3)
//! db.range(b"key1", b"key3", &mut |key: &[u8], value: &[u8]| {
//!     println!("{:?} => {:?}", key, value);
//! })?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Durability
//!
//! With the default `SyncPolicy::Never` a successful `put` is visible to
//! every later `get` in the process, and reaches disk through OS write-back
//! or an explicit `flush`/`close`. `SyncPolicy::EveryWrite` syncs the
//! written pages before `put` returns. There is no write-ahead log: a crash
//! during a write can orphan appended bytes or leave a partially updated
//! index.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod config;
pub mod error;
pub mod index;
pub mod iterator;
pub mod manifest;
pub mod mmap;
pub mod paths;
pub mod router;
pub mod shard;
pub mod vlog;

// Re-exports
pub use config::{Options, SyncPolicy};
pub use error::{Error, Result};
pub use iterator::{DBIterator, Visitor};
pub use shard::ShardStats;
pub use vlog::Location;

use iterator::MergeIterator;
use manifest::Manifest;
use shard::Shard;
use std::path::{Path, PathBuf};
use std::thread;

/// Aggregated counters across all shards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbStats {
    /// Number of shards
    pub shard_count: usize,
    /// Segments allocated across all shards
    pub segment_count: u64,
    /// Bytes appended to the value logs
    pub value_bytes: u64,
    /// Index nodes allocated, including ones orphaned by overwrites
    pub index_nodes: u64,
    /// Combined size of the index files
    pub index_file_size: u64,
    /// Per-shard counters, indexed by shard number
    pub shards: Vec<ShardStats>,
}

/// The main database handle.
///
/// This is the primary interface for interacting with the storage engine.
/// It supports point writes and reads plus ordered range scans.
///
/// # Thread Safety
///
/// `DB` is `Send + Sync` and can be shared across threads using `Arc<DB>`.
/// Operations on different shards run in parallel; within a shard, writes
/// are serialized and reads share the lock.
pub struct DB {
    /// Database directory path
    path: PathBuf,

    /// Effective options (manifest values applied)
    options: Options,

    /// Shards, indexed by shard number
    shards: Vec<Shard>,
}

impl std::fmt::Debug for DB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DB")
            .field("path", &self.path)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl DB {
    /// Opens a database at the specified path with the given options.
    ///
    /// If the database does not exist, it will be created. If it exists, the
    /// shard count and segment size recorded in its manifest are used in
    /// place of the ones in `options`.
    ///
    /// # Arguments
    ///
    /// * `path` - The directory where the database files are stored
    /// * `options` - Configuration options for the database
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The options are invalid
    /// - The directory is missing and `create_if_missing` is false
    /// - The directory exists and `error_if_exists` is true
    /// - A manifest, metadata record or index header is corrupted
    /// - A file cannot be created, resized or mapped
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use mapkv::{DB, Options};
    ///
    /// # fn main() -> Result<(), mapkv::Error> {
    /// let options = Options::default().shard_count(16);
    /// let db = DB::open("./my_database", options)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        options.validate()?;

        if !path.exists() {
            if options.create_if_missing {
                std::fs::create_dir_all(&path)?;
            } else {
                return Err(Error::not_found(format!(
                    "Database directory does not exist: {:?}",
                    path
                )));
            }
        } else if options.error_if_exists && path.join(paths::MANIFEST_FILENAME).exists() {
            return Err(Error::AlreadyExists(format!("Database already exists: {:?}", path)));
        }

        let (_, options) = Manifest::load_or_create(&path, &options)?;
        warn_stray_files(&path, options.shard_count)?;
        let shards = open_shards(&path, &options)?;

        let db = Self { path, options, shards };
        let stats = db.stats();
        log::info!(
            "Opened database {:?}: {} shards, {} segments, {} index nodes",
            db.path,
            stats.shard_count,
            stats.segment_count,
            stats.index_nodes
        );
        Ok(db)
    }

    /// Inserts or updates a key-value pair.
    ///
    /// # Arguments
    ///
    /// * `key` - The key to insert (at most `max_key_size` bytes)
    /// * `value` - The value to associate with the key (at most 65535 bytes)
    ///
    /// # Errors
    ///
    /// - `KeyTooLong` / `ValueTooLarge` for rejected input; nothing is written
    /// - `StorageFull` when the shard has used all its segments
    /// - `Io` when a segment or index file cannot be grown
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use mapkv::{DB, Options};
    /// # fn main() -> Result<(), mapkv::Error> {
    /// # let db = DB::open("./data", Options::default())?;
    /// db.put(b"key", b"value")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.shard_for(key).write(key, value)
    }

    /// Retrieves the value associated with a key.
    ///
    /// Returns `None` if the key has never been written.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` if the index points outside the value log.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use mapkv::{DB, Options};
    /// # fn main() -> Result<(), mapkv::Error> {
    /// # let db = DB::open("./data", Options::default())?;
    /// if let Some(value) = db.get(b"key")? {
    ///     println!("Found: {:?}", value);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.shard_for(key).read(key)
    }

    /// Calls `visitor` for every key in `[lower, upper)` in ascending byte
    /// order. An empty bound leaves that end of the range open.
    ///
    /// Each shard's index is scanned under its own shared lock, which is
    /// released before the visitor runs, so the visitor may call back into
    /// the database. The scan is not a snapshot across shards: a concurrent
    /// write to a shard that has not been scanned yet is visible.
    ///
    /// The keys and value locations of the whole range are held in memory
    /// while it is visited. Values are copied out one at a time, just before
    /// their visit, and always hold what the key mapped to when its shard was
    /// scanned.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use mapkv::{DB, Options};
    /// # fn main() -> Result<(), mapkv::Error> {
    /// # let db = DB::open("./data", Options::default())?;
    /// let mut keys = Vec::new();
    /// db.range(b"", b"", &mut |key: &[u8], _: &[u8]| keys.push(key.to_vec()))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn range<V: Visitor + ?Sized>(&self, lower: &[u8], upper: &[u8], visitor: &mut V) -> Result<()> {
        let lower = (!lower.is_empty()).then_some(lower);
        let upper = (!upper.is_empty()).then_some(upper);
        if is_empty_range(lower, upper) {
            return Ok(());
        }

        let runs = self
            .shards
            .iter()
            .map(|shard| shard.locations(lower, upper))
            .collect::<Result<Vec<_>>>()?;

        for (key, location) in MergeIterator::new(runs) {
            let value = self.shard_for(&key).value_at(location)?;
            visitor.visit(&key, &value);
        }
        Ok(())
    }

    /// Creates an iterator over all key-value pairs.
    pub fn iter(&self) -> Result<DBIterator> {
        self.iter_range(None, None)
    }

    /// Creates an iterator over `[start, end)`. A `None` bound is open.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use mapkv::{DB, Options};
    /// # fn main() -> Result<(), mapkv::Error> {
    /// # let db = DB::open("./data", Options::default())?;
    /// let mut iter = db.iter_range(Some(&b"a"[..]), Some(&b"n"[..]))?;
    /// while iter.valid() {
    ///     println!("{:?}", iter.key());
    ///     iter.next();
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn iter_range(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<DBIterator> {
        Ok(DBIterator::new(self.collect_runs(start, end)?))
    }

    fn collect_runs(
        &self,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
    ) -> Result<Vec<Vec<(Vec<u8>, Vec<u8>)>>> {
        if is_empty_range(lower, upper) {
            return Ok(Vec::new());
        }
        self.shards.iter().map(|shard| shard.range(lower, upper)).collect()
    }

    /// Syncs every shard's value log and index to disk.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered; remaining shards are still
    /// flushed.
    pub fn flush(&self) -> Result<()> {
        let mut first_error = None;
        for shard in &self.shards {
            if let Err(e) = shard.flush() {
                log::error!("Failed to flush shard {}: {}", shard.id(), e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                log::debug!("Flushed {} shards of {:?}", self.shards.len(), self.path);
                Ok(())
            }
        }
    }

    /// Closes the database, ensuring all data is flushed to disk.
    ///
    /// The files stay mapped until the handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing fails.
    pub fn close(&self) -> Result<()> {
        self.flush()?;
        log::info!("Database {:?} closed successfully", self.path);
        Ok(())
    }

    /// Walks every shard's index and checks ordering and balance.
    ///
    /// Returns the number of live keys.
    pub fn validate(&self) -> Result<usize> {
        self.shards.iter().map(Shard::validate).sum()
    }

    /// Current counters, aggregated over all shards.
    pub fn stats(&self) -> DbStats {
        let shards: Vec<ShardStats> = self.shards.iter().map(Shard::stats).collect();
        DbStats {
            shard_count: shards.len(),
            segment_count: shards.iter().map(|s| s.segment_count as u64).sum(),
            value_bytes: shards.iter().map(|s| s.value_bytes).sum(),
            index_nodes: shards.iter().map(|s| s.index_nodes as u64).sum(),
            index_file_size: shards.iter().map(|s| s.index_file_size).sum(),
            shards,
        }
    }

    /// Database directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Options in effect, with the manifest's shard count and segment size.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Shard number that owns `key`.
    pub fn shard_index(&self, key: &[u8]) -> usize {
        router::shard_index(key, self.shards.len())
    }

    fn shard_for(&self, key: &[u8]) -> &Shard {
        &self.shards[self.shard_index(key)]
    }
}

fn is_empty_range(lower: Option<&[u8]>, upper: Option<&[u8]>) -> bool {
    matches!((lower, upper), (Some(lower), Some(upper)) if lower >= upper)
}

/// Logs shard files whose shard number is outside the recorded shard count.
/// They are never opened, so their data is unreachable.
fn warn_stray_files(path: &Path, shard_count: usize) -> Result<()> {
    for entry in std::fs::read_dir(path)?.flatten() {
        if let Some(filename) = entry.file_name().to_str() {
            if let Some(id) = paths::parse_shard_id(filename) {
                if id >= shard_count {
                    log::warn!(
                        "Ignoring {:?}: shard {} is beyond the {} shards of this database",
                        entry.path(),
                        id,
                        shard_count
                    );
                }
            }
        }
    }
    Ok(())
}

/// Opens all shards, spreading the work over a few scoped threads.
fn open_shards(path: &Path, options: &Options) -> Result<Vec<Shard>> {
    let count = options.shard_count;
    let threads = thread::available_parallelism().map_or(1, |n| n.get()).clamp(1, count);
    let chunk = count.div_ceil(threads);

    let chunks = crossbeam::scope(|scope| {
        let handles: Vec<_> = (0..count)
            .step_by(chunk)
            .map(|start| {
                scope.spawn(move |_| {
                    (start..(start + chunk).min(count))
                        .map(|id| Shard::open(&paths::shard_prefix(path, id), id, options))
                        .collect::<Result<Vec<_>>>()
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect::<Vec<_>>()
    })
    .unwrap_or_else(|panic| std::panic::resume_unwind(panic));

    let mut shards = Vec::with_capacity(count);
    for chunk in chunks {
        shards.extend(chunk?);
    }
    Ok(shards)
}

impl Drop for DB {
    fn drop(&mut self) {
        // Errors cannot be propagated from drop.
        if let Err(e) = self.flush() {
            log::error!("Error flushing database during drop: {}", e);
        }
    }
}
