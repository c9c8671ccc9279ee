//! A shard: one value store and one index tree behind a single lock.
//!
//! Writes take the lock exclusively for the whole append-then-insert
//! sequence, so readers of the same shard never observe an index entry whose
//! value has not been written yet. Shards share no state, so operations on
//! different shards never contend.

use crate::config::{Options, SyncPolicy};
use crate::error::{Error, Result};
use crate::index::IndexTree;
use crate::paths;
use crate::vlog::{Location, ValueStore};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};

/// Files and in-memory state guarded by the shard lock.
struct ShardState {
    vlog: ValueStore,
    index: IndexTree,
}

/// Point-in-time counters of one shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardStats {
    /// Segments allocated by the value store
    pub segment_count: u32,
    /// Bytes appended to the value store
    pub value_bytes: u64,
    /// Index nodes allocated, including ones orphaned by overwrites
    pub index_nodes: u32,
    /// Size of the index file in bytes
    pub index_file_size: u64,
}

/// One independently locked partition of the key space.
pub struct Shard {
    id: usize,
    prefix: PathBuf,
    state: RwLock<ShardState>,
    max_key_size: usize,
    sync: SyncPolicy,
}

impl Shard {
    /// Open (or create) shard `id` whose files share `prefix`.
    pub fn open(prefix: &Path, id: usize, options: &Options) -> Result<Self> {
        let vlog = ValueStore::open(prefix, options.segment_size, options.max_segments)?;
        let index = IndexTree::open(&paths::index_path(prefix), options.initial_index_size)?;

        Ok(Self {
            id,
            prefix: prefix.to_path_buf(),
            state: RwLock::new(ShardState { vlog, index }),
            max_key_size: options.max_key_size,
            sync: options.sync,
        })
    }

    /// Shard number
    pub fn id(&self) -> usize {
        self.id
    }

    /// Path prefix of the shard's files
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// The value is appended before the index is touched. If the index
    /// insert fails the appended bytes are orphaned but the previous mapping
    /// for `key` stays intact.
    pub fn write(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.len() > self.max_key_size {
            return Err(Error::KeyTooLong { len: key.len(), max: self.max_key_size });
        }

        let mut state = self.state.write();
        let location = state.vlog.append(value)?;
        state.index.insert(key, location)?;

        if self.sync == SyncPolicy::EveryWrite {
            state.vlog.sync_value(location)?;
            state.index.flush()?;
        }
        Ok(())
    }

    /// Look up the value stored under `key`.
    pub fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let state = self.state.read();
        match state.index.search(key)? {
            Some(location) => Ok(Some(state.vlog.read(location)?)),
            None => Ok(None),
        }
    }

    /// Copy out every `(key, value)` with `lower <= key < upper`, in key
    /// order. A `None` bound is open.
    pub fn range(&self, lower: Option<&[u8]>, upper: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let state = self.state.read();
        let mut entries = Vec::new();
        state.index.scan(lower, upper, |key, location| {
            entries.push((key.to_vec(), state.vlog.read(location)?));
            Ok(())
        })?;
        Ok(entries)
    }

    /// Keys and value locations with `lower <= key < upper`, in key order.
    ///
    /// Values are never rewritten in place, so a location stays readable
    /// through [`Shard::value_at`] after the lock is released.
    pub fn locations(&self, lower: Option<&[u8]>, upper: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Location)>> {
        self.state.read().index.range(lower, upper)
    }

    /// Copy out the value stored at `location`.
    pub fn value_at(&self, location: Location) -> Result<Vec<u8>> {
        self.state.read().vlog.read(location)
    }

    /// Check the index tree's ordering and balance.
    pub fn validate(&self) -> Result<usize> {
        Ok(self.state.read().index.validate()?.keys)
    }

    /// Sync the value store and the index to disk.
    pub fn flush(&self) -> Result<()> {
        let state = self.state.read();
        state.vlog.flush()?;
        state.index.flush()
    }

    /// Run `f` while holding this shard's lock exclusively.
    #[cfg(test)]
    pub(crate) fn with_write_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        let _state = self.state.write();
        f()
    }

    /// Current counters
    pub fn stats(&self) -> ShardStats {
        let state = self.state.read();
        ShardStats {
            segment_count: state.vlog.segment_count(),
            value_bytes: state.vlog.bytes_used(),
            index_nodes: state.index.node_count(),
            index_file_size: state.index.file_size() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmap::PAGE_SIZE;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn small_options() -> Options {
        Options::default().segment_size(4096).initial_index_size(PAGE_SIZE).max_segments(64)
    }

    fn open_shard(dir: &TempDir, options: &Options) -> Shard {
        Shard::open(&paths::shard_prefix(dir.path(), 0), 0, options).unwrap()
    }

    #[test]
    fn test_write_read() {
        let dir = TempDir::new().unwrap();
        let shard = open_shard(&dir, &small_options());

        shard.write(b"alpha", b"1").unwrap();
        shard.write(b"beta", b"22").unwrap();

        assert_eq!(shard.read(b"alpha").unwrap(), Some(b"1".to_vec()));
        assert_eq!(shard.read(b"beta").unwrap(), Some(b"22".to_vec()));
        assert_eq!(shard.read(b"gamma").unwrap(), None);
        assert_eq!(shard.id(), 0);
    }

    #[test]
    fn test_overwrite() {
        let dir = TempDir::new().unwrap();
        let shard = open_shard(&dir, &small_options());

        shard.write(b"key", b"old").unwrap();
        shard.write(b"key", b"new value").unwrap();

        assert_eq!(shard.read(b"key").unwrap(), Some(b"new value".to_vec()));
        assert_eq!(shard.validate().unwrap(), 1);

        let stats = shard.stats();
        assert_eq!(stats.index_nodes, 2);
        assert_eq!(stats.value_bytes, 12);
    }

    #[test]
    fn test_key_too_long_leaves_shard_untouched() {
        let dir = TempDir::new().unwrap();
        let options = small_options().max_key_size(8);
        let shard = open_shard(&dir, &options);

        let err = shard.write(b"123456789", b"v").unwrap_err();
        assert!(matches!(err, Error::KeyTooLong { len: 9, max: 8 }));
        assert_eq!(shard.stats().value_bytes, 0);
        assert_eq!(shard.stats().index_nodes, 0);

        shard.write(b"12345678", b"v").unwrap();
    }

    #[test]
    fn test_range() {
        let dir = TempDir::new().unwrap();
        let shard = open_shard(&dir, &small_options());

        for i in (0..20).rev() {
            shard.write(format!("k{:02}", i).as_bytes(), format!("v{}", i).as_bytes()).unwrap();
        }

        let entries = shard.range(Some(b"k05"), Some(b"k08")).unwrap();
        assert_eq!(
            entries,
            vec![
                (b"k05".to_vec(), b"v5".to_vec()),
                (b"k06".to_vec(), b"v6".to_vec()),
                (b"k07".to_vec(), b"v7".to_vec()),
            ]
        );
        assert_eq!(shard.range(None, None).unwrap().len(), 20);
    }

    #[test]
    fn test_locations_outlive_overwrite() {
        let dir = TempDir::new().unwrap();
        let shard = open_shard(&dir, &small_options());

        shard.write(b"a", b"first").unwrap();
        shard.write(b"b", b"second").unwrap();

        let located = shard.locations(Some(b"a"), None).unwrap();
        assert_eq!(located.len(), 2);
        assert_eq!(located[0].0, b"a");

        shard.write(b"a", b"rewritten").unwrap();
        assert_eq!(shard.value_at(located[0].1).unwrap(), b"first");
        assert_eq!(shard.value_at(located[1].1).unwrap(), b"second");
        assert_eq!(shard.read(b"a").unwrap(), Some(b"rewritten".to_vec()));
    }

    #[test]
    fn test_reopen() {
        let dir = TempDir::new().unwrap();
        let options = small_options();

        {
            let shard = open_shard(&dir, &options);
            for i in 0..100 {
                shard.write(format!("key{}", i).as_bytes(), &[i as u8; 100]).unwrap();
            }
            shard.flush().unwrap();
        }

        let shard = open_shard(&dir, &options);
        for i in 0..100 {
            assert_eq!(shard.read(format!("key{}", i).as_bytes()).unwrap(), Some(vec![i as u8; 100]));
        }
        assert!(shard.stats().segment_count > 1);
    }

    #[test]
    fn test_sync_every_write() {
        let dir = TempDir::new().unwrap();
        let options = small_options().sync(SyncPolicy::EveryWrite);
        let shard = open_shard(&dir, &options);

        shard.write(b"durable", b"value").unwrap();
        assert_eq!(shard.read(b"durable").unwrap(), Some(b"value".to_vec()));
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let dir = TempDir::new().unwrap();
        let shard = Arc::new(open_shard(&dir, &small_options()));
        shard.write(b"stable", b"value").unwrap();

        let writer = {
            let shard = Arc::clone(&shard);
            thread::spawn(move || {
                for i in 0..200 {
                    shard.write(format!("w{}", i).as_bytes(), b"x").unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let shard = Arc::clone(&shard);
                thread::spawn(move || {
                    for _ in 0..200 {
                        assert_eq!(shard.read(b"stable").unwrap(), Some(b"value".to_vec()));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(shard.validate().unwrap(), 201);
    }
}
