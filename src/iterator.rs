//! Range iteration across shards.
//!
//! Every shard returns its slice of a range already sorted. The engine merges
//! those runs with a k-way merge so callers see one ascending stream. Keys
//! are unique across shards because each key routes to exactly one shard.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::vec;

/// Callback receiving the entries of a range scan.
///
/// Any `FnMut(&[u8], &[u8])` closure is a visitor.
///
/// # Example
///
/// ```rust,no_run
/// use mapkv::{DB, Options};
///
/// # fn main() -> Result<(), mapkv::Error> {
/// let db = DB::open("./data", Options::default())?;
/// let mut count = 0;
/// db.range(b"a", b"m", &mut |_key: &[u8], _value: &[u8]| count += 1)?;
/// # Ok(())
/// # }
/// ```
pub trait Visitor {
    /// Called once per entry, in ascending key order.
    fn visit(&mut self, key: &[u8], value: &[u8]);
}

impl<F> Visitor for F
where
    F: FnMut(&[u8], &[u8]),
{
    fn visit(&mut self, key: &[u8], value: &[u8]) {
        self(key, value)
    }
}

type Entry = (Vec<u8>, Vec<u8>);

/// Merges several key-sorted runs into one key-sorted stream.
///
/// Each run pairs keys with a payload `T`: the value itself for cursors,
/// or a value location when values are read on demand.
pub struct MergeIterator<T = Vec<u8>> {
    runs: Vec<vec::IntoIter<(Vec<u8>, T)>>,
    heap: BinaryHeap<Reverse<(Vec<u8>, usize)>>,
    heads: Vec<Option<T>>,
}

impl<T> MergeIterator<T> {
    /// Create a merge over `runs`, each sorted by key.
    pub fn new(runs: Vec<Vec<(Vec<u8>, T)>>) -> Self {
        let mut runs: Vec<_> = runs.into_iter().map(Vec::into_iter).collect();
        let mut heap = BinaryHeap::with_capacity(runs.len());
        let mut heads = Vec::with_capacity(runs.len());

        for (run, iter) in runs.iter_mut().enumerate() {
            match iter.next() {
                Some((key, payload)) => {
                    heap.push(Reverse((key, run)));
                    heads.push(Some(payload));
                }
                None => heads.push(None),
            }
        }

        Self { runs, heap, heads }
    }
}

impl<T> Iterator for MergeIterator<T> {
    type Item = (Vec<u8>, T);

    fn next(&mut self) -> Option<Self::Item> {
        let Reverse((key, run)) = self.heap.pop()?;
        let payload = self.heads[run].take()?;

        if let Some((next_key, next_payload)) = self.runs[run].next() {
            self.heap.push(Reverse((next_key, run)));
            self.heads[run] = Some(next_payload);
        }

        Some((key, payload))
    }
}

/// A cursor over a materialized, sorted range of the database.
///
/// The entries are copied out of the shards when the iterator is created,
/// so later writes are not visible through it.
///
/// # Example
///
/// ```rust,no_run
/// use mapkv::{DB, Options};
///
/// # fn main() -> Result<(), mapkv::Error> {
/// let db = DB::open("./data", Options::default())?;
/// db.put(b"key1", b"value1")?;
/// db.put(b"key2", b"value2")?;
///
/// let mut iter = db.iter()?;
/// while iter.valid() {
///     println!("{:?} => {:?}", iter.key(), iter.value());
///     iter.next();
/// }
/// # Ok(())
/// # }
/// ```
pub struct DBIterator {
    /// Entries in ascending key order
    entries: Vec<Entry>,

    /// Current position in `entries`
    position: usize,
}

impl DBIterator {
    pub(crate) fn new(runs: Vec<Vec<Entry>>) -> Self {
        Self { entries: MergeIterator::new(runs).collect(), position: 0 }
    }

    /// Returns true if the iterator is positioned at a valid entry.
    pub fn valid(&self) -> bool {
        self.position < self.entries.len()
    }

    /// Returns the key at the current position.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not valid. Call `valid()` first to check.
    pub fn key(&self) -> &[u8] {
        &self.entries[self.position].0
    }

    /// Returns the value at the current position.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not valid. Call `valid()` first to check.
    pub fn value(&self) -> &[u8] {
        &self.entries[self.position].1
    }

    /// Moves to the next entry.
    pub fn next(&mut self) {
        if self.valid() {
            self.position += 1;
        }
    }

    /// Moves to the previous entry; stepping back from the first entry
    /// invalidates the iterator.
    pub fn prev(&mut self) {
        if self.position == 0 || !self.valid() {
            self.position = self.entries.len();
        } else {
            self.position -= 1;
        }
    }

    /// Seeks to the first key that is greater than or equal to the target.
    pub fn seek(&mut self, target: &[u8]) {
        self.position = self.entries.partition_point(|(key, _)| key.as_slice() < target);
    }

    /// Seeks to the first entry.
    pub fn seek_to_first(&mut self) {
        self.position = 0;
    }

    /// Seeks to the last entry.
    pub fn seek_to_last(&mut self) {
        self.position = self.entries.len().saturating_sub(1);
    }

    /// Number of entries in the iterated range
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the range held no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(keys: &[&str]) -> Vec<Entry> {
        keys.iter().map(|k| (k.as_bytes().to_vec(), k.to_uppercase().into_bytes())).collect()
    }

    #[test]
    fn test_merge_interleaved_runs() {
        let merged: Vec<Vec<u8>> = MergeIterator::new(vec![
            run(&["a", "d", "g"]),
            run(&[]),
            run(&["b", "c", "h"]),
            run(&["e", "f"]),
        ])
        .map(|(k, v)| {
            assert_eq!(v, k.to_ascii_uppercase());
            k
        })
        .collect();

        let expected: Vec<Vec<u8>> =
            ["a", "b", "c", "d", "e", "f", "g", "h"].iter().map(|k| k.as_bytes().to_vec()).collect();
        assert_eq!(merged, expected);
    }

    #[test]
    fn test_merge_no_runs() {
        assert_eq!(MergeIterator::<Vec<u8>>::new(Vec::new()).count(), 0);
        assert_eq!(MergeIterator::<Vec<u8>>::new(vec![Vec::new(), Vec::new()]).count(), 0);
    }

    #[test]
    fn test_merge_carries_payload() {
        let merged: Vec<(Vec<u8>, u32)> = MergeIterator::new(vec![
            vec![(b"b".to_vec(), 2), (b"d".to_vec(), 4)],
            vec![(b"a".to_vec(), 1), (b"c".to_vec(), 3)],
        ])
        .collect();

        let payloads: Vec<u32> = merged.iter().map(|(_, p)| *p).collect();
        assert_eq!(payloads, vec![1, 2, 3, 4]);
        assert_eq!(merged[0].0, b"a");
    }

    #[test]
    fn test_closure_visitor() {
        let mut seen = Vec::new();
        let mut visitor = |key: &[u8], value: &[u8]| seen.push((key.to_vec(), value.to_vec()));
        for (key, value) in MergeIterator::new(vec![run(&["y"]), run(&["x"])]) {
            visitor.visit(&key, &value);
        }
        assert_eq!(seen, vec![(b"x".to_vec(), b"X".to_vec()), (b"y".to_vec(), b"Y".to_vec())]);
    }

    #[test]
    fn test_cursor_navigation() {
        let mut iter = DBIterator::new(vec![run(&["b", "d"]), run(&["a", "c"])]);
        assert_eq!(iter.len(), 4);

        assert!(iter.valid());
        assert_eq!(iter.key(), b"a");
        iter.next();
        assert_eq!(iter.key(), b"b");
        assert_eq!(iter.value(), b"B");

        iter.seek(b"bb");
        assert_eq!(iter.key(), b"c");
        iter.prev();
        assert_eq!(iter.key(), b"b");

        iter.seek_to_last();
        assert_eq!(iter.key(), b"d");
        iter.next();
        assert!(!iter.valid());

        iter.seek(b"z");
        assert!(!iter.valid());

        iter.seek_to_first();
        iter.prev();
        assert!(!iter.valid());
    }

    #[test]
    fn test_empty_cursor() {
        let mut iter = DBIterator::new(Vec::new());
        assert!(iter.is_empty());
        assert!(!iter.valid());
        iter.seek_to_last();
        assert!(!iter.valid());
    }
}
