// Stress Tests for mapkv
// Randomized workloads checked against an in-memory model

use mapkv::{Options, DB};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn test_options() -> Options {
    Options::default().shard_count(8).segment_size(128 * 1024).initial_index_size(32 * 1024)
}

fn random_bytes(rng: &mut StdRng, max_len: usize) -> Vec<u8> {
    let len = rng.random_range(0..=max_len);
    let mut buf = vec![0u8; len];
    rng.fill(&mut buf[..]);
    buf
}

/// Random puts and gets over a small key space, with frequent overwrites
#[test]
fn test_random_workload_matches_model() {
    let dir = TempDir::new().unwrap();
    let db = DB::open(dir.path(), test_options()).unwrap();
    let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(0x5EED);

    for _ in 0..5000 {
        let key = format!("key_{}", rng.random_range(0..700)).into_bytes();
        if rng.random_bool(0.6) {
            let value = random_bytes(&mut rng, 300);
            db.put(&key, &value).unwrap();
            model.insert(key, value);
        } else {
            assert_eq!(db.get(&key).unwrap(), model.get(&key).cloned());
        }
    }

    assert_eq!(db.validate().unwrap(), model.len());

    let mut scanned = Vec::new();
    db.range(b"", b"", &mut |key: &[u8], value: &[u8]| {
        scanned.push((key.to_vec(), value.to_vec()));
    })
    .unwrap();
    assert_eq!(scanned, model.into_iter().collect::<Vec<_>>());
}

/// Random binary keys of varying length survive a reopen
#[test]
fn test_random_binary_keys_reopen() {
    let dir = TempDir::new().unwrap();
    let mut model = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(7);

    {
        let db = DB::open(dir.path(), test_options()).unwrap();
        for _ in 0..1500 {
            let key = random_bytes(&mut rng, 40);
            let value = random_bytes(&mut rng, 100);
            db.put(&key, &value).unwrap();
            model.insert(key, value);
        }
    }

    let db = DB::open(dir.path(), test_options()).unwrap();
    for (key, value) in &model {
        assert_eq!(db.get(key).unwrap().as_ref(), Some(value));
    }
    assert_eq!(db.validate().unwrap(), model.len());
}

/// Many threads with disjoint key sets and random value sizes
#[test]
fn test_concurrent_random_writers() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(DB::open(dir.path(), test_options()).unwrap());

    let handles: Vec<_> = (0..6u64)
        .map(|t| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(t);
                let mut written = BTreeMap::new();
                for _ in 0..800 {
                    let key = format!("t{}_{}", t, rng.random_range(0..300)).into_bytes();
                    let value = random_bytes(&mut rng, 512);
                    db.put(&key, &value).unwrap();
                    written.insert(key, value);
                }
                written
            })
        })
        .collect();

    let mut expected = BTreeMap::new();
    for handle in handles {
        expected.extend(handle.join().unwrap());
    }

    for (key, value) in &expected {
        assert_eq!(db.get(key).unwrap().as_ref(), Some(value));
    }
    assert_eq!(db.validate().unwrap(), expected.len());
}
