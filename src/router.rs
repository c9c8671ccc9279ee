//! Key to shard routing.
//!
//! The first eight bytes of the key (zero padded) are read as a big-endian
//! integer and multiplied by the 64-bit golden-ratio constant; the top
//! `log2(shard_count)` bits of the product select the shard. The mapping is
//! fixed for a given shard count, which the manifest pins for the lifetime
//! of a database.

const GOLDEN_RATIO: u64 = 0x9E37_79B9_7F4A_7C15;

/// Shard index of `key` among `shard_count` shards.
///
/// `shard_count` must be a power of two.
pub fn shard_index(key: &[u8], shard_count: usize) -> usize {
    debug_assert!(shard_count.is_power_of_two());
    let bits = shard_count.trailing_zeros();
    if bits == 0 {
        return 0;
    }

    let mut prefix = [0u8; 8];
    let len = key.len().min(8);
    prefix[..len].copy_from_slice(&key[..len]);

    let hash = u64::from_be_bytes(prefix).wrapping_mul(GOLDEN_RATIO);
    (hash >> (64 - bits)) as usize
}
