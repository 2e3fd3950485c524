//! Shard key function.
//!
//! Maps a position identifier onto one of `hash_mod` buckets. The mapping is
//! the SHA-256 digest of the UTF-8 id, read as a 256-bit big-endian unsigned
//! integer, reduced modulo `hash_mod`. For a fixed `hash_mod` every position
//! lands in exactly one bucket, so exactly one `(product_type, bucket)` task
//! owns it.

use sha2::{Digest, Sha256};

/// Largest accepted shard count. A run materialises one task per bucket and
/// product type up front.
pub const MAX_HASH_MOD: u32 = 65_536;

/// Compute the shard bucket of `position_id` in `[0, hash_mod)`.
///
/// A `hash_mod` of zero is treated as one (everything lands in bucket 0).
///
/// # Examples
///
/// ```
/// use pricer_core::shard::bucket;
///
/// assert_eq!(bucket("anything", 1), 0);
/// assert!(bucket("POS-1", 16) < 16);
/// ```
pub fn bucket(position_id: &str, hash_mod: u32) -> u32 {
    let modulus = u64::from(hash_mod.max(1));
    let digest = Sha256::digest(position_id.as_bytes());

    // Horner reduction of the full digest keeps the result identical to
    // interpreting all 256 bits as one integer.
    let rem = digest
        .iter()
        .fold(0u64, |acc, byte| (acc * 256 + u64::from(*byte)) % modulus);

    rem as u32
}

/// A `(hash_mod, hash_bucket)` pair identifying one shard of a product type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardKey {
    /// Number of buckets the id space is split into.
    pub hash_mod: u32,
    /// The bucket this key selects.
    pub hash_bucket: u32,
}

impl ShardKey {
    /// Create a shard key. `hash_bucket` must be below `hash_mod`.
    pub fn new(hash_mod: u32, hash_bucket: u32) -> Self {
        Self {
            hash_mod: hash_mod.max(1),
            hash_bucket,
        }
    }

    /// Whether this shard is responsible for `position_id`.
    #[inline]
    pub fn owns(&self, position_id: &str) -> bool {
        bucket(position_id, self.hash_mod) == self.hash_bucket
    }

    /// All shard keys for a given `hash_mod`, in bucket order.
    pub fn all(hash_mod: u32) -> impl Iterator<Item = ShardKey> {
        let hash_mod = hash_mod.max(1);
        (0..hash_mod).map(move |b| ShardKey::new(hash_mod, b))
    }
}
