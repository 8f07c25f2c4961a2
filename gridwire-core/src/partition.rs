//! Partition hashing and partition-aware key routing.
//!
//! A key is routed to `abs(murmur3(key bytes)) % partition_count`. Keys that
//! implement [`PartitionAware`] hash a different partition key instead, which
//! co-locates related entries on one member.
//!
//! # Example
//!
//! ```ignore
//! use gridwire_core::PartitionAware;
//!
//! struct OrderKey {
//!     order_id: String,
//!     customer_id: String,
//! }
//!
//! impl PartitionAware for OrderKey {
//!     fn partition_key_bytes(&self) -> Vec<u8> {
//!         self.customer_id.as_bytes().to_vec()
//!     }
//! }
//! ```

/// Trait for keys that should be routed by a partition key different from
/// the key itself.
pub trait PartitionAware: Send + Sync {
    /// Returns the serialized bytes of the partition key.
    fn partition_key_bytes(&self) -> Vec<u8>;
}

/// Computes the partition hash of serialized key bytes.
pub fn compute_partition_hash(key: &[u8]) -> i32 {
    murmur_hash3_x86_32(key, 0x01000193)
}

/// Maps serialized key bytes to a partition id.
///
/// Returns `None` when the partition count is not yet known.
pub fn partition_id_for_key(key: &[u8], partition_count: i32) -> Option<i32> {
    if partition_count <= 0 {
        return None;
    }
    let hash = compute_partition_hash(key);
    let hash = if hash == i32::MIN { 0 } else { hash.abs() };
    Some(hash % partition_count)
}

/// MurmurHash3 x86 32-bit.
fn murmur_hash3_x86_32(data: &[u8], seed: u32) -> i32 {
    const C1: u32 = 0xcc9e2d51;
    const C2: u32 = 0x1b873593;

    let mix = |k: u32| k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);

    let mut h1 = seed;
    let mut blocks = data.chunks_exact(4);
    for block in &mut blocks {
        let k1 = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        h1 ^= mix(k1);
        h1 = h1.rotate_left(13).wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let mut k1: u32 = 0;
        for (i, byte) in tail.iter().enumerate() {
            k1 ^= (*byte as u32) << (8 * i);
        }
        h1 ^= mix(k1);
    }

    h1 ^= data.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85ebca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2ae35);
    h1 ^= h1 >> 16;

    h1 as i32
}
