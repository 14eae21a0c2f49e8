//! Hash Router
//!
//! Maps a key to its shard using only the host-and-port, so every record of
//! one host lands in (and is evicted and reloaded with) the same shard.

use super::entry::UrlKey;

const FNV32_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a hash
#[inline]
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash = FNV32_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV32_PRIME);
    }
    hash
}

/// Shard index for a host-and-port in `[0, shard_count)`
#[inline]
pub fn shard_for_host(host: &str, shard_count: usize) -> usize {
    debug_assert!(shard_count > 0);
    fnv1a_32(host.as_bytes()) as usize % shard_count
}

/// Shard index for a key in `[0, shard_count)`
#[inline]
pub fn shard_index(key: &UrlKey, shard_count: usize) -> usize {
    shard_for_host(key.host(), shard_count)
}

// =============================================================================
// Tests
// =============================================================================
