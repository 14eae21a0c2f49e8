//! Sharded URL Cache
//!
//! Bounded in-memory cache that spills cold shards to per-shard files and
//! reloads them lazily on lookup.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                          Cache Engine                                     │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  Hash Router          │ Shard Store          │ Persistence Adapter        │
//! │  ┌────────────────┐   │ ┌────────────────┐   │ ┌──────────────────────┐   │
//! │  │ FNV-1a(host)   │──▶│ │ 31 x Mutex<Map>│◀─▶│ │ bucket<N>.json       │   │
//! │  │ mod shards     │   │ │ + hit counters │   │ │ (tmp + rename)       │   │
//! │  └────────────────┘   │ └────────────────┘   │ └──────────────────────┘   │
//! │                              │                                           │
//! │                    Eviction Controller                                   │
//! │              (coldest, largest shard → disk)                             │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Locking
//!
//! - One coarse lock over occupancy and the hit watermark
//! - One lock per shard over its map
//! - The coarse lock may be taken while a shard lock is held, never the
//!   reverse
//! - The only I/O under a shard lock is an eviction's flush

mod engine;
mod entry;
mod eviction;
mod router;
mod shard;
mod storage;

pub use engine::{CacheEngine, CacheStats, EngineConfig, LoadReport};
pub use entry::{UrlInfo, UrlKey, UrlRecord, UrlRecords, UNKNOWN_CATEGORY};
pub use eviction::{select_victim, Eviction};
pub use router::{fnv1a_32, shard_for_host, shard_index};
pub use shard::{Shard, ShardGuard};
pub use storage::{JsonFileStorage, ShardStorage};

use std::path::{Path, PathBuf};

/// Default number of shards (prime, to spread hash values)
pub const DEFAULT_SHARD_COUNT: usize = 31;

/// Default maximum number of cached URLs
pub const DEFAULT_CAPACITY: usize = 100;

/// Extensions recognised as configuration files
pub const CONFIG_EXTENSIONS: &[&str] = &["json"];

/// Check if a path names a configuration file
pub fn is_config_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| CONFIG_EXTENSIONS.contains(&ext))
}

/// Backing file for shard `index` under `cache_dir`
pub fn shard_file_name(cache_dir: &Path, index: usize) -> PathBuf {
    cache_dir.join(format!("bucket{}.json", index))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_shard_count_is_prime() {
        assert_eq!(DEFAULT_SHARD_COUNT, 31);
        assert!((2..DEFAULT_SHARD_COUNT).all(|d| DEFAULT_SHARD_COUNT % d != 0));
    }

    #[test]
    fn test_config_file_detection() {
        assert!(is_config_file(Path::new("/etc/urls/urlcfg1.json")));
        assert!(!is_config_file(Path::new("/etc/urls/urlcfg1.json.tmp")));
        assert!(!is_config_file(Path::new("/etc/urls/README")));
        assert!(!is_config_file(Path::new("/etc/urls/list.yaml")));
    }

    #[test]
    fn test_shard_file_name() {
        assert_eq!(
            shard_file_name(Path::new("/var/cache/urls"), 7),
            PathBuf::from("/var/cache/urls/bucket7.json")
        );
    }
}
