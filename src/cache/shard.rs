//! Shard Store
//!
//! One independently locked partition of the URL cache.
//!
//! # Design
//!
//! - Each shard has its own Mutex over its map, so no operation ever needs
//!   more than one shard lock
//! - Entry and hit counts are mirrored in atomics so the eviction scan can
//!   read every shard without taking shard locks
//! - Each shard owns a fixed backing file derived from its index

use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::entry::{UrlInfo, UrlKey};

/// Lock-protected shard contents
#[derive(Debug, Default)]
struct ShardState {
    map: HashMap<UrlKey, UrlInfo>,
    /// Backing file holds records that are not in `map`
    spilled: bool,
}

/// Single shard containing a map, counters and its backing file path
#[derive(Debug)]
pub struct Shard {
    index: usize,
    path: PathBuf,
    state: Mutex<ShardState>,
    /// Number of entries
    count: AtomicUsize,
    /// Lookups routed here since the last eviction. Written only under the
    /// engine's coarse lock.
    hits: AtomicU64,
    /// Completed evictions
    epoch: AtomicU64,
}

impl Shard {
    /// Create a new empty shard
    pub fn new(index: usize, path: impl Into<PathBuf>) -> Self {
        Self {
            index,
            path: path.into(),
            state: Mutex::new(ShardState::default()),
            count: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the number of entries in this shard
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Check if the shard is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Increment and return the hit counter
    pub(crate) fn record_hit(&self) -> u64 {
        self.hits.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn reset_hits(&self) {
        self.hits.store(0, Ordering::Relaxed);
    }

    /// Number of completed evictions of this shard
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Acquire the shard lock
    pub fn lock(&self) -> ShardGuard<'_> {
        ShardGuard {
            shard: self,
            state: self.state.lock(),
        }
    }

    /// Get a value from the shard
    pub fn get(&self, key: &UrlKey) -> Option<UrlInfo> {
        self.lock().get(key).cloned()
    }

    /// Insert a value; returns true when the key was not present before
    pub fn put(&self, key: UrlKey, info: UrlInfo) -> bool {
        self.lock().insert(key, info).is_none()
    }

    /// Remove every entry, returning them ordered by key
    pub fn drain_all(&self) -> Vec<(UrlKey, UrlInfo)> {
        self.lock().drain_all()
    }

    pub fn is_spilled(&self) -> bool {
        self.lock().is_spilled()
    }

    pub(crate) fn set_spilled(&self, spilled: bool) {
        self.lock().set_spilled(spilled);
    }
}

/// Exclusive access to a shard's map. Keeps the entry count in step with
/// every mutation.
pub struct ShardGuard<'a> {
    shard: &'a Shard,
    state: MutexGuard<'a, ShardState>,
}

impl ShardGuard<'_> {
    pub fn len(&self) -> usize {
        self.state.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.map.is_empty()
    }

    pub fn get(&self, key: &UrlKey) -> Option<&UrlInfo> {
        self.state.map.get(key)
    }

    pub fn contains_key(&self, key: &UrlKey) -> bool {
        self.state.map.contains_key(key)
    }

    /// Insert a value, returning the displaced one if present
    pub fn insert(&mut self, key: UrlKey, info: UrlInfo) -> Option<UrlInfo> {
        let old = self.state.map.insert(key, info);
        self.sync_count();
        old
    }

    pub fn remove(&mut self, key: &UrlKey) -> Option<UrlInfo> {
        let removed = self.state.map.remove(key);
        self.sync_count();
        removed
    }

    /// Remove every entry, returning them ordered by key
    pub fn drain_all(&mut self) -> Vec<(UrlKey, UrlInfo)> {
        let mut entries: Vec<_> = self.state.map.drain().collect();
        self.sync_count();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Copy every entry, ordered by key
    pub fn entries(&self) -> Vec<(UrlKey, UrlInfo)> {
        let mut entries: Vec<_> = self
            .state
            .map
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn is_spilled(&self) -> bool {
        self.state.spilled
    }

    pub fn set_spilled(&mut self, spilled: bool) {
        self.state.spilled = spilled;
    }

    /// Mark an eviction of this shard as complete
    pub(crate) fn bump_epoch(&mut self) {
        self.shard.epoch.fetch_add(1, Ordering::AcqRel);
    }

    fn sync_count(&self) {
        self.shard
            .count
            .store(self.state.map.len(), Ordering::Release);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn key(host: &str, path: &str) -> UrlKey {
        UrlKey::new(host, path)
    }

    #[test]
    fn test_shard_creation() {
        let shard = Shard::new(3, "/tmp/bucket3.json");
        assert!(shard.is_empty());
        assert_eq!(shard.index(), 3);
        assert_eq!(shard.hits(), 0);
        assert_eq!(shard.epoch(), 0);
        assert!(!shard.is_spilled());
        assert_eq!(shard.path(), Path::new("/tmp/bucket3.json"));
    }

    #[test]
    fn test_shard_put_get() {
        let shard = Shard::new(0, "bucket0.json");

        assert!(shard.put(key("a.com:80", "x"), UrlInfo::new("news", true)));
        assert_eq!(shard.len(), 1);
        assert_eq!(
            shard.get(&key("a.com:80", "x")),
            Some(UrlInfo::new("news", true))
        );
        assert_eq!(shard.get(&key("a.com:80", "y")), None);
    }

    #[test]
    fn test_shard_overwrite_is_not_new() {
        let shard = Shard::new(0, "bucket0.json");

        assert!(shard.put(key("a.com:80", "x"), UrlInfo::new("news", true)));
        assert!(!shard.put(key("a.com:80", "x"), UrlInfo::new("malware", false)));
        assert_eq!(shard.len(), 1);
        assert_eq!(
            shard.get(&key("a.com:80", "x")),
            Some(UrlInfo::new("malware", false))
        );
    }

    #[test]
    fn test_drain_all_empties_and_orders() {
        let shard = Shard::new(0, "bucket0.json");
        shard.put(key("b.com:80", "2"), UrlInfo::new("b", true));
        shard.put(key("a.com:80", "9"), UrlInfo::new("a", true));
        shard.put(key("a.com:80", "1"), UrlInfo::new("a", false));

        let drained = shard.drain_all();
        assert!(shard.is_empty());
        assert_eq!(shard.len(), 0);

        let keys: Vec<_> = drained.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["a.com:80/1", "a.com:80/9", "b.com:80/2"]);
    }

    #[test]
    fn test_hit_counter() {
        let shard = Shard::new(0, "bucket0.json");
        assert_eq!(shard.record_hit(), 1);
        assert_eq!(shard.record_hit(), 2);
        shard.reset_hits();
        assert_eq!(shard.hits(), 0);
    }

    #[test]
    fn test_guard_tracks_count() {
        let shard = Shard::new(0, "bucket0.json");
        {
            let mut guard = shard.lock();
            guard.insert(key("a.com:80", "1"), UrlInfo::new("a", true));
            guard.insert(key("a.com:80", "2"), UrlInfo::new("a", true));
            assert_eq!(guard.len(), 2);
            guard.remove(&key("a.com:80", "1"));
            guard.set_spilled(true);
            guard.bump_epoch();
        }
        assert_eq!(shard.len(), 1);
        assert!(shard.is_spilled());
        assert_eq!(shard.epoch(), 1);
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let shard = Arc::new(Shard::new(0, "bucket0.json"));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let shard = Arc::clone(&shard);
                thread::spawn(move || {
                    for i in 0..500 {
                        let k = key(&format!("host-{}:80", t), &i.to_string());
                        shard.put(k.clone(), UrlInfo::new("c", true));
                        assert!(shard.get(&k).is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(shard.len(), 4000);
    }
}
