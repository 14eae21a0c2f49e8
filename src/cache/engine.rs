//! Cache Engine - URL Cache Orchestrator
//!
//! Routes lookups and inserts to shards, keeps global occupancy under the
//! configured capacity by vacating shards to disk, and lazily reloads a
//! shard from its file when a lookup misses on a spilled shard. A shard whose
//! file holds entries missing from memory (including every emptied shard
//! with an image) is spilled.
//!
//! Lock order: a shard lock may be held while taking the occupancy lock,
//! never the reverse.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use super::entry::{UrlInfo, UrlKey, UrlRecord, UrlRecords};
use super::eviction::{self, select_victim, Eviction};
use super::router;
use super::shard::Shard;
use super::storage::{JsonFileStorage, ShardStorage};
use super::{is_config_file, shard_file_name, DEFAULT_CAPACITY, DEFAULT_SHARD_COUNT};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Cache engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of shards
    pub shard_count: usize,

    /// Maximum number of URLs held in memory
    pub capacity: usize,

    /// Directory holding one backing file per shard
    pub cache_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shard_count: DEFAULT_SHARD_COUNT,
            capacity: DEFAULT_CAPACITY,
            cache_dir: PathBuf::from("."),
        }
    }
}

impl EngineConfig {
    pub fn new(shard_count: usize, capacity: usize, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            shard_count,
            capacity,
            cache_dir: cache_dir.into(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(Error::Config("shard count must be at least 1".into()));
        }
        if self.capacity == 0 {
            return Err(Error::Config("capacity must be at least 1".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Result of loading a configuration directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Files parsed and admitted
    pub files_loaded: usize,
    /// Files skipped because they could not be read or parsed
    pub files_skipped: usize,
    /// Records admitted
    pub records: usize,
}

/// Point-in-time engine statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub occupancy: usize,
    pub capacity: usize,
    pub shard_count: usize,
    /// Highest shard hit count ever observed
    pub max_hit: u64,
    pub shard_entries: Vec<usize>,
    pub shard_hits: Vec<u64>,
    pub lookups: u64,
    /// Lookups answered with the unknown sentinel
    pub unknown: u64,
    pub evictions: u64,
    pub reloads: u64,
}

/// State guarded by the coarse lock
#[derive(Debug, Default)]
struct Occupancy {
    /// Entries across all shards
    cached: usize,
    /// Hit watermark seeding victim selection
    max_hit: u64,
}

/// Outcome of a lazy reload attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reload {
    /// Image admitted into the shard
    Loaded,
    /// Shard was vacated while its image was read
    Stale,
    /// No usable image
    Unavailable,
}

#[derive(Debug, Default)]
struct EngineCounters {
    lookups: AtomicU64,
    unknown: AtomicU64,
    evictions: AtomicU64,
    reloads: AtomicU64,
}

// =============================================================================
// Engine
// =============================================================================

/// Sharded URL cache with disk spill and lazy reload
pub struct CacheEngine {
    config: EngineConfig,
    shards: Box<[Shard]>,
    storage: Arc<dyn ShardStorage>,
    occupancy: Mutex<Occupancy>,
    counters: EngineCounters,
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("config", &self.config)
            .field("occupancy", &self.occupancy())
            .finish()
    }
}

impl CacheEngine {
    /// Create an engine persisting shards as JSON files under `config.cache_dir`
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_storage(config, Arc::new(JsonFileStorage::new()))
    }

    /// Create an engine with a custom storage backend
    pub fn with_storage(config: EngineConfig, storage: Arc<dyn ShardStorage>) -> Result<Self> {
        config.validate()?;

        let shards: Box<[Shard]> = (0..config.shard_count)
            .map(|i| {
                let shard = Shard::new(i, shard_file_name(&config.cache_dir, i));
                // Images left by an earlier run are still valid cold data
                if shard.path().exists() {
                    shard.set_spilled(true);
                }
                shard
            })
            .collect();

        info!(
            "Cache engine: {} shards, capacity {}, cache dir {}",
            config.shard_count,
            config.capacity,
            config.cache_dir.display()
        );

        Ok(Self {
            config,
            shards,
            storage,
            occupancy: Mutex::new(Occupancy::default()),
            counters: EngineCounters::default(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Number of URLs currently held in memory
    pub fn occupancy(&self) -> usize {
        self.occupancy.lock().cached
    }

    /// Shard a key routes to
    pub fn shard_index(&self, key: &UrlKey) -> usize {
        router::shard_index(key, self.shards.len())
    }

    /// Get a reference to a specific shard
    pub fn shard(&self, index: usize) -> &Shard {
        &self.shards[index]
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Look up a URL. Never fails: a URL with no cached or persisted entry
    /// gets the unknown sentinel.
    pub fn get(&self, key: &UrlKey) -> UrlInfo {
        let idx = self.shard_index(key);
        let shard = &self.shards[idx];

        {
            let mut occupancy = self.occupancy.lock();
            let hits = shard.record_hit();
            occupancy.max_hit = occupancy.max_hit.max(hits);
        }
        self.counters.lookups.fetch_add(1, Ordering::Relaxed);

        loop {
            let epoch = {
                let guard = shard.lock();
                if let Some(info) = guard.get(key) {
                    debug!("Hit {} in shard {}", key, idx);
                    return info.clone();
                }
                // An empty shard with a backing image is always spilled
                if !guard.is_spilled() {
                    break;
                }
                shard.epoch()
            };

            match self.reload(shard, epoch) {
                Reload::Stale => debug!("Shard {} vacated during reload, retrying", idx),
                Reload::Loaded | Reload::Unavailable => break,
            }
        }

        match shard.get(key) {
            Some(info) => info,
            None => {
                debug!("Unknown url {} (shard {})", key, idx);
                self.counters.unknown.fetch_add(1, Ordering::Relaxed);
                UrlInfo::unknown()
            }
        }
    }

    /// Repopulate `shard` from its backing file. The file is read without the
    /// shard lock; if the shard was vacated meanwhile nothing is admitted and
    /// the caller retries against the new image.
    fn reload(&self, shard: &Shard, epoch: u64) -> Reload {
        let records = match self.storage.load(shard.path()) {
            Ok(records) => records,
            Err(e) => {
                let mut guard = shard.lock();
                if shard.epoch() != epoch {
                    return Reload::Stale;
                }
                // Nothing usable on disk: stop treating the shard as spilled
                // so later misses do not re-read the same file.
                if e.is_not_found() {
                    debug!("Shard {} has no backing file", shard.index());
                    guard.set_spilled(false);
                } else if matches!(e, Error::Parse { .. }) {
                    warn!("Discarding unreadable image of shard {}: {}", shard.index(), e);
                    guard.set_spilled(false);
                } else {
                    warn!("Failed to reload shard {}: {}", shard.index(), e);
                }
                return Reload::Unavailable;
            }
        };

        let added = {
            let mut guard = shard.lock();
            if shard.epoch() != epoch {
                return Reload::Stale;
            }
            let mut added = 0;
            for record in records.urls {
                let (key, info) = record.into_parts();
                // Entries already in memory are newer than the image
                if !guard.contains_key(&key) {
                    guard.insert(key, info);
                    added += 1;
                }
            }
            guard.set_spilled(false);
            // Counted before the shard lock is released so a concurrent
            // vacate never subtracts entries that were not yet added.
            self.occupancy.lock().cached += added;
            added
        };

        self.counters.reloads.fetch_add(1, Ordering::Relaxed);
        info!("Reloaded {} urls into shard {}", added, shard.index());

        if let Err(e) = self.shrink_to_capacity(Some(shard.index())) {
            warn!("Eviction after reloading shard {} failed: {}", shard.index(), e);
        }
        Reload::Loaded
    }

    /// Vacate shards other than `keep` while occupancy exceeds capacity. A
    /// reloaded shard is admitted whole, so this may leave the engine over
    /// capacity when no other shard holds entries.
    fn shrink_to_capacity(&self, keep: Option<usize>) -> Result<()> {
        loop {
            let victim = {
                let occupancy = self.occupancy.lock();
                if occupancy.cached <= self.config.capacity {
                    return Ok(());
                }
                select_victim(&self.shards, occupancy.max_hit, keep)
            };
            let Some(victim) = victim else {
                debug!(
                    "Over capacity ({} > {}) with nothing to vacate",
                    self.occupancy(),
                    self.config.capacity
                );
                return Ok(());
            };
            self.evict(victim, None)?;
        }
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Insert or replace a URL record, vacating shards first while the cache
    /// is full.
    ///
    /// When the key's own shard is vacated the key is written with it and
    /// never enters memory; shards are then vacated until occupancy is back
    /// within capacity.
    pub fn put(&self, key: UrlKey, info: UrlInfo) -> Result<()> {
        let idx = self.shard_index(&key);
        let mut written = false;

        loop {
            let victim = {
                let occupancy = self.occupancy.lock();
                let within = if written {
                    occupancy.cached <= self.config.capacity
                } else {
                    occupancy.cached < self.config.capacity
                };
                if within {
                    break;
                }
                select_victim(&self.shards, occupancy.max_hit, None)
            };
            let Some(victim) = victim else {
                break;
            };

            let incoming = (!written && victim == idx).then_some((&key, &info));
            if self.evict(victim, incoming)?.merged_incoming {
                debug!("Wrote {} with vacated shard {}", key, victim);
                written = true;
            }
        }

        if written {
            return Ok(());
        }

        debug!("Add {} in shard {}", key, idx);
        let mut guard = self.shards[idx].lock();
        if guard.insert(key, info).is_none() {
            self.occupancy.lock().cached += 1;
        }
        Ok(())
    }

    /// Vacate one shard and settle the books
    fn evict(&self, victim: usize, incoming: Option<(&UrlKey, &UrlInfo)>) -> Result<Eviction> {
        let shard = &self.shards[victim];
        let eviction = eviction::vacate(shard, self.storage.as_ref(), incoming)?;

        {
            let mut occupancy = self.occupancy.lock();
            occupancy.cached = occupancy.cached.saturating_sub(eviction.released);
            shard.reset_hits();
        }
        if eviction.persisted > 0 {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(eviction)
    }

    // =========================================================================
    // Bulk Loading
    // =========================================================================

    /// Load every configuration file under `dir`. Files that cannot be read
    /// or parsed are logged and skipped.
    #[instrument(skip(self), fields(dir = %dir.display()))]
    pub fn bulk_load(&self, dir: &Path) -> Result<LoadReport> {
        let mut report = LoadReport::default();

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() || !is_config_file(entry.path()) {
                continue;
            }

            let records = match self.storage.load(entry.path()) {
                Ok(records) => records,
                Err(e) => {
                    warn!("Skipping {}: {}", entry.path().display(), e);
                    report.files_skipped += 1;
                    continue;
                }
            };

            report.records += self.admit(records)?;
            report.files_loaded += 1;
        }

        info!(
            "Loaded {} urls from {} files ({} skipped)",
            report.records, report.files_loaded, report.files_skipped
        );
        Ok(report)
    }

    /// Load a single configuration file, returning the number of records
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn load_file(&self, path: &Path) -> Result<usize> {
        let records = self.storage.load(path)?;
        let count = self.admit(records)?;
        info!("Loaded {} urls from {}", count, path.display());
        Ok(count)
    }

    fn admit(&self, records: UrlRecords) -> Result<usize> {
        let count = records.len();
        for record in records.urls {
            let (key, info) = record.into_parts();
            self.put(key, info)?;
        }
        Ok(count)
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Write every non-empty shard to disk without clearing memory. Returns
    /// the number of shards written.
    pub fn persist_all(&self) -> Result<usize> {
        let mut written = 0;
        for shard in self.shards.iter() {
            if eviction::persist(shard, self.storage.as_ref())? > 0 {
                written += 1;
            }
        }
        info!("Persisted {} shards", written);
        Ok(written)
    }

    /// Current statistics
    pub fn stats(&self) -> CacheStats {
        let (occupancy, max_hit) = {
            let occupancy = self.occupancy.lock();
            (occupancy.cached, occupancy.max_hit)
        };

        CacheStats {
            occupancy,
            capacity: self.config.capacity,
            shard_count: self.shards.len(),
            max_hit,
            shard_entries: self.shards.iter().map(Shard::len).collect(),
            shard_hits: self.shards.iter().map(Shard::hits).collect(),
            lookups: self.counters.lookups.load(Ordering::Relaxed),
            unknown: self.counters.unknown.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            reloads: self.counters.reloads.load(Ordering::Relaxed),
        }
    }

    /// Records currently in memory, as flat records ordered by shard then key
    pub fn snapshot(&self) -> Vec<UrlRecord> {
        self.shards
            .iter()
            .flat_map(|shard| shard.lock().entries())
            .map(UrlRecord::from)
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
