//! Eviction Controller
//!
//! Frees capacity a whole shard at a time: the coldest shard that frees the
//! most space is written to its backing file and emptied.
//!
//! # Victim selection
//!
//! Shards are scanned in index order against a running best that starts at
//! the global hit watermark. A shard replaces the best when its hit count is
//! not higher and its entry count is strictly larger, so among equally cold
//! shards the larger one wins and ties go to the lowest index.

use std::collections::BTreeMap;

use tracing::{info, instrument, warn};

use super::entry::{UrlInfo, UrlKey, UrlRecord, UrlRecords};
use super::shard::{Shard, ShardGuard};
use super::storage::ShardStorage;
use crate::error::{Error, Result};

/// Outcome of vacating one shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    /// Index of the vacated shard
    pub shard: usize,
    /// Entries removed from memory that were counted in occupancy
    pub released: usize,
    /// Records in the written shard image
    pub persisted: usize,
    /// The incoming key was written along with the victim
    pub merged_incoming: bool,
}

/// Pick the shard to vacate, skipping `exclude`. Returns `None` when every
/// candidate is empty.
pub fn select_victim(shards: &[Shard], max_hit: u64, exclude: Option<usize>) -> Option<usize> {
    let mut best = None;
    let mut best_hits = max_hit;
    let mut best_count = 0;

    for shard in shards {
        if Some(shard.index()) == exclude {
            continue;
        }
        let hits = shard.hits();
        let count = shard.len();
        if hits <= best_hits && count > best_count {
            best = Some(shard.index());
            best_hits = hits;
            best_count = count;
        }
    }

    best
}

/// Write `shard` to its backing file and empty it.
///
/// `incoming` is inserted first when it belongs to this shard, so it ends up
/// in the written image rather than in memory. If the write fails the shard
/// is restored exactly as it was (the incoming key backed out) and the error
/// is returned.
#[instrument(skip_all, fields(shard = shard.index()))]
pub fn vacate(
    shard: &Shard,
    storage: &dyn ShardStorage,
    incoming: Option<(&UrlKey, &UrlInfo)>,
) -> Result<Eviction> {
    let mut guard = shard.lock();

    let displaced = incoming.map(|(key, info)| guard.insert(key.clone(), info.clone()));
    let merged_new = matches!(displaced, Some(None));

    if guard.is_empty() {
        // Drained by a concurrent eviction; never overwrite a persisted image
        // with an empty one.
        return Ok(Eviction {
            shard: shard.index(),
            released: 0,
            persisted: 0,
            merged_incoming: false,
        });
    }

    let drained = guard.drain_all();

    let records = match shard_image(&guard, storage, shard, &drained) {
        Ok(records) => records,
        Err(e) => {
            restore(&mut guard, drained, incoming, displaced);
            return Err(e);
        }
    };

    if let Err(e) = storage.flush(shard.path(), &records) {
        warn!("Failed to vacate shard {}: {}", shard.index(), e);
        restore(&mut guard, drained, incoming, displaced);
        return Err(e);
    }

    guard.set_spilled(true);
    guard.bump_epoch();

    let released = drained.len() - usize::from(merged_new);
    info!(
        "Vacated shard {} with {} urls ({} persisted)",
        shard.index(),
        released,
        records.len()
    );

    Ok(Eviction {
        shard: shard.index(),
        released,
        persisted: records.len(),
        merged_incoming: incoming.is_some(),
    })
}

/// Write `shard` to its backing file without emptying it. Returns the
/// number of records in the written image.
#[instrument(skip_all, fields(shard = shard.index()))]
pub fn persist(shard: &Shard, storage: &dyn ShardStorage) -> Result<usize> {
    let guard = shard.lock();
    if guard.is_empty() {
        return Ok(0);
    }

    let entries = guard.entries();
    let records = shard_image(&guard, storage, shard, &entries)?;
    storage.flush(shard.path(), &records)?;
    Ok(records.len())
}

/// Build the on-disk image of a shard: `entries` layered over whatever the
/// backing file already holds when the shard is spilled.
fn shard_image(
    guard: &ShardGuard<'_>,
    storage: &dyn ShardStorage,
    shard: &Shard,
    entries: &[(UrlKey, UrlInfo)],
) -> Result<UrlRecords> {
    let mut image = BTreeMap::new();
    if guard.is_spilled() {
        match storage.load(shard.path()) {
            Ok(existing) => image.extend(existing.urls.into_iter().map(UrlRecord::into_parts)),
            Err(e) if e.is_not_found() => {}
            Err(e @ Error::Parse { .. }) => {
                warn!("Replacing unreadable shard image: {}", e);
            }
            Err(e) => return Err(e),
        }
    }
    image.extend(entries.iter().cloned());

    Ok(UrlRecords::new(
        image.into_iter().map(UrlRecord::from).collect(),
    ))
}

/// Put drained entries back and undo the incoming insert
fn restore(
    guard: &mut ShardGuard<'_>,
    drained: Vec<(UrlKey, UrlInfo)>,
    incoming: Option<(&UrlKey, &UrlInfo)>,
    displaced: Option<Option<UrlInfo>>,
) {
    for (key, info) in drained {
        guard.insert(key, info);
    }
    if let (Some((key, _)), Some(displaced)) = (incoming, displaced) {
        match displaced {
            Some(old) => {
                guard.insert(key.clone(), old);
            }
            None => {
                guard.remove(key);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
