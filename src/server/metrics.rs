//! Lookup Service Metrics
//!
//! Prometheus exposition of request outcomes and cache engine statistics.
//! Engine statistics are copied into gauges at scrape time.

use prometheus::{Encoder, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::cache::CacheStats;
use crate::error::Result;

/// Outcome label for lookup requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    /// Answered from the cache or a shard file
    Known,
    /// Answered with the unknown sentinel
    Unknown,
    /// Request could not be answered
    Error,
}

impl LookupOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupOutcome::Known => "known",
            LookupOutcome::Unknown => "unknown",
            LookupOutcome::Error => "error",
        }
    }
}

/// Metrics registry for the lookup service
pub struct ServiceMetrics {
    registry: Registry,
    requests: IntCounterVec,
    occupancy: IntGauge,
    capacity: IntGauge,
    lookups: IntGauge,
    evictions: IntGauge,
    reloads: IntGauge,
    shard_entries: IntGaugeVec,
    shard_hits: IntGaugeVec,
}

impl ServiceMetrics {
    /// Create and register all metrics
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("url_lookup".to_string()), None)?;

        let requests = IntCounterVec::new(
            Opts::new("requests_total", "Lookup requests by outcome"),
            &["outcome"],
        )?;
        let occupancy = IntGauge::new("cache_entries", "URLs currently held in memory")?;
        let capacity = IntGauge::new("cache_capacity", "Maximum URLs held in memory")?;
        let lookups = IntGauge::new("cache_lookups", "Lookups served by the cache engine")?;
        let evictions = IntGauge::new("cache_evictions", "Shards vacated to disk")?;
        let reloads = IntGauge::new("cache_reloads", "Shards reloaded from disk")?;
        let shard_entries = IntGaugeVec::new(
            Opts::new("shard_entries", "URLs held in memory per shard"),
            &["shard"],
        )?;
        let shard_hits = IntGaugeVec::new(
            Opts::new("shard_hits", "Lookups per shard since its last eviction"),
            &["shard"],
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(occupancy.clone()))?;
        registry.register(Box::new(capacity.clone()))?;
        registry.register(Box::new(lookups.clone()))?;
        registry.register(Box::new(evictions.clone()))?;
        registry.register(Box::new(reloads.clone()))?;
        registry.register(Box::new(shard_entries.clone()))?;
        registry.register(Box::new(shard_hits.clone()))?;

        Ok(Self {
            registry,
            requests,
            occupancy,
            capacity,
            lookups,
            evictions,
            reloads,
            shard_entries,
            shard_hits,
        })
    }

    pub fn record_request(&self, outcome: LookupOutcome) {
        self.requests.with_label_values(&[outcome.as_str()]).inc();
    }

    pub fn request_count(&self, outcome: LookupOutcome) -> u64 {
        self.requests.with_label_values(&[outcome.as_str()]).get()
    }

    /// Copy engine statistics into the gauges
    pub fn observe(&self, stats: &CacheStats) {
        self.occupancy.set(stats.occupancy as i64);
        self.capacity.set(stats.capacity as i64);
        self.lookups.set(stats.lookups as i64);
        self.evictions.set(stats.evictions as i64);
        self.reloads.set(stats.reloads as i64);
        for (i, entries) in stats.shard_entries.iter().enumerate() {
            self.shard_entries
                .with_label_values(&[i.to_string().as_str()])
                .set(*entries as i64);
        }
        for (i, hits) in stats.shard_hits.iter().enumerate() {
            self.shard_hits
                .with_label_values(&[i.to_string().as_str()])
                .set(*hits as i64);
        }
    }

    /// Encode every metric in the Prometheus text format
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

// =============================================================================
// Tests
// =============================================================================
