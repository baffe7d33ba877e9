//! Cache Statistics Module
//!
//! Operation counters and the snapshot structure exposed for dashboards and logs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::CacheConfig;
use crate::driver::{DriverKind, RegistrySnapshot};

// == Cache Counters ==
/// Lock-free counters updated on the hot path.
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

impl CacheCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a read that found nothing, expired reads included.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a key evicted because its TTL elapsed.
    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        hit_rate(self.hits(), self.misses())
    }
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

// == Stats Snapshot ==
/// Point-in-time view of the engine. Meant for observation only; the engine
/// never reads it back to make decisions.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub default_driver: String,
    pub health: BTreeMap<DriverKind, bool>,
    pub item_counts: BTreeMap<DriverKind, usize>,
    pub config: CacheConfig,
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub fallbacks: u64,
    pub hit_rate: f64,
    pub tracked_ttls: usize,
    pub generated_at: DateTime<Utc>,
}

impl StatsSnapshot {
    pub(crate) fn assemble(
        registry: RegistrySnapshot,
        config: CacheConfig,
        counters: &CacheCounters,
        fallbacks: u64,
        tracked_ttls: usize,
    ) -> Self {
        let hits = counters.hits();
        let misses = counters.misses();
        Self {
            default_driver: registry.default_driver,
            health: registry.health,
            item_counts: registry.item_counts,
            config,
            hits,
            misses,
            expirations: counters.expirations(),
            fallbacks,
            hit_rate: hit_rate(hits, misses),
            tracked_ttls,
            generated_at: Utc::now(),
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let counters = CacheCounters::new();
        assert_eq!(counters.hits(), 0);
        assert_eq!(counters.misses(), 0);
        assert_eq!(counters.expirations(), 0);
        assert_eq!(counters.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let counters = CacheCounters::new();
        counters.record_hit();
        counters.record_hit();
        counters.record_hit();
        counters.record_miss();
        assert_eq!(counters.hit_rate(), 0.75);
    }

    #[test]
    fn test_snapshot_serializes_for_dashboards() {
        let counters = CacheCounters::new();
        counters.record_hit();
        counters.record_expiration();

        let mut health = BTreeMap::new();
        health.insert(DriverKind::Memory, true);
        health.insert(DriverKind::Persistent, false);
        let registry = RegistrySnapshot {
            default_driver: "Memory".to_string(),
            health,
            item_counts: BTreeMap::new(),
        };

        let snapshot = StatsSnapshot::assemble(registry, CacheConfig::default(), &counters, 2, 0);
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json["defaultDriver"], "Memory");
        assert_eq!(json["health"]["Persistent"], false);
        assert_eq!(json["fallbacks"], 2);
        assert_eq!(json["hitRate"], 1.0);
        assert_eq!(json["config"]["maxKeyLength"], 256);
    }
}
