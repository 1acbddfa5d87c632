//! Cache Statistics Module
//!
//! Tracks hits, misses and the different ways entries leave the cache.

use serde::Serialize;

// == Cache Stats ==
/// Counters for a single keyed cache.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Reads that returned a value
    pub hits: u64,
    /// Reads that found nothing (absent or expired)
    pub misses: u64,
    /// Entries dropped to make room for a new one
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed
    pub expirations: u64,
    /// Entries dropped by the dependency/pattern cascade
    pub cascade_removals: u64,
    /// Current number of entries, stale ones included
    pub total_entries: usize,
}

impl CacheStats {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if nothing was read yet.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_expirations(&mut self, count: usize) {
        self.expirations += count as u64;
    }

    pub fn record_cascade_removal(&mut self) {
        self.cascade_removals += 1;
    }
}
