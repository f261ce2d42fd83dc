//! Per-cache statistics.
//!
//! - [`CacheCounters`]: lock-free counters updated on every operation
//! - [`CounterSnapshot`]: a point-in-time copy of the counters
//! - [`CacheStatistics`]: counters plus live tier sizes, as returned by
//!   [`crate::AdaptiveCache::stats`]
//!
//! These are owned by one cache instance and are reset by `clear`. The
//! process-wide metriken metrics in [`crate::metrics`] are never reset.

use crate::key::ContentClass;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for tracking cache operations.
#[derive(Debug, Default)]
pub struct CacheCounters {
    requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    promotions: AtomicU64,
    persistence_errors: AtomicU64,
    cleanup_operations: AtomicU64,
    compression_bytes_saved: AtomicU64,
}

impl CacheCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a `get`.
    #[inline]
    pub fn record_get(&self, hit: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an accepted `put` and the bytes its optimization saved.
    #[inline]
    pub fn record_put(&self, bytes_saved: u64) {
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.compression_bytes_saved
            .fetch_add(bytes_saved, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_persistence_error(&self) {
        self.persistence_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cleanup(&self) {
        self.cleanup_operations.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the current counter values.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            persistence_errors: self.persistence_errors.load(Ordering::Relaxed),
            cleanup_operations: self.cleanup_operations.load(Ordering::Relaxed),
            compression_bytes_saved: self.compression_bytes_saved.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        for counter in [
            &self.requests,
            &self.hits,
            &self.misses,
            &self.puts,
            &self.evictions,
            &self.expirations,
            &self.promotions,
            &self.persistence_errors,
            &self.cleanup_operations,
            &self.compression_bytes_saved,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of counter values at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub promotions: u64,
    pub persistence_errors: u64,
    pub cleanup_operations: u64,
    pub compression_bytes_saved: u64,
}

impl CounterSnapshot {
    /// `hits / max(1, requests)`, in `[0, 1]`.
    pub fn hit_rate(&self) -> f64 {
        self.hits as f64 / self.requests.max(1) as f64
    }

    /// Compute the difference between two snapshots (self - other).
    pub fn diff(&self, other: &CounterSnapshot) -> CounterSnapshot {
        CounterSnapshot {
            requests: self.requests.saturating_sub(other.requests),
            hits: self.hits.saturating_sub(other.hits),
            misses: self.misses.saturating_sub(other.misses),
            puts: self.puts.saturating_sub(other.puts),
            evictions: self.evictions.saturating_sub(other.evictions),
            expirations: self.expirations.saturating_sub(other.expirations),
            promotions: self.promotions.saturating_sub(other.promotions),
            persistence_errors: self
                .persistence_errors
                .saturating_sub(other.persistence_errors),
            cleanup_operations: self
                .cleanup_operations
                .saturating_sub(other.cleanup_operations),
            compression_bytes_saved: self
                .compression_bytes_saved
                .saturating_sub(other.compression_bytes_saved),
        }
    }
}

/// Cache statistics as reported by [`crate::AdaptiveCache::stats`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStatistics {
    /// Counters since construction or the last `clear`.
    pub counters: CounterSnapshot,
    /// Entries currently in the memory tier.
    pub cache_size: usize,
    /// Estimated memory tier usage in bytes.
    pub memory_bytes: usize,
    /// Rows in the durable tier, when it is enabled and reachable.
    pub durable_entries: Option<u64>,
    /// Durable rows per model id.
    pub by_model: BTreeMap<String, u64>,
    /// Durable rows per content class.
    pub by_class: BTreeMap<ContentClass, u64>,
}

impl CacheStatistics {
    pub fn requests(&self) -> u64 {
        self.counters.requests
    }

    pub fn hits(&self) -> u64 {
        self.counters.hits
    }

    pub fn misses(&self) -> u64 {
        self.counters.misses
    }

    pub fn cleanup_operations(&self) -> u64 {
        self.counters.cleanup_operations
    }

    pub fn compression_bytes_saved(&self) -> u64 {
        self.counters.compression_bytes_saved
    }

    /// `hits / max(1, requests)`.
    pub fn hit_rate(&self) -> f64 {
        self.counters.hit_rate()
    }

    /// Render as a JSON object.
    pub fn to_json(&self) -> json::JsonValue {
        let c = &self.counters;
        let mut by_model = json::JsonValue::new_object();
        for (model, count) in &self.by_model {
            by_model[model.as_str()] = (*count).into();
        }
        let mut by_class = json::JsonValue::new_object();
        for (class, count) in &self.by_class {
            by_class[class.as_str()] = (*count).into();
        }

        json::object! {
            requests: c.requests,
            hits: c.hits,
            misses: c.misses,
            hit_rate: self.hit_rate(),
            puts: c.puts,
            evictions: c.evictions,
            expirations: c.expirations,
            promotions: c.promotions,
            persistence_errors: c.persistence_errors,
            cleanup_operations: c.cleanup_operations,
            compression_bytes_saved: c.compression_bytes_saved,
            cache_size: self.cache_size,
            memory_bytes: self.memory_bytes,
            durable_entries: self.durable_entries,
            by_model: by_model,
            by_class: by_class,
        }
    }
}
