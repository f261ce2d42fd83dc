//! The two-tier cache.
//!
//! ```text
//!   put ──► validate ──► optimize ──► MemoryTier.insert ──► DurableStore.store
//!                                        (evict)              (write-through)
//!
//!   get ──► MemoryTier.get ──hit──► result
//!               │ miss
//!               ▼
//!           DurableStore.load ──hit──► promote into MemoryTier ──► result
//!               │ miss / error / timeout
//!               ▼
//!             None
//! ```
//!
//! One mutex guards the memory tier. Durable operations are queued while it
//! is held, so operations on a key reach the store in lock order, and are
//! waited on after it is released so a slow disk never stalls other callers
//! for longer than the persistence timeout.

use crate::cleanup::CleanupTask;
use crate::clock::{Clock, SystemClock};
use crate::config::{format_size, CacheConfig, CompressionMode};
use crate::entry::{
    find_non_finite, CacheEntry, CachedEmbedding, Metadata, MetadataValue, StoredVector,
};
use crate::error::{CacheError, CacheResult, StoreError};
use crate::key::{ContentClass, FingerprintKey};
use crate::metrics;
use crate::optimize::{OptimizationPipeline, Optimized};
use crate::stats::{CacheCounters, CacheStatistics};
use crate::store::{DurableStore, Pending, PersistentTier};
use crate::tier::{Lookup, MemoryTier};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Output of the upstream embedding generator, as handed to
/// [`AdaptiveCache::put_embedding`].
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub quality_score: f32,
    pub generation_cost: Duration,
    pub metadata: Metadata,
}

impl Embedding {
    pub fn new(vector: Vec<f32>, quality_score: f32, generation_cost: Duration) -> Self {
        Self {
            vector,
            quality_score,
            generation_cost,
            metadata: Metadata::new(),
        }
    }

    /// Attach a caller-supplied metadata value.
    pub fn with_metadata(mut self, name: &str, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(name.to_string(), value.into());
        self
    }
}

/// What a cleanup pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupOutcome {
    /// Expired entries dropped from memory.
    pub memory_expired: usize,
    /// Expired rows deleted from the durable tier.
    pub durable_removed: usize,
}

pub(crate) struct Inner {
    config: CacheConfig,
    pipeline: OptimizationPipeline,
    memory: Mutex<MemoryTier>,
    counters: CacheCounters,
    persistent: Option<PersistentTier>,
    clock: Arc<dyn Clock>,
}

/// Adaptive two-tier embedding cache.
///
/// Construct once and share by reference or `Arc`. All methods take `&self`.
pub struct AdaptiveCache {
    inner: Arc<Inner>,
    cleanup: Mutex<Option<CleanupTask>>,
}

impl AdaptiveCache {
    /// Create a cache using the system clock.
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a cache that reads time from `clock`.
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> CacheResult<Self> {
        config.validate()?;

        let persistent = match (&config.persistence.path, config.persistence.enabled) {
            (Some(path), true) => {
                let store = DurableStore::open(path, config.compression, clock.clone())?;
                let timeout = config.persistence.timeout;
                Some(if config.concurrent {
                    PersistentTier::spawn(store, timeout)?
                } else {
                    PersistentTier::inline(store, timeout)
                })
            }
            _ => None,
        };

        let inner = Arc::new(Inner {
            pipeline: config.optimization.pipeline(),
            memory: Mutex::new(MemoryTier::from_config(&config)),
            counters: CacheCounters::new(),
            persistent,
            clock,
            config,
        });

        let cleanup = match inner.config.cleanup_interval {
            Some(interval) => Some(
                CleanupTask::spawn(Arc::downgrade(&inner), interval).map_err(|source| {
                    CacheError::Spawn {
                        name: "embcache-cleanup",
                        source,
                    }
                })?,
            ),
            None => None,
        };

        info!(
            strategy = inner.config.strategy.as_str(),
            max_entries = inner.config.max_entries,
            max_memory = %format_size(inner.config.max_memory_bytes),
            persistence = inner.persistent.is_some(),
            techniques = ?inner.pipeline.techniques(),
            "embedding cache ready"
        );

        Ok(Self {
            inner,
            cleanup: Mutex::new(cleanup),
        })
    }

    /// The configuration this cache was built with.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Look up the embedding for `(text, model_id, class)`.
    pub fn get(&self, text: &str, model_id: &str, class: ContentClass) -> Option<CachedEmbedding> {
        let start = Instant::now();
        let key = FingerprintKey::compute(text, model_id, class);
        let result = self.inner.get(&key);
        let _ = metrics::GET_LATENCY.increment(start.elapsed().as_nanos() as u64);
        result
    }

    /// Cache a freshly generated embedding.
    ///
    /// Fails only for malformed input: an empty or non-finite vector, a
    /// length other than the configured dimensions, a non-finite quality
    /// score or metadata number, or an entry larger than the whole memory
    /// budget.
    pub fn put(
        &self,
        text: &str,
        model_id: &str,
        class: ContentClass,
        vector: Vec<f32>,
        quality_score: f32,
        generation_cost: Duration,
    ) -> CacheResult<()> {
        self.put_embedding(
            text,
            model_id,
            class,
            Embedding::new(vector, quality_score, generation_cost),
        )
    }

    /// Like [`put`](Self::put), carrying caller metadata along.
    pub fn put_embedding(
        &self,
        text: &str,
        model_id: &str,
        class: ContentClass,
        embedding: Embedding,
    ) -> CacheResult<()> {
        let start = Instant::now();
        let key = FingerprintKey::compute(text, model_id, class);
        let result = self.inner.put(key, model_id, class, embedding);
        match &result {
            Ok(()) => metrics::PUTS.increment(),
            Err(_) => metrics::PUT_REJECTED.increment(),
        };
        let _ = metrics::PUT_LATENCY.increment(start.elapsed().as_nanos() as u64);
        result
    }

    /// Remove the entry from both tiers. Returns true if either held it.
    pub fn delete(&self, text: &str, model_id: &str, class: ContentClass) -> bool {
        let key = FingerprintKey::compute(text, model_id, class);
        self.inner.delete(&key)
    }

    /// True if the memory tier holds a live entry. Does not count as an access.
    pub fn contains(&self, text: &str, model_id: &str, class: ContentClass) -> bool {
        let key = FingerprintKey::compute(text, model_id, class);
        let now = self.inner.clock.now();
        self.inner.memory.lock().peek(&key, now).is_some()
    }

    /// Remove expired entries from both tiers.
    pub fn cleanup(&self) -> CleanupOutcome {
        self.inner.cleanup()
    }

    /// Empty the memory tier and reset statistics. The durable tier is left
    /// alone; see [`clear_persistent`](Self::clear_persistent).
    pub fn clear(&self) {
        let mut memory = self.inner.memory.lock();
        memory.clear();
        self.inner.counters.reset();
        self.inner.publish_sizes(&memory);
        debug!("memory tier cleared");
    }

    /// Delete every durable row. Returns the number removed, or 0 when
    /// persistence is disabled.
    pub fn clear_persistent(&self) -> CacheResult<u64> {
        match &self.inner.persistent {
            Some(persistent) => {
                let removed = persistent.run(|store| store.clear())?;
                info!(removed, "durable tier cleared");
                Ok(removed)
            }
            None => Ok(0),
        }
    }

    /// Number of entries in the memory tier.
    pub fn len(&self) -> usize {
        self.inner.memory.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current counters plus live tier sizes.
    pub fn stats(&self) -> CacheStatistics {
        self.inner.stats()
    }

    /// Stop the cleanup task and the persistence worker. Later durable
    /// operations are treated as failures. Safe to call more than once.
    pub fn shutdown(&self) {
        if let Some(task) = self.cleanup.lock().take() {
            task.stop();
        }
        if let Some(persistent) = &self.inner.persistent {
            persistent.shutdown();
        }
    }
}

impl Drop for AdaptiveCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn get(&self, key: &FingerprintKey) -> Option<CachedEmbedding> {
        let pending = {
            let mut memory = self.memory.lock();
            let now = self.clock.now();
            let mut expired = false;
            let hit = match memory.get(key, now) {
                Lookup::Hit(entry) => Some(entry.to_embedding()),
                Lookup::Expired(_) => {
                    expired = true;
                    None
                }
                Lookup::Miss => None,
            };
            if expired {
                self.counters.record_expirations(1);
                metrics::EXPIRATIONS.increment();
                self.publish_sizes(&memory);
            }
            if let Some(found) = hit {
                drop(memory);
                self.record_get(true);
                return Some(found);
            }
            let key = *key;
            self.persistent
                .as_ref()
                .map(|p| p.submit(move |store| store.load(&key)))
        };

        let loaded = pending.and_then(|pending| self.absorb("load", pending.wait()).flatten());
        let Some(entry) = loaded else {
            self.record_get(false);
            return None;
        };

        let (found, touch) = self.promote(entry);
        if let Some(touch) = touch {
            self.absorb("touch", touch.wait());
        }
        self.record_get(true);
        Some(found)
    }

    fn promote(&self, mut entry: CacheEntry) -> (CachedEmbedding, Option<Pending<bool>>) {
        let mut memory = self.memory.lock();
        let now = self.clock.now();

        // another caller may have put or promoted this key while we waited
        if memory.contains_key(&entry.key) {
            if let Lookup::Hit(current) = memory.get(&entry.key, now) {
                return (current.to_embedding(), None);
            }
        }

        let key = entry.key;
        entry.touch(now);
        let found = entry.to_embedding();
        let evicted = memory.insert(entry, now);
        self.record_evictions(evicted.len());
        self.counters.record_promotion();
        metrics::PROMOTIONS.increment();
        self.publish_sizes(&memory);
        debug!(key = ?key, evicted = evicted.len(), "promoted from durable tier");

        let touch = self
            .persistent
            .as_ref()
            .map(|p| p.submit(move |store| store.touch(&key)));
        (found, touch)
    }

    fn put(
        &self,
        key: FingerprintKey,
        model_id: &str,
        class: ContentClass,
        embedding: Embedding,
    ) -> CacheResult<()> {
        let Embedding {
            vector,
            quality_score,
            generation_cost,
            mut metadata,
        } = embedding;

        self.validate(&vector, quality_score, &metadata)?;

        let optimized = match self.pipeline.run(&vector) {
            Ok(optimized) => optimized,
            Err(e) => {
                warn!(key = ?key, error = %e, "optimization failed, caching raw vector");
                Optimized {
                    original_dimensions: vector.len(),
                    vector: StoredVector::Dense(vector),
                    applied: Vec::new(),
                    bytes_saved: 0,
                }
            }
        };
        optimized.annotate(&mut metadata);

        let now = self.clock.now();
        let entry = CacheEntry {
            key,
            vector: optimized.vector,
            metadata,
            model_id: model_id.to_string(),
            class,
            created_at: now,
            last_accessed_at: now,
            access_count: 1,
            ttl: self.config.ttl_for(class),
            compressed: self.persistent.is_some()
                && self.config.compression != CompressionMode::None,
            optimized: !optimized.applied.is_empty(),
            quality_score: quality_score.clamp(0.0, 1.0),
            generation_cost,
        };

        let size = entry.memory_size();
        if size > self.config.max_memory_bytes {
            return Err(CacheError::invalid_vector(format!(
                "entry of {} bytes exceeds the {} byte memory budget",
                size, self.config.max_memory_bytes
            )));
        }

        let pending = {
            let mut memory = self.memory.lock();
            let pending = self.persistent.as_ref().map(|p| {
                let row = entry.clone();
                p.submit(move |store| store.store(&row))
            });
            let evicted = memory.insert(entry, now);
            self.record_evictions(evicted.len());
            self.publish_sizes(&memory);
            if !evicted.is_empty() {
                debug!(
                    evicted = evicted.len(),
                    strategy = self.config.strategy.as_str(),
                    "evicted to make room"
                );
            }
            pending
        };

        if let Some(pending) = pending {
            self.absorb("store", pending.wait());
        }
        self.counters.record_put(optimized.bytes_saved as u64);
        Ok(())
    }

    fn validate(
        &self,
        vector: &[f32],
        quality_score: f32,
        metadata: &Metadata,
    ) -> CacheResult<()> {
        if vector.is_empty() {
            return Err(CacheError::invalid_vector("vector is empty"));
        }
        if let Some(expected) = self.config.dimensions {
            if vector.len() != expected {
                return Err(CacheError::invalid_vector(format!(
                    "expected {} dimensions, got {}",
                    expected,
                    vector.len()
                )));
            }
        }
        if let Some(index) = vector.iter().position(|x| !x.is_finite()) {
            return Err(CacheError::invalid_vector(format!(
                "component {} is not finite",
                index
            )));
        }
        if !quality_score.is_finite() {
            return Err(CacheError::InvalidQuality(quality_score));
        }
        if let Some(name) = find_non_finite(metadata) {
            return Err(CacheError::InvalidMetadata { name });
        }
        Ok(())
    }

    fn delete(&self, key: &FingerprintKey) -> bool {
        let (in_memory, pending) = {
            let mut memory = self.memory.lock();
            let removed = memory.remove(key).is_some();
            self.publish_sizes(&memory);
            let key = *key;
            let pending = self
                .persistent
                .as_ref()
                .map(|p| p.submit(move |store| store.delete(&key)));
            (removed, pending)
        };

        let in_store = pending
            .and_then(|pending| self.absorb("delete", pending.wait()))
            .unwrap_or(false);
        in_memory || in_store
    }

    pub(crate) fn cleanup(&self) -> CleanupOutcome {
        let (expired, pending) = {
            let mut memory = self.memory.lock();
            let expired = memory.remove_expired(self.clock.now());
            self.publish_sizes(&memory);
            let pending = self
                .persistent
                .as_ref()
                .map(|p| p.submit(|store| store.cleanup_expired()));
            (expired.len(), pending)
        };

        let durable_removed = pending
            .and_then(|pending| self.absorb("cleanup", pending.wait()))
            .unwrap_or(0);

        self.counters.record_expirations(expired as u64);
        self.counters.record_cleanup();
        metrics::EXPIRATIONS.add(expired as u64);
        metrics::CLEANUP_RUNS.increment();
        debug!(memory_expired = expired, durable_removed, "cleanup complete");

        CleanupOutcome {
            memory_expired: expired,
            durable_removed,
        }
    }

    fn stats(&self) -> CacheStatistics {
        let (cache_size, memory_bytes) = {
            let memory = self.memory.lock();
            (memory.len(), memory.memory_bytes())
        };

        let mut stats = CacheStatistics {
            counters: self.counters.snapshot(),
            cache_size,
            memory_bytes,
            ..Default::default()
        };

        if let Some(persistent) = &self.persistent {
            if let Some(durable) = self.absorb("stats", persistent.run(|store| store.stats())) {
                stats.durable_entries = Some(durable.entries);
                stats.by_model = durable.by_model;
                stats.by_class = durable.by_class;
            }
            // reflect an error counted just above
            stats.counters = self.counters.snapshot();
        }
        stats
    }

    fn record_get(&self, hit: bool) {
        self.counters.record_get(hit);
        metrics::REQUESTS.increment();
        if hit {
            metrics::HITS.increment();
        } else {
            metrics::MISSES.increment();
        }
    }

    fn record_evictions(&self, count: usize) {
        if count > 0 {
            self.counters.record_evictions(count as u64);
            metrics::EVICTIONS.add(count as u64);
        }
    }

    fn publish_sizes(&self, memory: &MemoryTier) {
        metrics::ENTRIES.set(memory.len() as i64);
        metrics::MEMORY_BYTES.set(memory.memory_bytes() as i64);
    }

    /// Log and count a durable-tier failure, turning it into `None`.
    fn absorb<T>(&self, op: &'static str, result: Result<T, StoreError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(op, error = %e, "durable tier unavailable, continuing without it");
                self.counters.record_persistence_error();
                metrics::PERSISTENCE_ERRORS.increment();
                None
            }
        }
    }
}
