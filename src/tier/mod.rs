//! In-memory tier.
//!
//! A bounded map from [`FingerprintKey`] to [`CacheEntry`] with auxiliary
//! ordered indices, one per eviction order:
//!
//! ```text
//!   entries:   key -> (entry, tick)
//!   recency:   tick -> key                         (LRU)
//!   frequency: (access_count, created, key)        (LFU)
//!   created:   (created, key)                      (TTL fallback)
//!   expiry:    (expires_at, key)                   (TTL, cleanup)
//! ```
//!
//! Every index is maintained whatever the configured strategy, so expired
//! entries can always be swept in order and the strategy can be inspected
//! in tests. Ticks come from a per-tier counter that advances on every
//! insert and hit, which keeps LRU order exact even when timestamps tie.

mod eviction;

pub use eviction::adaptive_score;

use crate::clock::unix_nanos;
use crate::config::{CacheConfig, EvictionStrategy, ScoringWeights};
use crate::entry::CacheEntry;
use crate::key::{FingerprintKey, KEY_LEN};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use time::OffsetDateTime;

const MIN_KEY: FingerprintKey = FingerprintKey::from_bytes([0; KEY_LEN]);

/// Result of a memory-tier lookup.
#[derive(Debug)]
pub enum Lookup<'a> {
    /// Live entry, already touched.
    Hit(&'a CacheEntry),
    /// The entry had expired and was removed.
    Expired(CacheEntry),
    /// No entry for the key.
    Miss,
}

struct Slot {
    entry: CacheEntry,
    tick: u64,
}

/// Bounded in-memory store with strategy-driven eviction.
pub struct MemoryTier {
    strategy: EvictionStrategy,
    weights: ScoringWeights,
    max_entries: usize,
    max_memory_bytes: usize,

    entries: HashMap<FingerprintKey, Slot>,
    recency: BTreeMap<u64, FingerprintKey>,
    frequency: BTreeSet<(u64, i64, FingerprintKey)>,
    created: BTreeSet<(i64, FingerprintKey)>,
    expiry: BTreeSet<(i64, FingerprintKey)>,

    memory_bytes: usize,
    tick: u64,
}

impl MemoryTier {
    /// Create an empty tier.
    pub fn new(
        strategy: EvictionStrategy,
        weights: ScoringWeights,
        max_entries: usize,
        max_memory_bytes: usize,
    ) -> Self {
        Self {
            strategy,
            weights,
            max_entries: max_entries.max(1),
            max_memory_bytes,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            frequency: BTreeSet::new(),
            created: BTreeSet::new(),
            expiry: BTreeSet::new(),
            memory_bytes: 0,
            tick: 0,
        }
    }

    /// Create an empty tier sized by `config`.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.strategy,
            config.scoring,
            config.max_entries,
            config.max_memory_bytes,
        )
    }

    pub fn strategy(&self) -> EvictionStrategy {
        self.strategy
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn max_memory_bytes(&self) -> usize {
        self.max_memory_bytes
    }

    /// Number of entries held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Estimated bytes held, as the sum of [`CacheEntry::memory_size`].
    pub fn memory_bytes(&self) -> usize {
        self.memory_bytes
    }

    /// Look up `key`, touching the entry on a hit.
    ///
    /// A logically expired entry is removed and reported as
    /// [`Lookup::Expired`].
    pub fn get(&mut self, key: &FingerprintKey, now: OffsetDateTime) -> Lookup<'_> {
        let expired = match self.entries.get(key) {
            None => return Lookup::Miss,
            Some(slot) => slot.entry.is_expired(now),
        };
        if expired {
            return match self.remove(key) {
                Some(entry) => Lookup::Expired(entry),
                None => Lookup::Miss,
            };
        }

        let tick = self.next_tick();
        let Some(slot) = self.entries.get_mut(key) else {
            return Lookup::Miss;
        };
        let created = unix_nanos(slot.entry.created_at);
        self.frequency
            .remove(&(slot.entry.access_count, created, *key));
        self.recency.remove(&slot.tick);

        slot.entry.touch(now);
        slot.tick = tick;

        self.frequency
            .insert((slot.entry.access_count, created, *key));
        self.recency.insert(tick, *key);

        Lookup::Hit(&slot.entry)
    }

    /// Borrow an entry without touching it. Expired entries are hidden but
    /// left in place.
    pub fn peek(&self, key: &FingerprintKey, now: OffsetDateTime) -> Option<&CacheEntry> {
        self.entries
            .get(key)
            .map(|slot| &slot.entry)
            .filter(|entry| !entry.is_expired(now))
    }

    /// Insert `entry`, replacing any entry with the same key, and evict until
    /// both the entry limit and the memory budget hold.
    ///
    /// Returns the evicted entries in eviction order. The replaced entry, if
    /// any, is not counted as evicted.
    pub fn insert(&mut self, entry: CacheEntry, now: OffsetDateTime) -> Vec<CacheEntry> {
        self.remove(&entry.key);

        let size = entry.memory_size();
        let mut evicted = Vec::new();
        while !self.entries.is_empty()
            && (self.entries.len() >= self.max_entries
                || self.memory_bytes + size > self.max_memory_bytes)
        {
            let Some(victim) = self.select_victim(now) else {
                break;
            };
            match self.remove(&victim) {
                Some(entry) => evicted.push(entry),
                None => break,
            }
        }

        let tick = self.next_tick();
        let key = entry.key;
        let created = unix_nanos(entry.created_at);
        let expires_at = entry.expires_at();
        self.recency.insert(tick, key);
        self.frequency.insert((entry.access_count, created, key));
        self.created.insert((created, key));
        if let Some(expires_at) = expires_at {
            self.expiry.insert((unix_nanos(expires_at), key));
        }
        self.memory_bytes += size;
        self.entries.insert(key, Slot { entry, tick });

        evicted
    }

    /// Remove and return the entry for `key`.
    pub fn remove(&mut self, key: &FingerprintKey) -> Option<CacheEntry> {
        let Slot { entry, tick } = self.entries.remove(key)?;
        let created = unix_nanos(entry.created_at);
        self.recency.remove(&tick);
        self.frequency.remove(&(entry.access_count, created, *key));
        self.created.remove(&(created, *key));
        if let Some(expires_at) = entry.expires_at() {
            self.expiry.remove(&(unix_nanos(expires_at), *key));
        }
        self.memory_bytes = self.memory_bytes.saturating_sub(entry.memory_size());
        Some(entry)
    }

    /// Remove every entry that is logically expired at `now`.
    pub fn remove_expired(&mut self, now: OffsetDateTime) -> Vec<CacheEntry> {
        let bound = (unix_nanos(now), MIN_KEY);
        let expired: Vec<FingerprintKey> = self
            .expiry
            .range(..bound)
            .map(|(_, key)| *key)
            .collect();
        expired.iter().filter_map(|key| self.remove(key)).collect()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
        self.frequency.clear();
        self.created.clear();
        self.expiry.clear();
        self.memory_bytes = 0;
    }

    /// True if `key` is held, expired or not.
    pub fn contains_key(&self, key: &FingerprintKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys from least to most recently used.
    pub fn keys_by_recency(&self) -> Vec<FingerprintKey> {
        self.recency.values().copied().collect()
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Metadata, StoredVector};
    use crate::key::ContentClass;
    use std::time::Duration;

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(secs).unwrap()
    }

    pub(super) fn entry(name: &str, created: i64, ttl: Option<u64>) -> CacheEntry {
        CacheEntry {
            key: FingerprintKey::compute(name, "model", ContentClass::Narrative),
            vector: StoredVector::Dense(vec![0.5; 4]),
            metadata: Metadata::new(),
            model_id: "model".to_string(),
            class: ContentClass::Narrative,
            created_at: at(created),
            last_accessed_at: at(created),
            access_count: 1,
            ttl: ttl.map(Duration::from_secs),
            compressed: false,
            optimized: false,
            quality_score: 1.0,
            generation_cost: Duration::ZERO,
        }
    }

    fn tier(strategy: EvictionStrategy, max_entries: usize) -> MemoryTier {
        MemoryTier::new(strategy, ScoringWeights::default(), max_entries, usize::MAX)
    }

    fn key(name: &str) -> FingerprintKey {
        FingerprintKey::compute(name, "model", ContentClass::Narrative)
    }

    #[test]
    fn test_insert_get_touches() {
        let mut tier = tier(EvictionStrategy::Lru, 4);
        tier.insert(entry("a", 0, None), at(0));
        assert_eq!(tier.len(), 1);

        match tier.get(&key("a"), at(10)) {
            Lookup::Hit(entry) => {
                assert_eq!(entry.access_count, 2);
                assert_eq!(entry.last_accessed_at, at(10));
            }
            other => panic!("expected hit, got {:?}", other),
        }
        assert!(matches!(tier.get(&key("b"), at(10)), Lookup::Miss));
    }

    #[test]
    fn test_expired_entry_removed_on_get() {
        let mut tier = tier(EvictionStrategy::Lru, 4);
        tier.insert(entry("a", 0, Some(1)), at(0));

        // expiry is strict: at exactly created + ttl the entry is still live
        assert!(matches!(tier.get(&key("a"), at(1)), Lookup::Hit(_)));
        assert!(matches!(tier.get(&key("a"), at(2)), Lookup::Expired(_)));
        assert!(tier.is_empty());
        assert_eq!(tier.memory_bytes(), 0);
    }

    #[test]
    fn test_peek_hides_expired_without_removing() {
        let mut tier = tier(EvictionStrategy::Lru, 4);
        tier.insert(entry("a", 0, Some(1)), at(0));
        assert!(tier.peek(&key("a"), at(0)).is_some());
        assert!(tier.peek(&key("a"), at(5)).is_none());
        assert!(tier.contains_key(&key("a")));
    }

    #[test]
    fn test_replace_same_key_does_not_evict() {
        let mut tier = tier(EvictionStrategy::Lru, 2);
        tier.insert(entry("a", 0, None), at(0));
        tier.insert(entry("b", 0, None), at(0));
        let evicted = tier.insert(entry("a", 1, None), at(1));
        assert!(evicted.is_empty());
        assert_eq!(tier.len(), 2);
    }

    #[test]
    fn test_memory_accounting() {
        let mut tier = tier(EvictionStrategy::Lru, 8);
        let size = entry("a", 0, None).memory_size();
        tier.insert(entry("a", 0, None), at(0));
        tier.insert(entry("b", 0, None), at(0));
        assert_eq!(tier.memory_bytes(), 2 * size);
        tier.remove(&key("a"));
        assert_eq!(tier.memory_bytes(), size);
        tier.clear();
        assert_eq!(tier.memory_bytes(), 0);
        assert!(tier.is_empty());
    }

    #[test]
    fn test_memory_budget_evicts() {
        let size = entry("a", 0, None).memory_size();
        let mut tier = MemoryTier::new(
            EvictionStrategy::Lru,
            ScoringWeights::default(),
            100,
            2 * size,
        );
        tier.insert(entry("a", 0, None), at(0));
        tier.insert(entry("b", 1, None), at(1));
        let evicted = tier.insert(entry("c", 2, None), at(2));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].key, key("a"));
        assert!(tier.memory_bytes() <= 2 * size);
    }

    #[test]
    fn test_remove_expired() {
        let mut tier = tier(EvictionStrategy::Lfu, 8);
        tier.insert(entry("short", 0, Some(5)), at(0));
        tier.insert(entry("long", 0, Some(500)), at(0));
        tier.insert(entry("forever", 0, None), at(0));

        assert!(tier.remove_expired(at(5)).is_empty());
        let removed = tier.remove_expired(at(6));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].key, key("short"));
        assert_eq!(tier.len(), 2);
    }

    #[test]
    fn test_recency_order() {
        let mut tier = tier(EvictionStrategy::Lru, 8);
        tier.insert(entry("a", 0, None), at(0));
        tier.insert(entry("b", 0, None), at(0));
        tier.insert(entry("c", 0, None), at(0));
        let _ = tier.get(&key("a"), at(1));
        assert_eq!(
            tier.keys_by_recency(),
            vec![key("b"), key("c"), key("a")]
        );
    }
}
