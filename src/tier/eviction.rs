//! Eviction victim selection.
//!
//! One function dispatches over the closed set of strategies:
//!
//! - **LRU**: lowest recency tick
//! - **LFU**: smallest `(access_count, created_at, key)`
//! - **TTL**: earliest already-expired entry, else the oldest created
//! - **Adaptive**/**ContentAware**: highest [`adaptive_score`], ties to the
//!   smallest key

use super::MemoryTier;
use crate::clock::{seconds_between, unix_nanos};
use crate::config::{EvictionStrategy, ScoringWeights};
use crate::entry::CacheEntry;
use crate::key::FingerprintKey;
use std::cmp::Ordering;
use time::OffsetDateTime;

const SECONDS_PER_HOUR: f64 = 3_600.0;
const SECONDS_PER_DAY: f64 = 86_400.0;

/// Eviction score of `entry` at `now`. Higher scores are evicted first.
///
/// With `content_aware` set, the class bonus is scaled by
/// `content_aware_bonus_factor` and entries with a TTL gain
/// `ttl_pressure · elapsed / ttl`, so short-lived classes leave first.
pub fn adaptive_score(
    entry: &CacheEntry,
    now: OffsetDateTime,
    weights: &ScoringWeights,
    content_aware: bool,
) -> f64 {
    let age_days = seconds_between(entry.created_at, now) / SECONDS_PER_DAY;
    let recency_hours = seconds_between(entry.last_accessed_at, now) / SECONDS_PER_HOUR;
    let frequency = 1.0 / entry.access_count.max(1) as f64;
    let quality = 1.0 - f64::from(entry.quality_score).clamp(0.0, 1.0);

    let mut bonus = if entry.class.is_high_value() {
        weights.class_bonus
    } else {
        0.0
    };
    let mut pressure = 0.0;
    if content_aware {
        bonus *= weights.content_aware_bonus_factor;
        if let Some(ttl) = entry.ttl.filter(|ttl| !ttl.is_zero()) {
            let elapsed = seconds_between(entry.created_at, now);
            pressure = weights.ttl_pressure * elapsed / ttl.as_secs_f64();
        }
    }

    weights.age * age_days
        + weights.frequency * frequency
        + weights.recency * recency_hours
        + weights.quality * quality
        + pressure
        - bonus
}

impl MemoryTier {
    /// Pick the entry the configured strategy would evict next.
    pub(super) fn select_victim(&self, now: OffsetDateTime) -> Option<FingerprintKey> {
        match self.strategy {
            EvictionStrategy::Lru => self.recency.values().next().copied(),
            EvictionStrategy::Lfu => self.frequency.iter().next().map(|(_, _, key)| *key),
            EvictionStrategy::Ttl => {
                let expired = self
                    .expiry
                    .iter()
                    .next()
                    .filter(|(expires_at, _)| *expires_at < unix_nanos(now))
                    .map(|(_, key)| *key);
                expired.or_else(|| self.created.iter().next().map(|(_, key)| *key))
            }
            EvictionStrategy::Adaptive => self.highest_score(now, false),
            EvictionStrategy::ContentAware => self.highest_score(now, true),
        }
    }

    fn highest_score(&self, now: OffsetDateTime, content_aware: bool) -> Option<FingerprintKey> {
        let mut best: Option<(f64, FingerprintKey)> = None;
        for (key, slot) in &self.entries {
            let score = adaptive_score(&slot.entry, now, &self.weights, content_aware);
            let replace = match &best {
                None => true,
                Some((best_score, best_key)) => match score.total_cmp(best_score) {
                    Ordering::Greater => true,
                    Ordering::Equal => key < best_key,
                    Ordering::Less => false,
                },
            };
            if replace {
                best = Some((score, *key));
            }
        }
        best.map(|(_, key)| key)
    }
}
