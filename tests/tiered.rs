//! Two-tier behaviour of AdaptiveCache: round trips, optimization, TTL,
//! promotion and durability across reopen.

use embcache::{
    AdaptiveCache, CacheConfig, CompressionMode, ContentClass, Embedding, ManualClock, Metadata,
    MetadataValue, Technique,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use time::OffsetDateTime;

const MODEL: &str = "all-MiniLM-L6-v2";

/// Deterministic vector with both signs and varied magnitude.
fn make_vector(len: usize, seed: u32) -> Vec<f32> {
    (0..len)
        .map(|i| ((i as u32 * 31 + seed * 7) as f32 * 0.173).sin() * (1.0 + (i % 5) as f32))
        .collect()
}

fn memory_config() -> CacheConfig {
    CacheConfig::new().with_cleanup_interval(None)
}

fn durable_config(path: &Path) -> CacheConfig {
    memory_config().with_persistence(path.join("embeddings.redb"))
}

// =============================================================================
// Round trips
// =============================================================================

#[test]
fn test_round_trip_without_optimization_is_exact() {
    let cache = AdaptiveCache::new(memory_config()).expect("cache");
    let vector = make_vector(384, 1);

    cache
        .put(
            "derivative",
            MODEL,
            ContentClass::Definition,
            vector.clone(),
            0.8,
            Duration::from_millis(30),
        )
        .expect("put");

    let found = cache
        .get("derivative", MODEL, ContentClass::Definition)
        .expect("hit");
    assert_eq!(found.vector, vector);
    assert_eq!(found.model_id, MODEL);
    assert_eq!(found.class, ContentClass::Definition);
    assert!(!found.metadata.contains_key("applied_techniques"));
}

#[test]
fn test_model_is_part_of_the_key() {
    let cache = AdaptiveCache::new(memory_config()).expect("cache");
    cache
        .put("text", "model-a", ContentClass::Example, make_vector(16, 2), 1.0, Duration::ZERO)
        .expect("put");

    assert!(cache.get("text", "model-a", ContentClass::Example).is_some());
    assert!(cache.get("text", "model-b", ContentClass::Example).is_none());
}

#[test]
fn test_quantized_round_trip_within_one_step() {
    let config = memory_config().with_techniques(&[Technique::Quantize]);
    let cache = AdaptiveCache::new(config).expect("cache");
    let vector = make_vector(256, 3);

    cache
        .put("q", MODEL, ContentClass::Math, vector.clone(), 1.0, Duration::ZERO)
        .expect("put");
    let found = cache.get("q", MODEL, ContentClass::Math).expect("hit");

    let min = vector.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = vector.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let step = (max - min) / 255.0;
    assert_eq!(found.vector.len(), vector.len());
    for (a, b) in vector.iter().zip(&found.vector) {
        assert!((a - b).abs() <= step, "{} vs {}", a, b);
    }
    assert!(found.optimized);
}

#[test]
fn test_reduction_shrinks_and_records_original_dimensions() {
    let config = memory_config()
        .with_techniques(&[Technique::Reduce])
        .with_reduction_ratio(0.25);
    let cache = AdaptiveCache::new(config).expect("cache");

    cache
        .put("r", MODEL, ContentClass::Theorem, make_vector(64, 4), 1.0, Duration::ZERO)
        .expect("put");
    let found = cache.get("r", MODEL, ContentClass::Theorem).expect("hit");

    assert_eq!(found.vector.len(), 16);
    assert_eq!(found.metadata["original_dimensions"].as_f64(), Some(64.0));
    let retained = found.metadata["improvements"].as_map().expect("improvements")["reduce"]
        .as_f64()
        .expect("reduce measurement");
    assert!(retained > 0.25 && retained <= 1.0);
}

#[test]
fn test_normalize_produces_unit_length() {
    let config = memory_config().with_techniques(&[Technique::Normalize]);
    let cache = AdaptiveCache::new(config).expect("cache");

    cache
        .put("n", MODEL, ContentClass::Narrative, vec![3.0, 4.0], 1.0, Duration::ZERO)
        .expect("put");
    let found = cache.get("n", MODEL, ContentClass::Narrative).expect("hit");
    assert!((found.vector[0] - 0.6).abs() < 1e-6);
    assert!((found.vector[1] - 0.8).abs() < 1e-6);
}

// =============================================================================
// TTL
// =============================================================================

#[test]
fn test_expired_entry_is_absent_from_both_tiers() {
    let dir = TempDir::new().expect("tempdir");
    let clock = Arc::new(ManualClock::new(OffsetDateTime::UNIX_EPOCH));
    let config = durable_config(dir.path()).with_default_ttl(Some(Duration::from_secs(1)));
    let cache = AdaptiveCache::with_clock(config, clock.clone()).expect("cache");

    cache
        .put("short", MODEL, ContentClass::Other, make_vector(8, 5), 1.0, Duration::ZERO)
        .expect("put");
    assert_eq!(cache.stats().durable_entries, Some(1));

    // the boundary instant itself is still live
    clock.advance(Duration::from_secs(1));
    assert!(cache.contains("short", MODEL, ContentClass::Other));

    clock.advance(Duration::from_millis(100));
    assert!(cache.get("short", MODEL, ContentClass::Other).is_none());

    let outcome = cache.cleanup();
    assert_eq!(outcome.durable_removed, 1);
    assert_eq!(cache.stats().durable_entries, Some(0));
    assert!(cache.stats().cleanup_operations() >= 1);
}

#[test]
fn test_no_ttl_never_expires() {
    let clock = Arc::new(ManualClock::new(OffsetDateTime::UNIX_EPOCH));
    let config = memory_config().with_default_ttl(None);
    let cache = AdaptiveCache::with_clock(config, clock.clone()).expect("cache");

    cache
        .put("forever", MODEL, ContentClass::Code, make_vector(8, 6), 1.0, Duration::ZERO)
        .expect("put");
    clock.advance(Duration::from_secs(10 * 365 * 24 * 3600));

    assert_eq!(cache.cleanup().memory_expired, 0);
    assert!(cache.get("forever", MODEL, ContentClass::Code).is_some());
}

#[test]
fn test_ttl_past_last_date_never_expires() {
    let dir = TempDir::new().expect("tempdir");
    let clock = Arc::new(ManualClock::new(OffsetDateTime::UNIX_EPOCH));
    let config = durable_config(dir.path())
        .with_max_entries(2)
        .with_default_ttl(Some(Duration::MAX));
    let cache = AdaptiveCache::with_clock(config, clock.clone()).expect("cache");

    for i in 0..4 {
        cache
            .put(
                &format!("t{}", i),
                MODEL,
                ContentClass::Narrative,
                make_vector(16, i),
                1.0,
                Duration::ZERO,
            )
            .expect("put");
        assert!(cache.len() <= 2);
    }
    assert_eq!(cache.stats().counters.evictions, 2);

    clock.advance(Duration::from_secs(10 * 365 * 24 * 3600));
    let outcome = cache.cleanup();
    assert_eq!(outcome.memory_expired, 0);
    assert_eq!(outcome.durable_removed, 0);

    let found = cache.get("t0", MODEL, ContentClass::Narrative).expect("promoted");
    assert_eq!(found.vector, make_vector(16, 0));
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.stats().counters.persistence_errors, 0);
}

// =============================================================================
// Durable tier
// =============================================================================

#[test]
fn test_evicted_entry_is_promoted_back() {
    let dir = TempDir::new().expect("tempdir");
    let config = durable_config(dir.path()).with_max_entries(2);
    let cache = AdaptiveCache::new(config).expect("cache");

    for i in 0..4 {
        cache
            .put(
                &format!("t{}", i),
                MODEL,
                ContentClass::Example,
                make_vector(32, i),
                1.0,
                Duration::ZERO,
            )
            .expect("put");
    }
    assert_eq!(cache.len(), 2);
    assert!(!cache.contains("t0", MODEL, ContentClass::Example));

    let found = cache.get("t0", MODEL, ContentClass::Example).expect("promoted");
    assert_eq!(found.vector, make_vector(32, 0));
    assert!(cache.contains("t0", MODEL, ContentClass::Example));
    assert_eq!(cache.len(), 2);

    let stats = cache.stats();
    assert_eq!(stats.counters.promotions, 1);
    assert_eq!(stats.durable_entries, Some(4));
}

#[test]
fn test_lz4_compressed_rows_round_trip() {
    let dir = TempDir::new().expect("tempdir");
    let config = durable_config(dir.path()).with_compression(CompressionMode::Lz4);
    let cache = AdaptiveCache::new(config).expect("cache");
    let vector = vec![0.5_f32; 512];

    cache
        .put("compressible", MODEL, ContentClass::Code, vector.clone(), 1.0, Duration::ZERO)
        .expect("put");
    cache.clear();

    let found = cache
        .get("compressible", MODEL, ContentClass::Code)
        .expect("loaded from durable tier");
    assert_eq!(found.vector, vector);
}

#[test]
fn test_metadata_round_trips_through_durable_tier() {
    let dir = TempDir::new().expect("tempdir");
    let cache = AdaptiveCache::new(durable_config(dir.path())).expect("cache");

    let mut source = Metadata::new();
    source.insert("page".to_string(), 212.0.into());
    source.insert("verified".to_string(), true.into());
    let embedding = Embedding::new(make_vector(24, 11), 0.9, Duration::ZERO)
        .with_metadata("title", "Mean value theorem")
        .with_metadata("weight", -0.25)
        .with_metadata("source", source.clone());
    let expected = embedding.metadata.clone();

    cache
        .put_embedding("mvt", MODEL, ContentClass::Theorem, embedding)
        .expect("put");
    cache.clear();

    let found = cache
        .get("mvt", MODEL, ContentClass::Theorem)
        .expect("loaded from durable tier");
    assert_eq!(found.metadata, expected);
    assert_eq!(found.metadata["source"], MetadataValue::Map(source));
    assert_eq!(cache.stats().counters.persistence_errors, 0);
}

#[test]
fn test_quantized_range_wider_than_f32_round_trips() {
    let dir = TempDir::new().expect("tempdir");
    let config = durable_config(dir.path()).with_techniques(&[Technique::Quantize]);
    let cache = AdaptiveCache::new(config).expect("cache");

    cache
        .put("wide", MODEL, ContentClass::Other, vec![-3.0e38, 0.0, 3.0e38], 1.0, Duration::ZERO)
        .expect("put");
    cache.clear();

    let found = cache
        .get("wide", MODEL, ContentClass::Other)
        .expect("loaded from durable tier");
    assert!(found.vector.iter().all(|x| x.is_finite()), "{:?}", found.vector);
    assert_eq!(found.vector[0], -3.0e38);
    assert_eq!(found.vector[2], 3.0e38);
}

#[test]
fn test_entries_survive_reopen() {
    let dir = TempDir::new().expect("tempdir");
    let embedding = make_vector(128, 9);

    {
        let cache = AdaptiveCache::new(durable_config(dir.path())).expect("cache");
        cache
            .put(
                "persisted",
                MODEL,
                ContentClass::Definition,
                embedding.clone(),
                0.6,
                Duration::from_millis(80),
            )
            .expect("put");
    }

    let cache = AdaptiveCache::new(durable_config(dir.path())).expect("reopen");
    assert!(cache.is_empty());
    let found = cache
        .get("persisted", MODEL, ContentClass::Definition)
        .expect("durable hit");
    assert_eq!(found.vector, embedding);
    assert_eq!(found.quality_score, 0.6);
    assert_eq!(found.generation_cost, Duration::from_millis(80));
    assert_eq!(cache.stats().by_class[&ContentClass::Definition], 1);
}

#[test]
fn test_delete_removes_durable_row() {
    let dir = TempDir::new().expect("tempdir");
    let cache = AdaptiveCache::new(durable_config(dir.path())).expect("cache");
    cache
        .put("gone", MODEL, ContentClass::Code, make_vector(8, 10), 1.0, Duration::ZERO)
        .expect("put");

    assert!(cache.delete("gone", MODEL, ContentClass::Code));
    cache.clear();
    assert!(cache.get("gone", MODEL, ContentClass::Code).is_none());
    assert_eq!(cache.stats().durable_entries, Some(0));
}

#[test]
fn test_inline_persistence_matches_worker() {
    let dir = TempDir::new().expect("tempdir");
    let config = durable_config(dir.path()).with_concurrent(false);
    let cache = AdaptiveCache::new(config).expect("cache");

    cache
        .put("inline", MODEL, ContentClass::Example, make_vector(8, 11), 1.0, Duration::ZERO)
        .expect("put");
    cache.clear();
    assert!(cache.get("inline", MODEL, ContentClass::Example).is_some());
    assert_eq!(cache.stats().counters.persistence_errors, 0);
}
