//! embcache: an adaptive two-tier cache for text embeddings.
//!
//! Embeddings are keyed by a SHA-256 fingerprint of
//! `(text, model_id, content class)` and held in a bounded in-memory tier
//! backed by an optional redb database. Vectors can be normalized, reduced
//! and quantized before they are stored.
//!
//! # Architecture
//!
//! ```text
//!                 +-------------------------------+
//!   get / put --> |         AdaptiveCache         |
//!                 |  validate, TTL, statistics    |
//!                 +---------------+---------------+
//!                         |               |
//!               optimize  |               |  write-through / promote
//!                         v               v
//!              +-------------------+  +-------------------+
//!              |    MemoryTier     |  |  PersistentTier   |
//!              | LRU / LFU / TTL / |  | worker thread,    |
//!              | adaptive scoring  |  | bounded waits     |
//!              +-------------------+  +---------+---------+
//!                                               |
//!                                               v
//!                                     +-------------------+
//!                                     |   DurableStore    |
//!                                     | redb rows+indices |
//!                                     +-------------------+
//! ```
//!
//! # Example
//!
//! ```no_run
//! use embcache::{AdaptiveCache, CacheConfig, ContentClass, EvictionStrategy};
//! use std::time::Duration;
//!
//! let cache = AdaptiveCache::new(
//!     CacheConfig::new()
//!         .with_strategy(EvictionStrategy::Adaptive)
//!         .with_persistence("/var/cache/embcache/embeddings.redb"),
//! )?;
//!
//! let text = "A limit describes the value a function approaches.";
//! if cache.get(text, "all-MiniLM-L6-v2", ContentClass::Definition).is_none() {
//!     let vector = vec![0.1; 384]; // from the embedding model
//!     cache.put(
//!         text,
//!         "all-MiniLM-L6-v2",
//!         ContentClass::Definition,
//!         vector,
//!         0.92,
//!         Duration::from_millis(40),
//!     )?;
//! }
//! # Ok::<(), embcache::CacheError>(())
//! ```

#![warn(clippy::all)]

mod cache;
mod cleanup;
pub mod clock;
pub mod config;
pub mod entry;
pub mod error;
pub mod key;
pub mod logging;
pub mod metrics;
pub mod optimize;
pub mod stats;
pub mod store;
pub mod tier;

pub use cache::{AdaptiveCache, CleanupOutcome, Embedding};
pub use cleanup::CleanupTask;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    CacheConfig, CompressionMode, Config, EvictionStrategy, LogFormat, LoggingConfig,
    OptimizationConfig, PersistenceConfig, ScoringWeights,
};
pub use entry::{CacheEntry, CachedEmbedding, Metadata, MetadataValue, StoredVector};
pub use error::{CacheError, CacheResult, ConfigError, OptimizeError, StoreError, StoreResult};
pub use key::{ContentClass, FingerprintKey};
pub use optimize::{OptimizationPipeline, Technique};
pub use stats::{CacheStatistics, CounterSnapshot};
pub use store::{DurableStats, DurableStore};
pub use tier::MemoryTier;
