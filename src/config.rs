//! Cache configuration.
//!
//! [`CacheConfig`] is passed once to [`crate::AdaptiveCache::new`]. It can be
//! built in code with the `with_*` setters or loaded from the `[cache]` table
//! of a TOML file through [`Config::load`]:
//!
//! ```toml
//! [cache]
//! strategy = "adaptive"
//! max_entries = 50000
//! max_memory_bytes = "256MB"
//! default_ttl = "7d"
//! cleanup_interval = "10m"
//!
//! [cache.ttl_by_class]
//! definition = "30d"
//! narrative = "1d"
//!
//! [cache.persistence]
//! enabled = true
//! path = "/var/cache/embcache/embeddings.redb"
//! timeout = "250ms"
//!
//! [cache.optimization]
//! techniques = ["normalize", "quantize"]
//!
//! [logging]
//! level = "info"
//! format = "compact"
//! ```

use crate::error::ConfigError;
use crate::key::ContentClass;
use crate::optimize::{OptimizationPipeline, Technique};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Eviction strategy for the memory tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvictionStrategy {
    /// Least recently used.
    #[default]
    Lru,
    /// Least frequently used, oldest first among equals.
    Lfu,
    /// Expired entries first, then the oldest.
    Ttl,
    /// Highest combined age/frequency/recency/quality score.
    Adaptive,
    /// Adaptive scoring dominated by the content class and its TTL.
    ContentAware,
}

impl EvictionStrategy {
    /// Name used in configuration and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lru => "lru",
            Self::Lfu => "lfu",
            Self::Ttl => "ttl",
            Self::Adaptive => "adaptive",
            Self::ContentAware => "content_aware",
        }
    }
}

/// Compression applied to vector bytes in the durable tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    /// Store vector bytes as-is.
    #[default]
    None,
    /// LZ4 block compression.
    Lz4,
}

/// Coefficients of the adaptive eviction score.
///
/// For each candidate the score is
///
/// ```text
/// age · age_days
///   + frequency / access_count
///   + recency · hours_since_access
///   + quality · (1 - quality_score)
///   - class_bonus            (high-value classes only)
/// ```
///
/// and the entry with the highest score is evicted. The content-aware
/// strategy multiplies the class bonus by `content_aware_bonus_factor` and
/// adds `ttl_pressure · (elapsed / ttl)` for entries that have a TTL.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScoringWeights {
    /// Weight of entry age in days.
    pub age: f64,
    /// Weight of the inverse access count.
    pub frequency: f64,
    /// Weight of hours since the last access.
    pub recency: f64,
    /// Weight of `1 - quality_score`.
    pub quality: f64,
    /// Score reduction for high-value classes.
    pub class_bonus: f64,
    /// Multiplier applied to `class_bonus` by the content-aware strategy.
    pub content_aware_bonus_factor: f64,
    /// Weight of the consumed fraction of an entry's TTL.
    pub ttl_pressure: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            age: 1.0,
            frequency: 1.0,
            recency: 1.0,
            quality: 1.0,
            class_bonus: 0.5,
            content_aware_bonus_factor: 4.0,
            ttl_pressure: 1.0,
        }
    }
}

impl ScoringWeights {
    fn validate(&self) -> Result<(), ConfigError> {
        let weights = [
            self.age,
            self.frequency,
            self.recency,
            self.quality,
            self.class_bonus,
            self.content_aware_bonus_factor,
            self.ttl_pressure,
        ];
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(ConfigError::invalid("scoring", "weights must be finite"));
        }
        Ok(())
    }
}

/// Durable tier settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersistenceConfig {
    /// Whether the durable tier is used at all.
    pub enabled: bool,
    /// Location of the database file.
    pub path: Option<PathBuf>,
    /// Upper bound on any single durable operation.
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            timeout: default_persistence_timeout(),
        }
    }
}

/// Optimization pipeline settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizationConfig {
    /// Techniques to apply, in order.
    pub techniques: Vec<Technique>,
    /// Fraction of dimensions kept by `reduce`, in `(0, 1]`.
    pub reduction_ratio: f64,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            techniques: Vec::new(),
            reduction_ratio: 0.5,
        }
    }
}

impl OptimizationConfig {
    /// Build the pipeline these settings describe.
    pub fn pipeline(&self) -> OptimizationPipeline {
        OptimizationPipeline::new(&self.techniques, self.reduction_ratio)
    }
}

/// Configuration for an [`crate::AdaptiveCache`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Memory tier eviction strategy.
    pub strategy: EvictionStrategy,

    /// Maximum number of entries held in memory.
    pub max_entries: usize,

    /// Memory budget for the memory tier (e.g., "512MB").
    #[serde(deserialize_with = "deserialize_size")]
    pub max_memory_bytes: usize,

    /// Expected vector length. When set, `put` rejects other lengths.
    pub dimensions: Option<usize>,

    /// TTL for classes without an explicit entry. `"none"` disables expiry.
    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub default_ttl: Option<Duration>,

    /// Per-class TTL overrides.
    #[serde(deserialize_with = "deserialize_class_ttls")]
    pub ttl_by_class: HashMap<ContentClass, Duration>,

    /// Durable tier settings.
    pub persistence: PersistenceConfig,

    /// Compression of vector bytes in the durable tier.
    pub compression: CompressionMode,

    /// Optimization pipeline settings.
    pub optimization: OptimizationConfig,

    /// Period of the background cleanup task. `"none"` disables the task.
    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub cleanup_interval: Option<Duration>,

    /// Run durable operations on a dedicated worker with bounded waits.
    /// When false they execute inline on the calling thread.
    pub concurrent: bool,

    /// Adaptive eviction coefficients.
    pub scoring: ScoringWeights,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            strategy: EvictionStrategy::default(),
            max_entries: 10_000,
            max_memory_bytes: 512 * 1024 * 1024,
            dimensions: None,
            default_ttl: Some(Duration::from_secs(7 * 24 * 3600)),
            ttl_by_class: HashMap::new(),
            persistence: PersistenceConfig::default(),
            compression: CompressionMode::default(),
            optimization: OptimizationConfig::default(),
            cleanup_interval: Some(Duration::from_secs(3600)),
            concurrent: true,
            scoring: ScoringWeights::default(),
        }
    }
}

impl CacheConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the eviction strategy.
    pub fn with_strategy(mut self, strategy: EvictionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the entry limit.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Set the memory budget in bytes.
    pub fn with_max_memory_bytes(mut self, bytes: usize) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    /// Enforce a vector length on `put`.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Override the TTL for one class.
    pub fn with_class_ttl(mut self, class: ContentClass, ttl: Duration) -> Self {
        self.ttl_by_class.insert(class, ttl);
        self
    }

    /// Enable the durable tier at `path`.
    pub fn with_persistence(mut self, path: impl Into<PathBuf>) -> Self {
        self.persistence.enabled = true;
        self.persistence.path = Some(path.into());
        self
    }

    /// Set the bound on durable operations.
    pub fn with_persistence_timeout(mut self, timeout: Duration) -> Self {
        self.persistence.timeout = timeout;
        self
    }

    /// Set the durable compression mode.
    pub fn with_compression(mut self, mode: CompressionMode) -> Self {
        self.compression = mode;
        self
    }

    /// Set the optimization techniques.
    pub fn with_techniques(mut self, techniques: &[Technique]) -> Self {
        self.optimization.techniques = techniques.to_vec();
        self
    }

    /// Set the reduction ratio.
    pub fn with_reduction_ratio(mut self, ratio: f64) -> Self {
        self.optimization.reduction_ratio = ratio;
        self
    }

    /// Set or disable the background cleanup period.
    pub fn with_cleanup_interval(mut self, interval: Option<Duration>) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Choose between worker-thread and inline durable operations.
    pub fn with_concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    /// Set the adaptive scoring weights.
    pub fn with_scoring(mut self, scoring: ScoringWeights) -> Self {
        self.scoring = scoring;
        self
    }

    /// TTL that applies to entries of `class`.
    pub fn ttl_for(&self, class: ContentClass) -> Option<Duration> {
        self.ttl_by_class.get(&class).copied().or(self.default_ttl)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::invalid("max_entries", "must be greater than 0"));
        }
        if self.max_memory_bytes == 0 {
            return Err(ConfigError::invalid(
                "max_memory_bytes",
                "must be greater than 0",
            ));
        }
        if self.dimensions == Some(0) {
            return Err(ConfigError::invalid("dimensions", "must be greater than 0"));
        }
        if self.persistence.enabled && self.persistence.path.is_none() {
            return Err(ConfigError::invalid(
                "persistence.path",
                "required when persistence is enabled",
            ));
        }
        if self.persistence.timeout.is_zero() {
            return Err(ConfigError::invalid(
                "persistence.timeout",
                "must be greater than 0",
            ));
        }
        let ratio = self.optimization.reduction_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(ConfigError::invalid(
                "optimization.reduction_ratio",
                format!("{} is outside (0, 1]", ratio),
            ));
        }
        if self.cleanup_interval.is_some_and(|i| i.is_zero()) {
            return Err(ConfigError::invalid(
                "cleanup_interval",
                "must be greater than 0 (use \"none\" to disable)",
            ));
        }
        if self.ttl_by_class.values().any(|ttl| ttl.is_zero())
            || self.default_ttl == Some(Duration::ZERO)
        {
            return Err(ConfigError::invalid("ttl", "must be greater than 0"));
        }
        self.scoring.validate()
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line human-readable output.
    #[default]
    Compact,
    /// Newline-delimited JSON.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `"info"` or `"embcache=debug"`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Include timestamps.
    pub timestamps: bool,
    /// Include the event target.
    pub target: bool,
    /// Include thread names.
    pub thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            timestamps: true,
            target: false,
            thread_names: false,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Cache settings.
    pub cache: CacheConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate TOML configuration text.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.cache.validate()?;
        Ok(config)
    }
}

fn default_persistence_timeout() -> Duration {
    Duration::from_millis(250)
}

/// Parse a size string like "64MB", "4GB", "1TB" into bytes.
pub fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| c.is_alphabetic()) {
        Some(idx) => (&s[..idx], s[idx..].to_uppercase()),
        None => (s, String::new()),
    };

    let num: usize = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid number: {}", num_str))?;

    let multiplier: usize = match suffix.as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        _ => return Err(format!("unknown size suffix: {}", suffix)),
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| "size overflow".to_string())
}

/// Parse a duration like "30s" or "7d". `"none"` and `"off"` yield `None`.
pub fn parse_optional_duration(s: &str) -> Result<Option<Duration>, String> {
    match s.trim().to_lowercase().as_str() {
        "none" | "off" | "never" => Ok(None),
        other => humantime::parse_duration(other)
            .map(Some)
            .map_err(|e| format!("invalid duration '{}': {}", s, e)),
    }
}

/// Deserialize a size string like "64MB" or a plain integer into bytes.
fn deserialize_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeValue {
        Number(usize),
        String(String),
    }

    match SizeValue::deserialize(deserializer)? {
        SizeValue::Number(n) => Ok(n),
        SizeValue::String(s) => parse_size(&s).map_err(D::Error::custom),
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

fn deserialize_optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_optional_duration(&s).map_err(serde::de::Error::custom)
}

fn deserialize_class_ttls<'de, D>(
    deserializer: D,
) -> Result<HashMap<ContentClass, Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = HashMap::<ContentClass, String>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(class, s)| {
            humantime::parse_duration(&s)
                .map(|ttl| (class, ttl))
                .map_err(|e| serde::de::Error::custom(format!("ttl for {}: {}", class, e)))
        })
        .collect()
}

/// Format a size in bytes as a human-readable string.
pub fn format_size(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = 1024 * KB;
    const GB: usize = 1024 * MB;

    if bytes >= GB && bytes % GB == 0 {
        format!("{} GB", bytes / GB)
    } else if bytes >= MB && bytes % MB == 0 {
        format!("{} MB", bytes / MB)
    } else if bytes >= KB && bytes % KB == 0 {
        format!("{} KB", bytes / KB)
    } else {
        format!("{} bytes", bytes)
    }
}
