//! Cache entries and the values handed back to callers.

use crate::clock::deadline;
use crate::key::{ContentClass, FingerprintKey};
use std::collections::BTreeMap;
use std::time::Duration;
use time::OffsetDateTime;

/// Bookkeeping bytes charged per entry on top of its vector, used by the
/// memory estimate (key, timestamps, counters, map and index slots).
pub const ENTRY_OVERHEAD_BYTES: usize = 256;

/// Free-form metadata attached to an entry.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A metadata value. The set of kinds is closed so that the durable encoding
/// is total over finite numbers.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    /// UTF-8 string.
    String(String),
    /// Floating point number.
    Number(f64),
    /// Boolean flag.
    Bool(bool),
    /// Nested string-keyed map.
    Map(Metadata),
}

impl MetadataValue {
    /// Borrow as a string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Read as a number, if this is one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Borrow as a nested map, if this is one.
    pub fn as_map(&self) -> Option<&Metadata> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Convert to a JSON value for the durable encoding.
    pub fn to_json(&self) -> json::JsonValue {
        match self {
            Self::String(s) => json::JsonValue::from(s.as_str()),
            Self::Number(n) => json::JsonValue::from(*n),
            Self::Bool(b) => json::JsonValue::from(*b),
            Self::Map(m) => metadata_to_json(m),
        }
    }

    /// Convert from a JSON value. Arrays and nulls have no counterpart.
    pub fn from_json(value: &json::JsonValue) -> Option<Self> {
        if let Some(s) = value.as_str() {
            return Some(Self::String(s.to_string()));
        }
        if value.is_boolean() {
            return value.as_bool().map(Self::Bool);
        }
        if value.is_number() {
            return value.as_f64().map(Self::Number);
        }
        if value.is_object() {
            return metadata_from_json(value).map(Self::Map);
        }
        None
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Metadata> for MetadataValue {
    fn from(value: Metadata) -> Self {
        Self::Map(value)
    }
}

/// Dotted path of the first NaN or infinite number in `metadata`, if any.
///
/// JSON has no spelling for those values, so they cannot be stored.
pub fn find_non_finite(metadata: &Metadata) -> Option<String> {
    for (name, value) in metadata {
        match value {
            MetadataValue::Number(n) if !n.is_finite() => return Some(name.clone()),
            MetadataValue::Map(inner) => {
                if let Some(path) = find_non_finite(inner) {
                    return Some(format!("{}.{}", name, path));
                }
            }
            _ => {}
        }
    }
    None
}

/// Encode a metadata map as a JSON object.
pub fn metadata_to_json(metadata: &Metadata) -> json::JsonValue {
    let mut object = json::object::Object::with_capacity(metadata.len());
    for (name, value) in metadata {
        object.insert(name, value.to_json());
    }
    json::JsonValue::Object(object)
}

/// Decode a JSON object into a metadata map.
pub fn metadata_from_json(value: &json::JsonValue) -> Option<Metadata> {
    if !value.is_object() {
        return None;
    }
    let mut metadata = Metadata::new();
    for (name, value) in value.entries() {
        metadata.insert(name.to_string(), MetadataValue::from_json(value)?);
    }
    Some(metadata)
}

/// Vector payload as held by the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredVector {
    /// Full-precision components.
    Dense(Vec<f32>),
    /// 8-bit linear codes plus the range needed to reconstruct them.
    Quantized {
        /// One code per component.
        codes: Vec<u8>,
        /// Smallest component of the source vector.
        min: f32,
        /// Largest component of the source vector.
        max: f32,
    },
}

impl StoredVector {
    /// Number of components.
    pub fn len(&self) -> usize {
        match self {
            Self::Dense(v) => v.len(),
            Self::Quantized { codes, .. } => codes.len(),
        }
    }

    /// True when there are no components.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes occupied by the payload.
    pub fn byte_size(&self) -> usize {
        match self {
            Self::Dense(v) => v.len() * std::mem::size_of::<f32>(),
            Self::Quantized { codes, .. } => codes.len() + 2 * std::mem::size_of::<f32>(),
        }
    }

    /// Full-precision components, reconstructing quantized codes as
    /// `code / 255 * (max - min) + min`.
    pub fn to_f32(&self) -> Vec<f32> {
        match self {
            Self::Dense(v) => v.clone(),
            Self::Quantized { codes, min, max } => {
                let min = f64::from(*min);
                let range = f64::from(*max) - min;
                codes
                    .iter()
                    .map(|&code| (f64::from(code) / 255.0 * range + min) as f32)
                    .collect()
            }
        }
    }

    /// True for the quantized form.
    pub fn is_quantized(&self) -> bool {
        matches!(self, Self::Quantized { .. })
    }
}

/// A cached embedding together with its bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Fingerprint of the request that produced the embedding.
    pub key: FingerprintKey,
    /// The (possibly reduced and quantized) vector.
    pub vector: StoredVector,
    /// Free-form metadata, including what the optimizer applied.
    pub metadata: Metadata,
    /// Identifier of the embedding model.
    pub model_id: String,
    /// Classification of the source text.
    pub class: ContentClass,
    /// When the entry was created.
    pub created_at: OffsetDateTime,
    /// When the entry was last read. Never earlier than `created_at`.
    pub last_accessed_at: OffsetDateTime,
    /// Number of accesses, counting the insert. At least one.
    pub access_count: u64,
    /// Lifetime measured from `created_at`.
    pub ttl: Option<Duration>,
    /// Whether the durable tier stores the vector bytes compressed.
    pub compressed: bool,
    /// Whether any optimization technique was applied.
    pub optimized: bool,
    /// Upstream quality score in `[0, 1]`.
    pub quality_score: f32,
    /// How long the upstream generator took to produce the embedding.
    pub generation_cost: Duration,
}

impl CacheEntry {
    /// Instant after which the entry is logically expired, if it has a TTL.
    /// A TTL reaching past the last representable date never expires.
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.ttl.and_then(|ttl| deadline(self.created_at, ttl))
    }

    /// An entry is expired once `now > created_at + ttl`.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at().is_some_and(|at| now > at)
    }

    /// Record an access.
    pub fn touch(&mut self, now: OffsetDateTime) {
        self.last_accessed_at = now.max(self.created_at);
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Estimated resident size: vector bytes plus a fixed per-entry charge.
    pub fn memory_size(&self) -> usize {
        self.vector.byte_size() + self.model_id.len() + ENTRY_OVERHEAD_BYTES
    }

    /// Build the value handed back to callers.
    pub fn to_embedding(&self) -> CachedEmbedding {
        CachedEmbedding {
            vector: self.vector.to_f32(),
            quality_score: self.quality_score,
            generation_cost: self.generation_cost,
            metadata: self.metadata.clone(),
            model_id: self.model_id.clone(),
            class: self.class,
            access_count: self.access_count,
            optimized: self.optimized,
            created_at: self.created_at,
        }
    }
}

/// Result of a cache hit.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEmbedding {
    /// Reconstructed full-precision vector.
    pub vector: Vec<f32>,
    /// Upstream quality score.
    pub quality_score: f32,
    /// Upstream generation cost.
    pub generation_cost: Duration,
    /// Entry metadata.
    pub metadata: Metadata,
    /// Embedding model identifier.
    pub model_id: String,
    /// Content classification.
    pub class: ContentClass,
    /// Accesses so far, including this one.
    pub access_count: u64,
    /// Whether the optimizer transformed the vector.
    pub optimized: bool,
    /// When the entry was created.
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ttl: Option<Duration>) -> CacheEntry {
        let now = OffsetDateTime::UNIX_EPOCH;
        CacheEntry {
            key: FingerprintKey::compute("text", "model", ContentClass::Example),
            vector: StoredVector::Dense(vec![1.0, 2.0, 3.0]),
            metadata: Metadata::new(),
            model_id: "model".to_string(),
            class: ContentClass::Example,
            created_at: now,
            last_accessed_at: now,
            access_count: 1,
            ttl,
            compressed: false,
            optimized: false,
            quality_score: 0.9,
            generation_cost: Duration::from_millis(40),
        }
    }

    #[test]
    fn test_expiry_is_strictly_after_deadline() {
        let entry = entry(Some(Duration::from_secs(1)));
        let created = entry.created_at;
        assert!(!entry.is_expired(created + Duration::from_secs(1)));
        assert!(entry.is_expired(created + Duration::from_millis(1001)));
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let entry = entry(None);
        assert!(!entry.is_expired(entry.created_at + Duration::from_secs(10 * 365 * 86_400)));
    }

    #[test]
    fn test_ttl_past_last_date_never_expires() {
        let forever = entry(Some(Duration::MAX));
        assert_eq!(forever.expires_at(), None);
        assert!(!forever.is_expired(forever.created_at + Duration::from_secs(10 * 365 * 86_400)));

        // representable as a time::Duration, but past year 9999
        let millennia = entry(Some(Duration::from_secs(20_000 * 365 * 86_400)));
        assert_eq!(millennia.expires_at(), None);
    }

    #[test]
    fn test_touch_bumps_count_and_time() {
        let mut entry = entry(None);
        let later = entry.created_at + Duration::from_secs(5);
        entry.touch(later);
        assert_eq!(entry.access_count, 2);
        assert_eq!(entry.last_accessed_at, later);

        // clock skew never moves last access before creation
        entry.touch(entry.created_at - Duration::from_secs(5));
        assert_eq!(entry.last_accessed_at, entry.created_at);
    }

    #[test]
    fn test_quantized_reconstruction() {
        let vector = StoredVector::Quantized {
            codes: vec![0, 255, 51],
            min: -1.0,
            max: 1.0,
        };
        let values = vector.to_f32();
        assert_eq!(values[0], -1.0);
        assert_eq!(values[1], 1.0);
        assert!((values[2] - (-0.6)).abs() < 1e-6);
        assert_eq!(vector.byte_size(), 3 + 8);
    }

    #[test]
    fn test_find_non_finite_reports_nested_path() {
        let mut inner = Metadata::new();
        inner.insert("score".to_string(), f64::INFINITY.into());
        let mut metadata = Metadata::new();
        metadata.insert("chapter".to_string(), 3.0.into());
        metadata.insert("eval".to_string(), inner.into());
        assert_eq!(find_non_finite(&metadata).as_deref(), Some("eval.score"));

        metadata.remove("eval");
        assert_eq!(find_non_finite(&metadata), None);
    }

    #[test]
    fn test_metadata_json_round_trip() {
        let mut nested = Metadata::new();
        nested.insert("normalize".to_string(), 0.25.into());
        let mut metadata = Metadata::new();
        metadata.insert("applied_techniques".to_string(), "normalize".into());
        metadata.insert("source".to_string(), "chapter-3.pdf".into());
        metadata.insert("reviewed".to_string(), true.into());
        metadata.insert("improvements".to_string(), nested.into());

        let encoded = json::stringify(metadata_to_json(&metadata));
        let decoded = metadata_from_json(&json::parse(&encoded).unwrap()).unwrap();
        assert_eq!(decoded, metadata);
    }

    #[test]
    fn test_metadata_rejects_arrays() {
        let value = json::parse(r#"{"tags": [1, 2]}"#).unwrap();
        assert_eq!(metadata_from_json(&value), None);
    }
}
