//! Error types for cache operations.
//!
//! Only validation failures reach callers of [`crate::AdaptiveCache`]. Durable
//! tier failures are absorbed inside the cache and show up in statistics and
//! logs; they are surfaced as errors only from construction and from the
//! explicit [`crate::AdaptiveCache::clear_persistent`].

use std::time::Duration;

/// Errors that can occur while configuring or writing to the cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The vector handed to `put` cannot be cached.
    #[error("invalid vector: {reason}")]
    InvalidVector {
        /// Why the vector was rejected.
        reason: String,
    },

    /// The quality score is not a finite number.
    #[error("invalid quality score: {0}")]
    InvalidQuality(f32),

    /// A metadata number is NaN or infinite and could not be persisted.
    #[error("invalid metadata: '{name}' is not a finite number")]
    InvalidMetadata {
        /// Dotted path of the offending value.
        name: String,
    },

    /// The configuration failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The durable tier could not be reached.
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(#[from] StoreError),

    /// A background thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        /// Name of the thread.
        name: &'static str,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl CacheError {
    pub(crate) fn invalid_vector(reason: impl Into<String>) -> Self {
        Self::InvalidVector {
            reason: reason.into(),
        }
    }
}

/// Errors raised by the durable tier.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Opening or creating the database file failed.
    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Beginning a transaction failed.
    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Opening a table failed.
    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    /// Reading or writing table data failed.
    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    /// Committing a transaction failed.
    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// A stored row could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// The operation did not complete within the configured bound.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The persistence worker has shut down.
    #[error("persistence worker closed")]
    Closed,

    /// Filesystem error while preparing the store location.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the optimization pipeline.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OptimizeError {
    /// The vector has no components.
    #[error("vector is empty")]
    EmptyVector,

    /// A component is NaN or infinite.
    #[error("non-finite component at index {index}")]
    NonFinite {
        /// Index of the first offending component.
        index: usize,
    },

    /// The reduction ratio is outside `(0, 1]`.
    #[error("reduction ratio {0} outside (0, 1]")]
    InvalidRatio(f64),
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A field holds a value the cache cannot operate with.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The configuration file could not be read.
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    /// The configuration file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Result type for durable tier operations.
pub type StoreResult<T> = Result<T, StoreError>;
