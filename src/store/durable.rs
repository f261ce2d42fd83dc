//! redb-backed durable tier.
//!
//! Tables:
//!
//! ```text
//!   headers      key -> RowHeader bytes
//!   vectors      key -> vector bytes (optionally lz4)
//!   by_model     model_id      => key   (multimap)
//!   by_class     class name    => key   (multimap)
//!   by_created   created ms    => key   (multimap)
//!   by_accessed  accessed ms   => key   (multimap)
//!   by_expiry    expires_at ms => key   (multimap, TTL rows only)
//! ```
//!
//! Every write happens in a single transaction, so a row and its index
//! entries always change together.

use super::codec::{decode_vector, encode_vector, RowHeader};
use crate::clock::{unix_millis, Clock};
use crate::config::CompressionMode;
use crate::entry::CacheEntry;
use crate::error::{StoreError, StoreResult};
use crate::key::{ContentClass, FingerprintKey};
use redb::{
    Database, MultimapTable, MultimapTableDefinition, ReadableMultimapTable, ReadableTable,
    ReadableTableMetadata, Table, TableDefinition, WriteTransaction,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const HEADERS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("headers");
const VECTORS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("vectors");
const BY_MODEL: MultimapTableDefinition<&str, &[u8]> = MultimapTableDefinition::new("by_model");
const BY_CLASS: MultimapTableDefinition<&str, &[u8]> = MultimapTableDefinition::new("by_class");
const BY_CREATED: MultimapTableDefinition<u64, &[u8]> = MultimapTableDefinition::new("by_created");
const BY_ACCESSED: MultimapTableDefinition<u64, &[u8]> =
    MultimapTableDefinition::new("by_accessed");
const BY_EXPIRY: MultimapTableDefinition<u64, &[u8]> = MultimapTableDefinition::new("by_expiry");

/// Row counts grouped for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DurableStats {
    /// Total rows.
    pub entries: u64,
    /// Rows per model id.
    pub by_model: BTreeMap<String, u64>,
    /// Rows per content class.
    pub by_class: BTreeMap<ContentClass, u64>,
}

struct WriteTables<'txn> {
    headers: Table<'txn, &'static [u8], &'static [u8]>,
    vectors: Table<'txn, &'static [u8], &'static [u8]>,
    by_model: MultimapTable<'txn, &'static str, &'static [u8]>,
    by_class: MultimapTable<'txn, &'static str, &'static [u8]>,
    by_created: MultimapTable<'txn, u64, &'static [u8]>,
    by_accessed: MultimapTable<'txn, u64, &'static [u8]>,
    by_expiry: MultimapTable<'txn, u64, &'static [u8]>,
}

impl<'txn> WriteTables<'txn> {
    fn open(txn: &'txn WriteTransaction) -> StoreResult<Self> {
        Ok(Self {
            headers: txn.open_table(HEADERS)?,
            vectors: txn.open_table(VECTORS)?,
            by_model: txn.open_multimap_table(BY_MODEL)?,
            by_class: txn.open_multimap_table(BY_CLASS)?,
            by_created: txn.open_multimap_table(BY_CREATED)?,
            by_accessed: txn.open_multimap_table(BY_ACCESSED)?,
            by_expiry: txn.open_multimap_table(BY_EXPIRY)?,
        })
    }

    fn index(&mut self, key: &[u8], header: &RowHeader) -> StoreResult<()> {
        self.by_model.insert(header.model_id.as_str(), key)?;
        self.by_class.insert(header.class.as_str(), key)?;
        self.by_created.insert(unix_millis(header.created_at), key)?;
        self.by_accessed
            .insert(unix_millis(header.last_accessed_at), key)?;
        if let Some(expires_at) = header.expires_at() {
            self.by_expiry.insert(unix_millis(expires_at), key)?;
        }
        Ok(())
    }

    fn unindex(&mut self, key: &[u8], header: &RowHeader) -> StoreResult<()> {
        self.by_model.remove(header.model_id.as_str(), key)?;
        self.by_class.remove(header.class.as_str(), key)?;
        self.by_created.remove(unix_millis(header.created_at), key)?;
        self.by_accessed
            .remove(unix_millis(header.last_accessed_at), key)?;
        if let Some(expires_at) = header.expires_at() {
            self.by_expiry.remove(unix_millis(expires_at), key)?;
        }
        Ok(())
    }

    fn header(&self, key: &[u8]) -> StoreResult<Option<RowHeader>> {
        match self.headers.get(key)? {
            Some(guard) => RowHeader::decode(guard.value()).map(Some),
            None => Ok(None),
        }
    }

    fn remove_row(&mut self, key: &[u8]) -> StoreResult<bool> {
        let Some(header) = self.header(key)? else {
            return Ok(false);
        };
        self.headers.remove(key)?;
        self.vectors.remove(key)?;
        self.unindex(key, &header)?;
        Ok(true)
    }
}

/// Disk-backed store of cache entries.
pub struct DurableStore {
    db: Database,
    path: PathBuf,
    compression: CompressionMode,
    clock: Arc<dyn Clock>,
}

impl DurableStore {
    /// Open or create the database at `path`.
    pub fn open(
        path: &Path,
        compression: CompressionMode,
        clock: Arc<dyn Clock>,
    ) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        WriteTables::open(&txn)?;
        txn.commit()?;

        debug!(path = %path.display(), ?compression, "opened durable store");

        Ok(Self {
            db,
            path: path.to_path_buf(),
            compression,
            clock,
        })
    }

    /// Location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace the row for `entry.key`.
    pub fn store(&self, entry: &CacheEntry) -> StoreResult<()> {
        let key = entry.key.as_bytes().as_slice();
        let mut header = RowHeader::from_entry(entry);
        header.compressed = self.compression != CompressionMode::None;
        let header_bytes = header.encode()?;
        let vector_bytes = encode_vector(&entry.vector, self.compression);

        let txn = self.db.begin_write()?;
        {
            let mut tables = WriteTables::open(&txn)?;
            tables.remove_row(key)?;
            tables.headers.insert(key, header_bytes.as_slice())?;
            tables.vectors.insert(key, vector_bytes.as_slice())?;
            tables.index(key, &header)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Read the row for `key`. Logically expired rows read as absent but are
    /// left for [`cleanup_expired`](Self::cleanup_expired).
    pub fn load(&self, key: &FingerprintKey) -> StoreResult<Option<CacheEntry>> {
        let key_bytes = key.as_bytes().as_slice();
        let txn = self.db.begin_read()?;
        let headers = txn.open_table(HEADERS)?;

        let header = match headers.get(key_bytes)? {
            Some(guard) => RowHeader::decode(guard.value())?,
            None => return Ok(None),
        };
        if header.is_expired(self.clock.now()) {
            return Ok(None);
        }

        let vectors = txn.open_table(VECTORS)?;
        let vector = match vectors.get(key_bytes)? {
            Some(guard) => decode_vector(guard.value())?,
            None => {
                return Err(StoreError::Corrupt(format!(
                    "header without vector for {}",
                    key
                )))
            }
        };

        Ok(Some(header.into_entry(*key, vector)))
    }

    /// Record an access without rewriting the vector.
    ///
    /// Returns false if there is no row for `key`.
    pub fn touch(&self, key: &FingerprintKey) -> StoreResult<bool> {
        let key_bytes = key.as_bytes().as_slice();
        let now = self.clock.now();

        let txn = self.db.begin_write()?;
        let touched = {
            let mut tables = WriteTables::open(&txn)?;
            match tables.header(key_bytes)? {
                None => false,
                Some(mut header) => {
                    tables
                        .by_accessed
                        .remove(unix_millis(header.last_accessed_at), key_bytes)?;
                    header.last_accessed_at = now.max(header.created_at);
                    header.access_count = header.access_count.saturating_add(1);
                    tables
                        .by_accessed
                        .insert(unix_millis(header.last_accessed_at), key_bytes)?;
                    let bytes = header.encode()?;
                    tables.headers.insert(key_bytes, bytes.as_slice())?;
                    true
                }
            }
        };
        txn.commit()?;
        Ok(touched)
    }

    /// Remove the row for `key`. Returns false if there was none.
    pub fn delete(&self, key: &FingerprintKey) -> StoreResult<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut tables = WriteTables::open(&txn)?;
            tables.remove_row(key.as_bytes().as_slice())?
        };
        txn.commit()?;
        Ok(removed)
    }

    /// Remove every row whose TTL has run out. Returns the number removed.
    pub fn cleanup_expired(&self) -> StoreResult<usize> {
        let now_ms = unix_millis(self.clock.now());

        let txn = self.db.begin_write()?;
        let removed = {
            let mut tables = WriteTables::open(&txn)?;
            let mut expired: Vec<Vec<u8>> = Vec::new();
            for item in tables.by_expiry.range(..now_ms)? {
                let (_, keys) = item?;
                for key in keys {
                    expired.push(key?.value().to_vec());
                }
            }

            let mut removed = 0;
            for key in &expired {
                if tables.remove_row(key)? {
                    removed += 1;
                }
            }
            removed
        };
        txn.commit()?;

        if removed > 0 {
            debug!(removed, "removed expired rows");
        }
        Ok(removed)
    }

    /// Number of rows, expired or not.
    pub fn len(&self) -> StoreResult<u64> {
        let txn = self.db.begin_read()?;
        let headers = txn.open_table(HEADERS)?;
        Ok(headers.len()?)
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        self.len().map(|n| n == 0)
    }

    /// Row counts, grouped by model and class.
    pub fn stats(&self) -> StoreResult<DurableStats> {
        let txn = self.db.begin_read()?;
        let headers = txn.open_table(HEADERS)?;
        let by_model = txn.open_multimap_table(BY_MODEL)?;
        let by_class = txn.open_multimap_table(BY_CLASS)?;

        let mut stats = DurableStats {
            entries: headers.len()?,
            ..Default::default()
        };
        for item in by_model.iter()? {
            let (model, keys) = item?;
            stats
                .by_model
                .insert(model.value().to_string(), keys.count() as u64);
        }
        for item in by_class.iter()? {
            let (class, keys) = item?;
            let name = class.value();
            let class = name.parse::<ContentClass>().map_err(StoreError::Corrupt)?;
            stats.by_class.insert(class, keys.count() as u64);
        }
        Ok(stats)
    }

    /// Keys of every row produced by `model_id`.
    pub fn keys_by_model(&self, model_id: &str) -> StoreResult<Vec<FingerprintKey>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_multimap_table(BY_MODEL)?;
        collect_keys(table.get(model_id)?)
    }

    /// Keys of every row of `class`.
    pub fn keys_by_class(&self, class: ContentClass) -> StoreResult<Vec<FingerprintKey>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_multimap_table(BY_CLASS)?;
        collect_keys(table.get(class.as_str())?)
    }

    /// Delete every row. Returns the number removed.
    pub fn clear(&self) -> StoreResult<u64> {
        let removed = self.len()?;

        let txn = self.db.begin_write()?;
        txn.delete_table(HEADERS)?;
        txn.delete_table(VECTORS)?;
        txn.delete_multimap_table(BY_MODEL)?;
        txn.delete_multimap_table(BY_CLASS)?;
        txn.delete_multimap_table(BY_CREATED)?;
        txn.delete_multimap_table(BY_ACCESSED)?;
        txn.delete_multimap_table(BY_EXPIRY)?;
        WriteTables::open(&txn)?;
        txn.commit()?;

        debug!(removed, "cleared durable store");
        Ok(removed)
    }
}

fn collect_keys(
    values: redb::MultimapValue<'_, &'static [u8]>,
) -> StoreResult<Vec<FingerprintKey>> {
    values
        .map(|guard| {
            let guard = guard?;
            FingerprintKey::from_slice(guard.value())
                .ok_or_else(|| StoreError::Corrupt("index key has wrong length".into()))
        })
        .collect()
}
