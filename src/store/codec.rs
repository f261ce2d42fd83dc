//! Row encoding for the durable tier.
//!
//! Each entry is split across two tables so access tracking can rewrite the
//! small header without touching the vector.
//!
//! Header layout (little-endian):
//! ```text
//! [0]      MAGIC0 (0xEB)
//! [1]      MAGIC1 (0xCA)
//! [2]      version
//! [3]      flags: [has_ttl][optimized][compressed]
//! [4]      content class code
//! [5..13]  created_at: i64 unix nanos
//! [13..21] last_accessed_at: i64 unix nanos
//! [21..29] access_count: u64
//! [29..37] ttl: u64 millis
//! [37..41] quality_score: f32
//! [41..49] generation_cost: u64 micros
//! [49..51] model_id_len: u16
//! [51..55] metadata_len: u32
//! [55..]   model_id, metadata JSON
//! ```
//!
//! Vector layout:
//! ```text
//! [0]      kind: dense (0) or quantized (1), high bit set when lz4
//! [1..]    payload, lz4 block with prepended size when flagged
//!
//! dense payload:     len: u32, len × f32
//! quantized payload: len: u32, min: f32, max: f32, len × u8
//! ```

use crate::clock::{deadline, from_unix_nanos, unix_nanos};
use crate::config::CompressionMode;
use crate::entry::{metadata_from_json, metadata_to_json, CacheEntry, Metadata, StoredVector};
use crate::error::{StoreError, StoreResult};
use crate::key::{ContentClass, FingerprintKey};
use std::time::Duration;
use time::OffsetDateTime;

const MAGIC0: u8 = 0xEB;
const MAGIC1: u8 = 0xCA;
const VERSION: u8 = 1;

const HEADER_FIXED: usize = 55;

const FLAG_COMPRESSED: u8 = 0x01;
const FLAG_OPTIMIZED: u8 = 0x02;
const FLAG_HAS_TTL: u8 = 0x04;

const KIND_DENSE: u8 = 0;
const KIND_QUANTIZED: u8 = 1;
const KIND_LZ4: u8 = 0x80;

/// Everything about an entry except its key and vector.
#[derive(Debug, Clone, PartialEq)]
pub struct RowHeader {
    pub model_id: String,
    pub class: ContentClass,
    pub metadata: Metadata,
    pub created_at: OffsetDateTime,
    pub last_accessed_at: OffsetDateTime,
    pub access_count: u64,
    pub ttl: Option<Duration>,
    pub compressed: bool,
    pub optimized: bool,
    pub quality_score: f32,
    pub generation_cost: Duration,
}

impl RowHeader {
    pub fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            model_id: entry.model_id.clone(),
            class: entry.class,
            metadata: entry.metadata.clone(),
            created_at: entry.created_at,
            last_accessed_at: entry.last_accessed_at,
            access_count: entry.access_count,
            ttl: entry.ttl,
            compressed: entry.compressed,
            optimized: entry.optimized,
            quality_score: entry.quality_score,
            generation_cost: entry.generation_cost,
        }
    }

    pub fn into_entry(self, key: FingerprintKey, vector: StoredVector) -> CacheEntry {
        CacheEntry {
            key,
            vector,
            metadata: self.metadata,
            model_id: self.model_id,
            class: self.class,
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at,
            access_count: self.access_count,
            ttl: self.ttl,
            compressed: self.compressed,
            optimized: self.optimized,
            quality_score: self.quality_score,
            generation_cost: self.generation_cost,
        }
    }

    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.ttl.and_then(|ttl| deadline(self.created_at, ttl))
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at().is_some_and(|at| now > at)
    }

    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        let metadata = metadata_to_json(&self.metadata).dump();
        let model_len = u16::try_from(self.model_id.len())
            .map_err(|_| StoreError::Corrupt("model id longer than 65535 bytes".into()))?;
        let metadata_len = u32::try_from(metadata.len())
            .map_err(|_| StoreError::Corrupt("metadata too large".into()))?;

        let mut flags = 0;
        if self.compressed {
            flags |= FLAG_COMPRESSED;
        }
        if self.optimized {
            flags |= FLAG_OPTIMIZED;
        }
        if self.ttl.is_some() {
            flags |= FLAG_HAS_TTL;
        }
        let ttl_ms = self
            .ttl
            .map(|ttl| u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        let cost_us = u64::try_from(self.generation_cost.as_micros()).unwrap_or(u64::MAX);

        let mut buf = Vec::with_capacity(HEADER_FIXED + self.model_id.len() + metadata.len());
        buf.extend_from_slice(&[MAGIC0, MAGIC1, VERSION, flags, self.class.code()]);
        buf.extend_from_slice(&unix_nanos(self.created_at).to_le_bytes());
        buf.extend_from_slice(&unix_nanos(self.last_accessed_at).to_le_bytes());
        buf.extend_from_slice(&self.access_count.to_le_bytes());
        buf.extend_from_slice(&ttl_ms.to_le_bytes());
        buf.extend_from_slice(&self.quality_score.to_le_bytes());
        buf.extend_from_slice(&cost_us.to_le_bytes());
        buf.extend_from_slice(&model_len.to_le_bytes());
        buf.extend_from_slice(&metadata_len.to_le_bytes());
        buf.extend_from_slice(self.model_id.as_bytes());
        buf.extend_from_slice(metadata.as_bytes());
        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> StoreResult<Self> {
        let mut r = Reader::new(data);
        if r.u8()? != MAGIC0 || r.u8()? != MAGIC1 {
            return Err(corrupt("bad header magic"));
        }
        let version = r.u8()?;
        if version != VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported header version {}",
                version
            )));
        }
        let flags = r.u8()?;
        let code = r.u8()?;
        let class = ContentClass::from_code(code)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown class code {}", code)))?;
        let created_at = from_unix_nanos(r.i64()?);
        let last_accessed_at = from_unix_nanos(r.i64()?);
        let access_count = r.u64()?;
        let ttl_ms = r.u64()?;
        let quality_score = r.f32()?;
        let cost_us = r.u64()?;
        let model_len = r.u16()? as usize;
        let metadata_len = r.u32()? as usize;

        let model_id = std::str::from_utf8(r.take(model_len)?)
            .map_err(|_| corrupt("model id is not utf-8"))?
            .to_string();
        let metadata_text = std::str::from_utf8(r.take(metadata_len)?)
            .map_err(|_| corrupt("metadata is not utf-8"))?;
        let metadata = json::parse(metadata_text)
            .ok()
            .as_ref()
            .and_then(metadata_from_json)
            .ok_or_else(|| corrupt("metadata is not a valid object"))?;

        Ok(Self {
            model_id,
            class,
            metadata,
            created_at,
            last_accessed_at,
            access_count,
            ttl: (flags & FLAG_HAS_TTL != 0).then(|| Duration::from_millis(ttl_ms)),
            compressed: flags & FLAG_COMPRESSED != 0,
            optimized: flags & FLAG_OPTIMIZED != 0,
            quality_score,
            generation_cost: Duration::from_micros(cost_us),
        })
    }
}

/// Encode vector bytes, compressing the payload when asked.
pub fn encode_vector(vector: &StoredVector, compression: CompressionMode) -> Vec<u8> {
    let (kind, payload) = match vector {
        StoredVector::Dense(values) => {
            let mut payload = Vec::with_capacity(4 + values.len() * 4);
            payload.extend_from_slice(&(values.len() as u32).to_le_bytes());
            for value in values {
                payload.extend_from_slice(&value.to_le_bytes());
            }
            (KIND_DENSE, payload)
        }
        StoredVector::Quantized { codes, min, max } => {
            let mut payload = Vec::with_capacity(12 + codes.len());
            payload.extend_from_slice(&(codes.len() as u32).to_le_bytes());
            payload.extend_from_slice(&min.to_le_bytes());
            payload.extend_from_slice(&max.to_le_bytes());
            payload.extend_from_slice(codes);
            (KIND_QUANTIZED, payload)
        }
    };

    let mut out = Vec::with_capacity(1 + payload.len());
    match compression {
        CompressionMode::None => {
            out.push(kind);
            out.extend_from_slice(&payload);
        }
        CompressionMode::Lz4 => {
            out.push(kind | KIND_LZ4);
            out.extend_from_slice(&lz4_flex::compress_prepend_size(&payload));
        }
    }
    out
}

/// Decode vector bytes written by [`encode_vector`].
pub fn decode_vector(data: &[u8]) -> StoreResult<StoredVector> {
    let (&tag, rest) = data
        .split_first()
        .ok_or_else(|| corrupt("empty vector row"))?;

    let decompressed;
    let payload = if tag & KIND_LZ4 != 0 {
        decompressed = lz4_flex::decompress_size_prepended(rest)
            .map_err(|e| StoreError::Corrupt(format!("lz4: {}", e)))?;
        decompressed.as_slice()
    } else {
        rest
    };

    let mut r = Reader::new(payload);
    let len = r.u32()? as usize;
    match tag & !KIND_LZ4 {
        KIND_DENSE => {
            let bytes = r.take(len.checked_mul(4).ok_or_else(|| corrupt("length overflow"))?)?;
            let values = bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            Ok(StoredVector::Dense(values))
        }
        KIND_QUANTIZED => {
            let min = r.f32()?;
            let max = r.f32()?;
            let codes = r.take(len)?.to_vec();
            Ok(StoredVector::Quantized { codes, min, max })
        }
        other => Err(StoreError::Corrupt(format!("unknown vector kind {}", other))),
    }
}

fn corrupt(reason: &str) -> StoreError {
    StoreError::Corrupt(reason.to_string())
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> StoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| corrupt("truncated row"))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> StoreResult<[u8; N]> {
        let mut out = [0; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> StoreResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> StoreResult<u16> {
        self.array().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> StoreResult<u32> {
        self.array().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> StoreResult<u64> {
        self.array().map(u64::from_le_bytes)
    }

    fn i64(&mut self) -> StoreResult<i64> {
        self.array().map(i64::from_le_bytes)
    }

    fn f32(&mut self) -> StoreResult<f32> {
        self.array().map(f32::from_le_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::MetadataValue;

    fn header() -> RowHeader {
        let mut metadata = Metadata::new();
        metadata.insert("applied_techniques".into(), "normalize,quantize".into());
        let mut improvements = Metadata::new();
        improvements.insert("normalize".into(), 0.25_f64.into());
        metadata.insert("improvements".into(), MetadataValue::Map(improvements));
        metadata.insert("reviewed".into(), true.into());

        RowHeader {
            model_id: "all-MiniLM-L6-v2".into(),
            class: ContentClass::Theorem,
            metadata,
            created_at: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
            last_accessed_at: OffsetDateTime::from_unix_timestamp(1_700_000_500).unwrap(),
            access_count: 7,
            ttl: Some(Duration::from_secs(3600)),
            compressed: true,
            optimized: true,
            quality_score: 0.875,
            generation_cost: Duration::from_micros(12_345),
        }
    }

    #[test]
    fn test_header_decodes_what_was_encoded() {
        let header = header();
        let bytes = header.encode().unwrap();
        assert_eq!(&bytes[..3], &[MAGIC0, MAGIC1, VERSION]);
        assert_eq!(RowHeader::decode(&bytes).unwrap(), header);

        let no_ttl = RowHeader { ttl: None, ..header };
        let decoded = RowHeader::decode(&no_ttl.encode().unwrap()).unwrap();
        assert_eq!(decoded.ttl, None);
    }

    #[test]
    fn test_header_rejects_garbage() {
        assert!(RowHeader::decode(&[]).is_err());
        assert!(RowHeader::decode(&[0xEB, 0xCA]).is_err());

        let mut bytes = header().encode().unwrap();
        bytes[0] = 0;
        assert!(matches!(RowHeader::decode(&bytes), Err(StoreError::Corrupt(_))));

        let bytes = header().encode().unwrap();
        assert!(RowHeader::decode(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_vector_formats() {
        let dense = StoredVector::Dense(vec![0.0, -1.5, 3.25]);
        let quantized = StoredVector::Quantized {
            codes: vec![0, 128, 255],
            min: -1.0,
            max: 1.0,
        };
        for vector in [dense, quantized] {
            for mode in [CompressionMode::None, CompressionMode::Lz4] {
                let bytes = encode_vector(&vector, mode);
                assert_eq!(decode_vector(&bytes).unwrap(), vector, "{:?}", mode);
            }
        }
    }

    #[test]
    fn test_lz4_shrinks_repetitive_vectors() {
        let vector = StoredVector::Dense(vec![0.5; 1024]);
        let plain = encode_vector(&vector, CompressionMode::None);
        let packed = encode_vector(&vector, CompressionMode::Lz4);
        assert!(packed.len() < plain.len() / 4);
        assert_eq!(packed[0] & KIND_LZ4, KIND_LZ4);
    }

    #[test]
    fn test_vector_rejects_truncation() {
        let bytes = encode_vector(&StoredVector::Dense(vec![1.0; 8]), CompressionMode::None);
        assert!(decode_vector(&bytes[..bytes.len() - 2]).is_err());
        assert!(decode_vector(&[]).is_err());
        assert!(decode_vector(&[7, 0, 0, 0, 0]).is_err());
    }
}
