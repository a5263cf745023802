//! Stored representation of a cache entry
//!
//! Layout: one JSON header line carrying `stored_at` and `ttl_seconds`, a
//! newline, then the payload bytes untouched. Entries larger than the
//! compression threshold are gzipped as a whole and prefixed with
//! [`COMPRESSION_MARKER`]; an uncompressed entry always starts with `{`.
// cspell:ignore GzEncoder GzDecoder flate

use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use crate::application::errors::StoreError;
use crate::config::CacheConfig;

const COMPRESSION_MARKER: &[u8; 4] = b"GZIP";

/// When stored entries get compressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionPolicy {
    pub enabled: bool,
    pub threshold_bytes: u64,
}

impl CompressionPolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enable_compression,
            threshold_bytes: config.compression_threshold_bytes,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            threshold_bytes: 0,
        }
    }

    fn applies_to(&self, len: usize) -> bool {
        self.enabled && len as u64 > self.threshold_bytes
    }
}

#[derive(Serialize, Deserialize)]
struct EntryHeader {
    stored_at: DateTime<Utc>,
    ttl_seconds: u64,
}

/// A cached payload with the metadata needed to enforce its lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEnvelope {
    pub stored_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub payload: Vec<u8>,
}

impl CacheEnvelope {
    pub fn new(payload: Vec<u8>, ttl_seconds: u64) -> Self {
        Self {
            stored_at: Utc::now(),
            ttl_seconds,
            payload,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX);
        self.stored_at + chrono::Duration::seconds(ttl.min(i64::from(i32::MAX)))
    }

    /// An entry is never served at or past `stored_at + ttl_seconds`
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }

    pub fn encode(&self, compression: CompressionPolicy) -> Result<Vec<u8>, StoreError> {
        let header = EntryHeader {
            stored_at: self.stored_at,
            ttl_seconds: self.ttl_seconds,
        };
        let mut encoded = serde_json::to_vec(&header)
            .map_err(|e| StoreError::Backend(format!("cache header serialize error: {}", e)))?;
        encoded.push(b'\n');
        encoded.extend_from_slice(&self.payload);

        if !compression.applies_to(encoded.len()) {
            return Ok(encoded);
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&encoded)
            .map_err(|e| StoreError::Backend(format!("compression error: {}", e)))?;
        let compressed = encoder
            .finish()
            .map_err(|e| StoreError::Backend(format!("compression finish error: {}", e)))?;

        let mut result = Vec::with_capacity(COMPRESSION_MARKER.len() + compressed.len());
        result.extend_from_slice(COMPRESSION_MARKER);
        result.extend_from_slice(&compressed);
        Ok(result)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, StoreError> {
        let decompressed;
        let bytes = if let Some(compressed) = raw.strip_prefix(COMPRESSION_MARKER.as_slice()) {
            let mut decoder = GzDecoder::new(compressed);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| StoreError::Corrupt(format!("decompression error: {}", e)))?;
            decompressed = out;
            decompressed.as_slice()
        } else {
            raw
        };

        let split = bytes
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| StoreError::Corrupt("cache entry has no header".into()))?;
        let header: EntryHeader = serde_json::from_slice(&bytes[..split])
            .map_err(|e| StoreError::Corrupt(format!("cache header parse error: {}", e)))?;

        Ok(Self {
            stored_at: header.stored_at,
            ttl_seconds: header.ttl_seconds,
            payload: bytes[split + 1..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_bytes_survive_untouched() {
        let payload = b"{\"posts\":[]}\nsecond line\x00\xff".to_vec();
        let envelope = CacheEnvelope::new(payload.clone(), 30);

        let decoded =
            CacheEnvelope::decode(&envelope.encode(CompressionPolicy::disabled()).unwrap()).unwrap();
        assert_eq!(decoded.payload, payload);
        assert_eq!(decoded.ttl_seconds, 30);
    }

    #[test]
    fn test_large_entries_are_compressed() {
        let policy = CompressionPolicy {
            enabled: true,
            threshold_bytes: 64,
        };
        let envelope = CacheEnvelope::new("post ".repeat(500).into_bytes(), 60);

        let encoded = envelope.encode(policy).unwrap();
        assert!(encoded.starts_with(COMPRESSION_MARKER));
        assert!(encoded.len() < envelope.payload.len());
        assert_eq!(CacheEnvelope::decode(&encoded).unwrap(), envelope);
    }

    #[test]
    fn test_small_entries_stay_plain() {
        let policy = CompressionPolicy {
            enabled: true,
            threshold_bytes: 10_240,
        };
        let encoded = CacheEnvelope::new(b"tiny".to_vec(), 60).encode(policy).unwrap();
        assert_eq!(encoded[0], b'{');
    }

    #[test]
    fn test_freshness_boundary() {
        let envelope = CacheEnvelope::new(Vec::new(), 10);
        let stored = envelope.stored_at;

        assert!(envelope.is_fresh_at(stored + chrono::Duration::seconds(9)));
        assert!(!envelope.is_fresh_at(stored + chrono::Duration::seconds(10)));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        assert!(matches!(
            CacheEnvelope::decode(b"no header here"),
            Err(StoreError::Corrupt(_))
        ));
        assert!(matches!(
            CacheEnvelope::decode(b"GZIPnot gzip"),
            Err(StoreError::Corrupt(_))
        ));
    }
}
