//! Stored record envelope for the quota medium.

use serde::{Deserialize, Serialize};

use super::codec::CompressionAlgorithm;

/// One cache entry as written to the medium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub created_at: u64,
    pub last_accessed_at: u64,
    pub ttl_ms: u64,
    pub access_count: u64,
    /// Namespaced key length + stored payload length
    pub size_bytes: usize,
    /// Length of the serialized JSON before any transform
    pub original_size_bytes: usize,
    /// Length of `payload`
    pub compressed_size_bytes: usize,
    /// Transform applied to `payload`; `None` means raw JSON
    pub codec: CompressionAlgorithm,
    pub payload: String,
}

impl StoredRecord {
    pub fn compression_applied(&self) -> bool {
        self.codec != CompressionAlgorithm::None
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.created_at) > self.ttl_ms
    }

    pub fn touch(&mut self, now: u64) {
        self.access_count += 1;
        self.last_accessed_at = now;
    }
}

/// In-memory index entry mirroring a stored record's metadata.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexEntry {
    pub created_at: u64,
    pub last_accessed_at: u64,
    pub ttl_ms: u64,
    pub size_bytes: usize,
    pub compressed: bool,
    /// Order in which the cache last wrote or read the record
    pub seq: u64,
}

impl IndexEntry {
    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.created_at) > self.ttl_ms
    }
}

impl From<&StoredRecord> for IndexEntry {
    fn from(record: &StoredRecord) -> Self {
        Self {
            created_at: record.created_at,
            last_accessed_at: record.last_accessed_at,
            ttl_ms: record.ttl_ms,
            size_bytes: record.size_bytes,
            compressed: record.compression_applied(),
            seq: 0,
        }
    }
}
