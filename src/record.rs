//! Record model and shard routing
//!
//! ## Responsibilities
//! - Define the stored record shape (id, document, content hash, size)
//! - Compute CRC32 content hashes for integrity verification
//! - Route record ids to their shard prefix

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StoreError};

/// A stored record: an arbitrary JSON document keyed by a string id
///
/// `hash` is a CRC32 of the serialized `data` value, recomputed on every
/// write and verified after update rewrites. `size_kb` is informational
/// (serialized size of `data` in KB) and serializes under the key `size`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    /// Globally unique record id (also determines the shard prefix)
    pub id: String,

    /// Serialized size of `data` in kilobytes (informational)
    #[serde(rename = "size")]
    pub size_kb: f64,

    /// CRC32 of the serialized `data` value
    pub hash: u32,

    /// The document itself: any JSON-serializable value
    pub data: Value,
}

impl Record {
    /// Build a record from an id and document, computing hash and size
    pub fn new(id: impl Into<String>, data: Value) -> Result<Self> {
        let id = id.into();
        let bytes = serde_json::to_vec(&data)?;

        Ok(Self {
            id,
            size_kb: bytes.len() as f64 / 1024.0,
            hash: content_hash(&bytes),
            data,
        })
    }

    /// Recompute the content hash from the current `data` value
    pub fn computed_hash(&self) -> Result<u32> {
        let bytes = serde_json::to_vec(&self.data)?;
        Ok(content_hash(&bytes))
    }
}

/// CRC32 over serialized document bytes
fn content_hash(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Derive the shard prefix (first two characters) from a record id
///
/// Ids shorter than two characters cannot be routed, and ids containing
/// path separators would escape the shard directory; both are rejected.
pub fn shard_prefix(id: &str) -> Result<&str> {
    if id.contains('/') || id.contains('\\') {
        return Err(StoreError::InvalidId(id.to_string()));
    }

    let mut chars = id.char_indices();
    chars.next().ok_or_else(|| StoreError::InvalidId(id.to_string()))?;
    chars.next().ok_or_else(|| StoreError::InvalidId(id.to_string()))?;

    match chars.next() {
        Some((end, _)) => Ok(&id[..end]),
        None => Ok(id),
    }
}
