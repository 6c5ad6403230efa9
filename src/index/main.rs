//! Global main index
//!
//! A registry, not a cache: maps each shard prefix to the location of its
//! prefix index file. Invariant: every prefix with an existing, non-empty
//! prefix index file has an entry here. Rebuilt by scanning the top-level
//! shard directories when missing or corrupt.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::fsio;
use crate::index::{IndexSource, PrefixIndex, PREFIX_INDEX_FILENAME};

/// Registry entry for one shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardEntry {
    /// Path of the shard's prefix index, relative to the store root
    pub active: String,
    /// Optional backup index path, relative to the store root
    #[serde(default)]
    pub backup: Option<String>,
}

/// Global registry of shards
///
/// JSON shape keeps the prefixes at the top level next to `total_index`:
/// `{"total_index": 2, "ab": {"active": "...", "backup": null}, ...}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MainIndex {
    /// Number of registered shards
    pub total_index: u64,

    /// Prefix -> shard entry, flattened alongside `total_index`
    #[serde(flatten)]
    pub containers: BTreeMap<String, ShardEntry>,
}

impl MainIndex {
    /// Load the stored main index, or rebuild it by directory scan
    pub fn load_or_rebuild(index_path: &Path, active_dir: &Path) -> Result<(Self, IndexSource)> {
        match fsio::read_json::<MainIndex>(index_path) {
            Ok(Some(index)) => return Ok((index, IndexSource::Clean)),
            Ok(None) => {}
            // Corruption is recoverable; a real IO failure is not
            Err(StoreError::Serialization(e)) => {
                tracing::warn!(
                    "unparsable main index at {}, rebuilding: {}",
                    index_path.display(),
                    e
                );
            }
            Err(e) => return Err(e),
        }

        let index = Self::rebuild(active_dir)?;
        index.persist(index_path)?;
        Ok((index, IndexSource::Rebuilt))
    }

    /// Reconstruct the registry by scanning `active/` for shard directories
    /// holding a valid, non-empty prefix index file
    pub fn rebuild(active_dir: &Path) -> Result<Self> {
        let mut index = MainIndex::default();

        let entries = match fs::read_dir(active_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(index),
            Err(e) => return Err(StoreError::io_at(active_dir)(e)),
        };

        for entry in entries {
            let entry = entry.map_err(StoreError::io_at(active_dir))?;
            let shard_dir = entry.path();
            if !shard_dir.is_dir() {
                continue;
            }

            let prefix = match shard_dir.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };

            // Only shards whose index file parses are registered; a shard
            // with blocks but no index is picked up once its index rebuilds.
            let index_file = shard_dir.join(PREFIX_INDEX_FILENAME);
            match fsio::read_json::<PrefixIndex>(&index_file) {
                Ok(Some(prefix_index)) if !prefix_index.is_empty() => {
                    let entry = Self::relative_entry(&prefix);
                    index.insert_shard(prefix, entry);
                }
                _ => continue,
            }
        }

        tracing::debug!(
            "rebuilt main index from {}: {} shards",
            active_dir.display(),
            index.total_index
        );

        Ok(index)
    }

    /// Insert or overwrite a shard entry, bumping `total_index` on new ones
    pub fn insert_shard(&mut self, prefix: String, entry: ShardEntry) {
        if self.containers.insert(prefix, entry).is_none() {
            self.total_index += 1;
        }
    }

    /// Standard root-relative entry for a shard prefix
    pub fn relative_entry(prefix: &str) -> ShardEntry {
        ShardEntry {
            active: format!("active/{}/{}", prefix, PREFIX_INDEX_FILENAME),
            backup: None,
        }
    }

    /// Persist the registry to disk (atomic replace)
    pub fn persist(&self, index_path: &Path) -> Result<()> {
        fsio::write_json_atomic(index_path, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_index_json_shape() {
        let mut index = MainIndex::default();
        index.insert_shard("ab".into(), MainIndex::relative_entry("ab"));

        let value = serde_json::to_value(&index).unwrap();
        assert_eq!(value["total_index"], 1);
        assert_eq!(value["ab"]["active"], "active/ab/index.json");
        assert!(value["ab"]["backup"].is_null());
    }

    #[test]
    fn test_insert_shard_counts_new_prefixes_once() {
        let mut index = MainIndex::default();
        index.insert_shard("ab".into(), MainIndex::relative_entry("ab"));
        index.insert_shard("ab".into(), MainIndex::relative_entry("ab"));
        index.insert_shard("cd".into(), MainIndex::relative_entry("cd"));

        assert_eq!(index.total_index, 2);
        assert_eq!(index.containers.len(), 2);
    }

    #[test]
    fn test_main_index_round_trip() {
        let mut index = MainIndex::default();
        index.insert_shard("ab".into(), MainIndex::relative_entry("ab"));

        let json = serde_json::to_string(&index).unwrap();
        let parsed: MainIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, index);
    }
}
