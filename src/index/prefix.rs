//! Per-shard prefix index
//!
//! ## Responsibilities
//! - Track capacity stats for every block in a shard
//! - Map each record id to the block holding it and its last-update time
//! - Rebuild from block files when the stored index is missing or corrupt
//!
//! The index is write-through: every engine mutation updates the in-memory
//! index and persists it before the call returns.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::block;
use crate::error::{Result, StoreError};
use crate::fsio;

/// Capacity accounting for one block file
///
/// Invariant: `used_lines + free_spaces == total_lines`, and `used_lines`
/// equals the record count actually present in the block file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStats {
    /// Capacity of the block (records)
    pub total_lines: usize,
    /// Records currently stored
    pub used_lines: usize,
    /// Remaining capacity
    pub free_spaces: usize,
}

impl BlockStats {
    /// Stats for a block holding `used` of `capacity` records
    pub fn new(capacity: usize, used: usize) -> Self {
        Self {
            total_lines: capacity,
            used_lines: used,
            free_spaces: capacity.saturating_sub(used),
        }
    }

    /// Whether another record fits in this block
    pub fn has_room(&self) -> bool {
        self.used_lines < self.total_lines
    }

    /// Account for one record added
    pub fn occupy(&mut self) {
        self.used_lines += 1;
        self.free_spaces = self.total_lines.saturating_sub(self.used_lines);
    }

    /// Account for one record removed
    pub fn release(&mut self) {
        self.used_lines = self.used_lines.saturating_sub(1);
        self.free_spaces = self.total_lines.saturating_sub(self.used_lines);
    }
}

/// Where a record lives within its shard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordLocation {
    /// Name of the block holding the record (e.g. "block_001")
    pub block: String,
    /// Last time the record was written (ISO8601 in JSON)
    pub last_update: DateTime<Utc>,
}

/// Metadata for one shard: block stats plus a record-to-block map
///
/// Invariant: every id in `records` resolves to a block present in `blocks`,
/// and that block's file actually contains a record with that id. Drift
/// between the two (possible after a crash) is healed by [`PrefixIndex::rebuild`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrefixIndex {
    /// Capacity stats per block name
    pub blocks: BTreeMap<String, BlockStats>,
    /// Record id -> location
    pub records: BTreeMap<String, RecordLocation>,
}

/// How a prefix index was obtained
///
/// Distinguishes a clean read from a recovery rebuild so callers (and tests)
/// can observe which path was taken instead of silently getting an empty
/// index on decode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSource {
    /// Parsed from the stored index file
    Clean,
    /// Reconstructed by scanning block files
    Rebuilt,
}

impl PrefixIndex {
    /// True when the index tracks no blocks and no records
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.records.is_empty()
    }

    /// Load a stored index, or rebuild it from the shard's block files
    ///
    /// The stored file wins when it exists, is non-empty, and parses.
    /// Anything else (missing, empty, or unparsable) triggers a rebuild that
    /// is persisted before returning, so the next load is clean.
    pub fn load_or_rebuild(
        shard_dir: &Path,
        index_path: &Path,
        capacity: usize,
    ) -> Result<(Self, IndexSource)> {
        match fsio::read_json::<PrefixIndex>(index_path) {
            Ok(Some(index)) => return Ok((index, IndexSource::Clean)),
            Ok(None) => {}
            // Corruption is recoverable; a real IO failure is not
            Err(StoreError::Serialization(e)) => {
                tracing::warn!(
                    "unparsable prefix index at {}, rebuilding: {}",
                    index_path.display(),
                    e
                );
            }
            Err(e) => return Err(e),
        }

        let index = Self::rebuild(shard_dir, capacity)?;
        // A shard that never existed has nowhere to persist to
        if shard_dir.is_dir() {
            index.persist(index_path)?;
        }
        Ok((index, IndexSource::Rebuilt))
    }

    /// Reconstruct the index by scanning every block file in the shard
    ///
    /// Lossy by design: original last-update timestamps live only in the
    /// index, so every recovered record gets the rebuild time.
    pub fn rebuild(shard_dir: &Path, capacity: usize) -> Result<Self> {
        let mut index = PrefixIndex::default();
        let now = Utc::now();

        for (block_name, block_path) in block::enumerate_blocks(shard_dir)? {
            let records = block::read_block(&block_path)?;

            index
                .blocks
                .insert(block_name.clone(), BlockStats::new(capacity, records.len()));

            for record in records {
                index.records.insert(
                    record.id,
                    RecordLocation {
                        block: block_name.clone(),
                        last_update: now,
                    },
                );
            }
        }

        tracing::debug!(
            "rebuilt prefix index for {}: {} blocks, {} records",
            shard_dir.display(),
            index.blocks.len(),
            index.records.len()
        );

        Ok(index)
    }

    /// Persist the index to disk (atomic replace)
    pub fn persist(&self, index_path: &Path) -> Result<()> {
        fsio::write_json_atomic(index_path, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_stats_invariant() {
        let mut stats = BlockStats::new(2000, 0);
        assert_eq!(stats.total_lines, 2000);
        assert_eq!(stats.free_spaces, 2000);

        stats.occupy();
        assert_eq!(stats.used_lines, 1);
        assert_eq!(stats.used_lines + stats.free_spaces, stats.total_lines);

        stats.release();
        assert_eq!(stats.used_lines, 0);
        assert_eq!(stats.used_lines + stats.free_spaces, stats.total_lines);
    }

    #[test]
    fn test_block_stats_has_room() {
        let stats = BlockStats::new(2, 2);
        assert!(!stats.has_room());
        assert!(BlockStats::new(2, 1).has_room());
    }

    #[test]
    fn test_prefix_index_json_shape() {
        let mut index = PrefixIndex::default();
        index.blocks.insert("block_001".into(), BlockStats::new(2000, 1));
        index.records.insert(
            "ab01".into(),
            RecordLocation {
                block: "block_001".into(),
                last_update: Utc::now(),
            },
        );

        let value = serde_json::to_value(&index).unwrap();
        let stats = &value["blocks"]["block_001"];
        assert_eq!(stats["total_lines"], 2000);
        assert_eq!(stats["used_lines"], 1);
        assert_eq!(stats["free_spaces"], 1999);

        let loc = &value["records"]["ab01"];
        assert_eq!(loc["block"], "block_001");
        // ISO8601 timestamp string
        assert!(loc["last_update"].as_str().unwrap().contains('T'));
    }
}
