//! Block file operations
//!
//! All writes go through atomic temp-file replacement so a crash mid-write
//! cannot leave a block with mixed old and new content.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};
use crate::fsio;
use crate::index::PrefixIndex;
use crate::record::Record;

/// Block file name prefix ("block_001" etc.)
const BLOCK_NAME_PREFIX: &str = "block_";

/// Block file extension
const BLOCK_EXT: &str = "json";

/// Block name for a shard-local sequence number
///
/// Zero-padded to three digits for stable lexicographic ordering; parsing
/// tolerates any digit width.
pub fn block_file_name(seq: u64) -> String {
    format!("{}{:03}", BLOCK_NAME_PREFIX, seq)
}

/// Full path of a named block within a shard directory
pub fn block_path(shard_dir: &Path, block_name: &str) -> PathBuf {
    shard_dir.join(format!("{}.{}", block_name, BLOCK_EXT))
}

/// Parse the sequence number out of a block name
/// "block_042" -> Some(42)
pub fn parse_block_seq(name: &str) -> Option<u64> {
    name.strip_prefix(BLOCK_NAME_PREFIX)?.parse().ok()
}

/// Enumerate block files in a shard directory, ordered by sequence number
///
/// Returns `(block name, path)` pairs. Non-block files (the shard's index,
/// temp files, backups) are skipped. A missing directory yields an empty list.
pub fn enumerate_blocks(shard_dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let entries = match fs::read_dir(shard_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io_at(shard_dir)(e)),
    };

    let mut blocks: Vec<(u64, String, PathBuf)> = Vec::new();

    for entry in entries {
        let entry = entry.map_err(StoreError::io_at(shard_dir))?;
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(BLOCK_EXT) {
            continue;
        }

        let stem = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem.to_string(),
            None => continue,
        };

        if let Some(seq) = parse_block_seq(&stem) {
            blocks.push((seq, stem, path));
        }
    }

    blocks.sort_by_key(|(seq, _, _)| *seq);
    Ok(blocks.into_iter().map(|(_, name, path)| (name, path)).collect())
}

/// Pick the block an insert should land in
///
/// First block with free capacity wins; when every block is full (or the
/// shard has none yet), the next sequence number is allocated.
pub fn select_block(index: &PrefixIndex) -> String {
    for (name, stats) in &index.blocks {
        if stats.has_room() {
            return name.clone();
        }
    }
    next_block_name(index)
}

/// Allocate the next block name after the highest existing sequence
pub fn next_block_name(index: &PrefixIndex) -> String {
    let highest = index
        .blocks
        .keys()
        .filter_map(|name| parse_block_seq(name))
        .max()
        .unwrap_or(0);
    block_file_name(highest + 1)
}

/// Read a block file into its ordered record list
///
/// A missing file reads as empty; the caller decides whether that is index
/// drift or a brand-new block.
pub fn read_block(path: &Path) -> Result<Vec<Record>> {
    Ok(fsio::read_json(path)?.unwrap_or_default())
}

/// Write a block's full record list (atomic replace)
pub fn write_block(path: &Path, records: &[Record]) -> Result<()> {
    fsio::write_json_atomic(path, &records)
}
