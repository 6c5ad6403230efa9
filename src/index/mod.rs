//! Two-level index
//!
//! ## Responsibilities
//! - Per-shard prefix index: block capacity stats + record locations
//! - Global main index: registry of shards and their index files
//! - Rebuild either level from the filesystem when missing or corrupt
//!
//! Both levels persist write-through: the engine never defers index flushes.

mod main;
mod prefix;

pub use main::{MainIndex, ShardEntry};
pub use prefix::{BlockStats, IndexSource, PrefixIndex, RecordLocation};

/// File name of a shard's prefix index within its shard directory
pub const PREFIX_INDEX_FILENAME: &str = "index.json";
