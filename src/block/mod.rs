//! Block Store
//!
//! Bounded-capacity files holding a batch of records for one shard.
//!
//! ## Responsibilities
//! - Name and enumerate block files (incrementing numeric suffix per shard)
//! - Pick the block an insert should land in
//! - Read and atomically rewrite whole block files
//!
//! ## File Format
//! A block file is a JSON array of records:
//! ```text
//! [{"id": "...", "size": 0.1, "hash": 1234, "data": {...}}, ...]
//! ```
//! Capacity is accounted in the prefix index, not in the file itself.

mod store;

pub use store::{
    block_file_name, block_path, enumerate_blocks, next_block_name, parse_block_seq, read_block,
    select_block, write_block,
};
