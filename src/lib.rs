//! # shardstore
//!
//! An embedded, file-based JSON document store with:
//! - Records sharded by id prefix into bounded-size block files
//! - A two-level index (per-shard prefix index + global registry)
//! - Transparent crash/corruption recovery via index rebuild
//! - Write-through in-memory caching of indexes and block content
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Engine                                │
//! │        (CRUD orchestration, per-shard locking)               │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┼────────────────┐
//!          │            │                │
//!          ▼            ▼                ▼
//!   ┌─────────────┐ ┌─────────────┐ ┌─────────────┐
//!   │ Main Index  │ │Prefix Index │ │ Block Store │
//!   │ (registry)  │ │ (per shard) │ │ (JSON files)│
//!   └─────────────┘ └──────┬──────┘ └──────┬──────┘
//!                          │               │
//!                          ▼               ▼
//!                   ┌─────────────────────────┐
//!                   │  Write-through Caches   │
//!                   │  (keyed by file path)   │
//!                   └─────────────────────────┘
//! ```
//!
//! ## On-Disk Layout
//!
//! ```text
//! {root}/
//!   ├── active/<prefix>/block_NNN.json   (JSON array of records)
//!   ├── active/<prefix>/index.json       (prefix index)
//!   ├── global_index.json                (main index registry)
//!   └── manifest.json                    (static store metadata)
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod record;
pub mod block;
pub mod index;
pub mod cache;
pub mod engine;

mod fsio;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::Config;
pub use engine::Engine;
pub use error::{Result, StoreError};
pub use record::Record;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of shardstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
