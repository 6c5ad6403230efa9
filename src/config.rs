//! Configuration for a shardstore instance
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

/// Main configuration for a store instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files.
    /// Internal structure:
    ///   {root_dir}/
    ///     ├── active/<prefix>/block_NNN.json   (sharded block files)
    ///     ├── active/<prefix>/index.json       (per-shard prefix index)
    ///     ├── global_index.json                (main index registry)
    ///     └── manifest.json                    (static store metadata)
    pub root_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Block Configuration
    // -------------------------------------------------------------------------
    /// Max records per block file before a new block is allocated
    pub max_records_per_file: usize,

    // -------------------------------------------------------------------------
    // Backup Configuration
    // -------------------------------------------------------------------------
    /// Requested backup cadence in days. Accepted for compatibility with
    /// external backup schedulers; the engine itself never acts on it.
    pub backup_every_days: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./shardstore_data"),
            max_records_per_file: 2000,
            backup_every_days: 7,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the root directory (root for all storage)
    pub fn root_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.root_dir = path.into();
        self
    }

    /// Set the max number of records per block file
    pub fn max_records_per_file(mut self, count: usize) -> Self {
        self.config.max_records_per_file = count;
        self
    }

    /// Set the requested backup cadence in days
    pub fn backup_every_days(mut self, days: u32) -> Self {
        self.config.backup_every_days = days;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
