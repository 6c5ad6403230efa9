//! In-memory write-through caches
//!
//! Mirrors of on-disk index and block content, keyed by absolute path, to
//! avoid redundant disk reads. Entries are only written after the backing
//! file write succeeds, so a cache hit always reflects durable state.
//! Readers get cheap `Arc` clones; a store-wide clear drops everything.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

/// A path-keyed cache of parsed file content
#[derive(Debug)]
pub struct PathCache<T> {
    entries: RwLock<HashMap<PathBuf, Arc<T>>>,
}

impl<T> PathCache<T> {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Look up the cached content for a path
    pub fn get(&self, path: &Path) -> Option<Arc<T>> {
        self.entries.read().get(path).cloned()
    }

    /// Insert (or replace) the content for a path, returning the shared handle
    pub fn put(&self, path: PathBuf, value: T) -> Arc<T> {
        let value = Arc::new(value);
        self.entries.write().insert(path, Arc::clone(&value));
        value
    }

    /// Drop the entry for a path (e.g. after its file is deleted)
    pub fn remove(&self, path: &Path) {
        self.entries.write().remove(path);
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<T> Default for PathCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
