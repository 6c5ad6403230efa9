//! Atomic JSON file IO
//!
//! All on-disk state (blocks, indexes, manifest) goes through these helpers
//! so a crash mid-write can never leave a file with mixed old and new
//! content: data is written to a sibling temp file, flushed, then renamed
//! over the target.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StoreError};

/// Suffix for in-flight temp files
const TMP_SUFFIX: &str = ".tmp";

/// Serialize `value` as JSON and atomically replace `path` with it
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp_path = tmp_sibling(path);

    {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(StoreError::io_at(&tmp_path))?;

        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, value)?;
        writer.flush().map_err(StoreError::io_at(&tmp_path))?;

        // Flush alone only empties the BufWriter; sync before rename so the
        // renamed file is durable, not just visible.
        writer
            .into_inner()
            .map_err(|e| StoreError::IoAt {
                path: tmp_path.clone(),
                source: e.into_error(),
            })?
            .sync_all()
            .map_err(StoreError::io_at(&tmp_path))?;
    }

    fs::rename(&tmp_path, path).map_err(StoreError::io_at(path))?;
    sync_parent_dir(path)?;
    Ok(())
}

/// Read and deserialize a JSON file
///
/// Returns `Ok(None)` when the file is missing or empty; a parse failure is
/// surfaced so callers can decide whether to rebuild.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io_at(path)(e)),
    };

    if bytes.is_empty() {
        return Ok(None);
    }

    let value = serde_json::from_slice(&bytes)?;
    Ok(Some(value))
}

/// Open a file's parent-relative temp sibling path
fn tmp_sibling(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(TMP_SUFFIX);
    path.with_file_name(name)
}

/// Best-effort removal that ignores already-missing files
pub(crate) fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io_at(path)(e)),
    }
}

/// Sync a file's containing directory so a rename survives power loss
///
/// Best-effort: directories cannot be opened for sync on every platform.
fn sync_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            dir.sync_all().map_err(StoreError::io_at(parent))?;
        }
    }
    Ok(())
}
