//! Atomic JSON persistence for configuration and scratch state.
//!
//! Writes go to a named temporary file in the destination directory, are
//! synced, then renamed over the target so readers never see a partial file.

use crate::error::{DrsError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Read and parse a JSON file.
///
/// Returns `None` if the file doesn't exist, or an error if parsing fails.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(DrsError::io_with_path(e, path)),
    };

    let data: T = serde_json::from_str(&contents).map_err(|e| DrsError::Json {
        message: format!("Failed to parse {}: {}", path.display(), e),
        source: Some(e),
    })?;

    Ok(Some(data))
}

/// Write data to a JSON file atomically, creating parent directories.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| DrsError::io_with_path(e, parent))?;

    let serialized = serde_json::to_string_pretty(data).map_err(|e| DrsError::Json {
        message: format!("Failed to serialize {}: {}", path.display(), e),
        source: Some(e),
    })?;

    let mut temp = NamedTempFile::new_in(parent).map_err(|e| DrsError::io_with_path(e, parent))?;
    temp.write_all(serialized.as_bytes())
        .map_err(|e| DrsError::io_with_path(e, temp.path()))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| DrsError::io_with_path(e, temp.path()))?;

    temp.persist(path)
        .map_err(|e| DrsError::io_with_path(e.error, path))?;

    debug!("Atomically wrote {}", path.display());
    Ok(())
}
