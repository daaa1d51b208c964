//! Discovery of incoming files and existing datasets.

use crate::config::DrsLayout;
use crate::drs::version::Version;
use crate::error::{DrsError, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

fn canonical_inputs(dirs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    dirs.iter()
        .map(|dir| fs::canonicalize(dir).map_err(|e| DrsError::io_with_path(e, dir)))
        .collect()
}

/// Regular files under `dirs`, sorted, with absolute paths.
///
/// Hidden entries and symlinks are skipped; `filter` is matched against the
/// file name.
pub fn collect_files(dirs: &[PathBuf], filter: Option<&Regex>) -> Result<Vec<PathBuf>> {
    let mut files = BTreeSet::new();
    for dir in canonical_inputs(dirs)? {
        for entry in WalkDir::new(&dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !is_hidden(e))
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Cannot read {}: {}", dir.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if filter.is_some_and(|re| !re.is_match(&name)) {
                continue;
            }
            files.insert(entry.into_path());
        }
    }
    debug!("Collected {} incoming files", files.len());
    Ok(files.into_iter().collect())
}

fn is_dataset_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|entries| {
            entries.filter_map(|e| e.ok()).any(|e| {
                Version::is_version_dir(&e.file_name().to_string_lossy()) && e.path().is_dir()
            })
        })
        .unwrap_or(false)
}

fn is_layout_dir(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    entry.depth() > 0
        && (name == DrsLayout::FILES_DIR_NAME
            || name == DrsLayout::LATEST_DIR_NAME
            || Version::is_version_dir(&name))
}

/// Dataset directories (those holding a `v<digits>` child) under `dirs`.
pub fn discover_datasets(dirs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut datasets = BTreeSet::new();
    for dir in canonical_inputs(dirs)? {
        for entry in WalkDir::new(&dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.file_type().is_dir() && !is_hidden(e) && !is_layout_dir(e))
            .filter_map(|e| e.ok())
        {
            if is_dataset_dir(entry.path()) {
                datasets.insert(entry.into_path());
            }
        }
    }
    debug!("Discovered {} datasets", datasets.len());
    Ok(datasets.into_iter().collect())
}
