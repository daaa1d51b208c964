//! Retirement of one dataset version.
//!
//! Data files are only deleted when no other version still points at them.
//! Every `latest` entry that pointed into the retired version is moved to
//! the newest remaining version holding that file, or deleted.

use crate::drs::operation::{MigrationMode, MigrationOperation};
use crate::drs::path_planner::{latest_link_target, DatasetKey, DatasetLayout};
use crate::drs::tree::{DatasetPlan, FileRecord};
use crate::drs::version::Version;
use crate::error::{DrsError, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct VersionRemover {
    version: Option<Version>,
}

impl VersionRemover {
    /// Remove `version`, or the newest version when `None`.
    pub fn new(version: Option<Version>) -> Self {
        Self {
            version: version.filter(|v| !v.is_latest()),
        }
    }

    pub fn plan(&self, key: DatasetKey, dataset_dir: PathBuf) -> Result<DatasetPlan> {
        let layout = DatasetLayout::new(&dataset_dir);
        layout.require_per_file_latest()?;

        let versions = layout.versions()?;
        let latest_version = versions.last().cloned();
        let target = match &self.version {
            Some(version) => version.clone(),
            None => latest_version.clone().ok_or_else(|| DrsError::VersionNotFound {
                dataset: key.to_string(),
                version: "any".to_string(),
            })?,
        };
        if !versions.contains(&target) {
            return Err(DrsError::VersionNotFound {
                dataset: key.to_string(),
                version: target.to_string(),
            });
        }

        let mut referenced = HashSet::new();
        for other in versions.iter().filter(|v| **v != target) {
            for name in layout.version_entries(other)? {
                if let Some(resolved) = layout.resolve_entry(other, &name) {
                    referenced.insert(resolved);
                }
            }
        }

        let mut operations = Vec::new();
        let mut records = Vec::new();

        let data_dir = layout.data_dir(&target)?;
        for name in layout.data_entries(&target)? {
            let path = data_dir.join(&name);
            if referenced.contains(&path) {
                debug!("Keeping {}: still referenced", path.display());
                continue;
            }
            let size = path.symlink_metadata().map(|m| m.len()).unwrap_or(0);
            records.push(FileRecord {
                source: None,
                destination: path.clone(),
                is_duplicate: false,
                checksum: None,
                size,
            });
            operations.push((MigrationOperation::remove(path), false));
        }

        let version_dir = layout.version_dir(&target);
        for name in layout.version_entries(&target)? {
            operations.push((MigrationOperation::remove(version_dir.join(name)), false));
        }

        let latest_dir = layout.latest_dir();
        for name in layout.latest_entries()?.into_keys() {
            if layout.latest_target_version(&name).as_ref() != Some(&target) {
                continue;
            }
            let entry = latest_dir.join(&name);
            match layout.newest_version_with(&name, Some(&target))? {
                Some(previous) => operations.push((
                    MigrationOperation::place(
                        MigrationMode::Symlink,
                        latest_link_target(&previous, &name),
                        entry,
                    ),
                    true,
                )),
                None => operations.push((MigrationOperation::remove(entry), true)),
            }
        }

        Ok(DatasetPlan {
            key,
            dataset_dir,
            latest_version,
            target_version: target,
            operations,
            records,
        })
    }
}
