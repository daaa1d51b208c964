//! Repair of per-file `latest` links.

use crate::drs::operation::{MigrationMode, MigrationOperation};
use crate::drs::path_planner::{latest_link_target, DatasetKey, DatasetLayout};
use crate::drs::tree::{DatasetPlan, FileRecord};
use crate::error::{DrsError, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Points every `latest/<name>` at the newest version holding `<name>`.
///
/// Correct links produce no operation, so a second run plans nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatestRepairer;

impl LatestRepairer {
    pub fn plan(&self, key: DatasetKey, dataset_dir: PathBuf) -> Result<DatasetPlan> {
        let layout = DatasetLayout::new(&dataset_dir);
        layout.require_per_file_latest()?;

        let versions = layout.versions()?;
        let latest_version = versions.last().cloned().ok_or_else(|| DrsError::VersionNotFound {
            dataset: key.to_string(),
            version: "any".to_string(),
        })?;

        let mut desired = BTreeMap::new();
        for version in &versions {
            for name in layout.version_entries(version)? {
                desired.insert(name, version.clone());
            }
        }

        let current = layout.latest_entries()?;
        let latest_dir = layout.latest_dir();
        let mut operations = Vec::new();
        let mut records = Vec::new();

        for (name, version) in &desired {
            let target = latest_link_target(version, name);
            if current.get(name) == Some(&Some(target.clone())) {
                continue;
            }
            let entry = latest_dir.join(name);
            records.push(FileRecord {
                source: Some(layout.version_dir(version).join(name)),
                destination: entry.clone(),
                is_duplicate: false,
                checksum: None,
                size: 0,
            });
            operations.push((
                MigrationOperation::place(MigrationMode::Symlink, target, entry),
                true,
            ));
        }
        for name in current.keys().filter(|name| !desired.contains_key(*name)) {
            operations.push((MigrationOperation::remove(latest_dir.join(name)), true));
        }

        Ok(DatasetPlan {
            key,
            dataset_dir,
            latest_version: Some(latest_version.clone()),
            target_version: latest_version,
            operations,
            records,
        })
    }
}
