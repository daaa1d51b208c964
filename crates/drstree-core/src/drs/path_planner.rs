//! Canonical DRS paths and on-disk dataset inspection.
//!
//! ```text
//! <root>/<dataset>/
//!   files/d<digits>/<name>   physical data
//!   v<digits>/<name>         -> ../files/d<digits>/<name>
//!   latest/<name>            -> ../v<digits>/<name>
//! ```

use crate::config::DrsLayout;
use crate::drs::version::Version;
use crate::error::{DrsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Facet path of a dataset, version excluded.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DatasetKey(Vec<String>);

impl DatasetKey {
    pub fn new(parts: Vec<String>) -> Result<Self> {
        if parts.is_empty() {
            return Err(DrsError::Other("dataset key has no facets".to_string()));
        }
        for part in &parts {
            if part.is_empty() || part == "." || part == ".." || part.contains(['/', '\\']) {
                return Err(DrsError::Other(format!("invalid dataset facet {:?}", part)));
            }
        }
        Ok(DatasetKey(parts))
    }

    /// Key of a dataset directory relative to the DRS root.
    pub fn from_relative(relative: &Path) -> Result<Self> {
        let parts = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().to_string()),
                _ => None,
            })
            .collect();
        Self::new(parts)
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    pub fn to_path(&self) -> PathBuf {
        self.0.iter().collect()
    }
}

impl fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// Directories and link targets for one file of one dataset version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrsPaths {
    pub dataset_dir: PathBuf,
    pub data_dir: PathBuf,
    pub version_dir: PathBuf,
    pub latest_dir: PathBuf,
    pub file_name: String,
    version: Version,
}

impl DrsPaths {
    pub fn data_file(&self) -> PathBuf {
        self.data_dir.join(&self.file_name)
    }

    pub fn version_file(&self) -> PathBuf {
        self.version_dir.join(&self.file_name)
    }

    pub fn latest_file(&self) -> PathBuf {
        self.latest_dir.join(&self.file_name)
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Relative target of the version entry: `../files/d<digits>/<name>`.
    pub fn version_link_target(&self) -> PathBuf {
        let data_dir_name = self.data_dir.file_name().unwrap_or_default();
        Path::new("..")
            .join(DrsLayout::FILES_DIR_NAME)
            .join(data_dir_name)
            .join(&self.file_name)
    }

    /// Relative target of the latest entry: `../v<digits>/<name>`.
    pub fn latest_link_target(&self) -> PathBuf {
        latest_link_target(&self.version, &self.file_name)
    }
}

/// Relative target of a latest entry pointing into `version`.
pub fn latest_link_target(version: &Version, file_name: &str) -> PathBuf {
    Path::new("..").join(version.dir_name()).join(file_name)
}

/// Pure mapping from (dataset, version, file name) to DRS paths.
#[derive(Debug, Clone)]
pub struct PathPlanner {
    root: PathBuf,
}

impl PathPlanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dataset_dir(&self, key: &DatasetKey) -> PathBuf {
        self.root.join(key.to_path())
    }

    /// Paths for one file; `latest` is rejected since it has no data directory.
    pub fn plan(&self, key: &DatasetKey, version: &Version, file_name: &str) -> Result<DrsPaths> {
        if file_name.is_empty() || file_name.contains(['/', '\\']) {
            return Err(DrsError::Other(format!("invalid file name {:?}", file_name)));
        }
        let data_dir_name = version.data_dir_name()?;
        let dataset_dir = self.dataset_dir(key);
        Ok(DrsPaths {
            data_dir: dataset_dir
                .join(DrsLayout::FILES_DIR_NAME)
                .join(data_dir_name),
            version_dir: dataset_dir.join(version.dir_name()),
            latest_dir: dataset_dir.join(DrsLayout::LATEST_DIR_NAME),
            dataset_dir,
            file_name: file_name.to_string(),
            version: version.clone(),
        })
    }
}

/// Resolve `.` and `..` without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn entry_names(dir: &Path) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(DrsError::io_with_path(e, dir)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| DrsError::io_with_path(e, dir))?;
        names.insert(entry.file_name().to_string_lossy().to_string());
    }
    Ok(names)
}

/// Read-only view of one dataset directory as it exists on disk.
#[derive(Debug, Clone)]
pub struct DatasetLayout {
    dataset_dir: PathBuf,
}

impl DatasetLayout {
    pub fn new(dataset_dir: impl Into<PathBuf>) -> Self {
        Self {
            dataset_dir: dataset_dir.into(),
        }
    }

    pub fn dataset_dir(&self) -> &Path {
        &self.dataset_dir
    }

    pub fn version_dir(&self, version: &Version) -> PathBuf {
        self.dataset_dir.join(version.dir_name())
    }

    pub fn data_dir(&self, version: &Version) -> Result<PathBuf> {
        Ok(self
            .dataset_dir
            .join(DrsLayout::FILES_DIR_NAME)
            .join(version.data_dir_name()?))
    }

    pub fn latest_dir(&self) -> PathBuf {
        self.dataset_dir.join(DrsLayout::LATEST_DIR_NAME)
    }

    /// Concrete versions present on disk, oldest first.
    pub fn versions(&self) -> Result<Vec<Version>> {
        let mut versions: Vec<Version> = entry_names(&self.dataset_dir)?
            .into_iter()
            .filter(|name| Version::is_version_dir(name))
            .filter(|name| self.dataset_dir.join(name).is_dir())
            .filter_map(|name| Version::parse(&name).ok())
            .collect();
        versions.sort();
        Ok(versions)
    }

    /// Newest concrete version on disk.
    pub fn latest_version(&self) -> Result<Option<Version>> {
        Ok(self.versions()?.pop())
    }

    /// Newest version whose version directory holds `file_name`.
    pub fn newest_version_with(
        &self,
        file_name: &str,
        excluding: Option<&Version>,
    ) -> Result<Option<Version>> {
        let versions = self.versions()?;
        Ok(versions
            .into_iter()
            .rev()
            .filter(|v| Some(v) != excluding)
            .find(|v| self.version_dir(v).join(file_name).symlink_metadata().is_ok()))
    }

    pub fn version_entries(&self, version: &Version) -> Result<BTreeSet<String>> {
        entry_names(&self.version_dir(version))
    }

    pub fn data_entries(&self, version: &Version) -> Result<BTreeSet<String>> {
        entry_names(&self.data_dir(version)?)
    }

    /// Entries of `latest/` with their link target (`None` for non-links).
    pub fn latest_entries(&self) -> Result<BTreeMap<String, Option<PathBuf>>> {
        let latest_dir = self.latest_dir();
        let mut entries = BTreeMap::new();
        for name in entry_names(&latest_dir)? {
            let target = fs::read_link(latest_dir.join(&name)).ok();
            entries.insert(name, target);
        }
        Ok(entries)
    }

    /// Where a version entry points, one symlink hop, normalized.
    pub fn resolve_entry(&self, version: &Version, file_name: &str) -> Option<PathBuf> {
        let entry = self.version_dir(version).join(file_name);
        match fs::read_link(&entry) {
            Ok(target) if target.is_absolute() => Some(normalize_lexically(&target)),
            Ok(target) => Some(normalize_lexically(&self.version_dir(version).join(target))),
            Err(_) if entry.symlink_metadata().is_ok() => Some(entry),
            Err(_) => None,
        }
    }

    /// Version a latest entry currently points into.
    pub fn latest_target_version(&self, file_name: &str) -> Option<Version> {
        let target = fs::read_link(self.latest_dir().join(file_name)).ok()?;
        let version_dir = target.parent()?.file_name()?.to_str()?;
        Version::parse(version_dir).ok().filter(|v| !v.is_latest())
    }

    /// True when `latest` itself is a symlink (legacy whole-directory layout).
    pub fn has_legacy_latest(&self) -> bool {
        self.latest_dir()
            .symlink_metadata()
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
    }

    /// Refuse datasets whose `latest` is a directory symlink.
    ///
    /// Writing `latest/<name>` through such a link would land inside the
    /// version it points at.
    pub fn require_per_file_latest(&self) -> Result<()> {
        if self.has_legacy_latest() {
            return Err(DrsError::LegacyLatest {
                path: self.latest_dir(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key() -> DatasetKey {
        DatasetKey::new(vec!["cmip6".into(), "Amon".into()]).unwrap()
    }

    #[test]
    fn test_plan_layout() {
        let planner = PathPlanner::new("/data/drs");
        let v = Version::parse("v20250401").unwrap();
        let paths = planner.plan(&key(), &v, "tas_Amon.nc").unwrap();

        assert_eq!(
            paths.data_file(),
            Path::new("/data/drs/cmip6/Amon/files/d20250401/tas_Amon.nc")
        );
        assert_eq!(
            paths.version_file(),
            Path::new("/data/drs/cmip6/Amon/v20250401/tas_Amon.nc")
        );
        assert_eq!(
            paths.latest_file(),
            Path::new("/data/drs/cmip6/Amon/latest/tas_Amon.nc")
        );
        assert_eq!(
            paths.version_link_target(),
            Path::new("../files/d20250401/tas_Amon.nc")
        );
        assert_eq!(
            paths.latest_link_target(),
            Path::new("../v20250401/tas_Amon.nc")
        );
    }

    #[test]
    fn test_plan_rejects_latest() {
        let planner = PathPlanner::new("/data/drs");
        assert!(planner.plan(&key(), &Version::Latest, "a.nc").is_err());
        let v = Version::parse("v1").unwrap();
        assert!(planner.plan(&key(), &v, "sub/a.nc").is_err());
    }

    #[test]
    fn test_dataset_key() {
        assert_eq!(key().to_string(), "cmip6/Amon");
        let from_rel = DatasetKey::from_relative(Path::new("cmip6/Amon")).unwrap();
        assert_eq!(from_rel, key());
        assert!(DatasetKey::new(vec![]).is_err());
        assert!(DatasetKey::new(vec!["a/b".into()]).is_err());
    }

    #[test]
    fn test_normalize_lexically() {
        assert_eq!(
            normalize_lexically(Path::new("/r/ds/v1/../files/d1/a.nc")),
            Path::new("/r/ds/files/d1/a.nc")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_layout_inspection() {
        let temp = TempDir::new().unwrap();
        let ds = temp.path().join("ds");
        let v1 = Version::parse("v1").unwrap();
        let v2 = Version::parse("v2").unwrap();
        fs::create_dir_all(ds.join("files/d1")).unwrap();
        fs::create_dir_all(ds.join("v1")).unwrap();
        fs::create_dir_all(ds.join("v2")).unwrap();
        fs::create_dir_all(ds.join("latest")).unwrap();
        fs::write(ds.join("files/d1/a.nc"), b"abc").unwrap();
        std::os::unix::fs::symlink("../files/d1/a.nc", ds.join("v1/a.nc")).unwrap();
        std::os::unix::fs::symlink("../v1/a.nc", ds.join("latest/a.nc")).unwrap();

        let layout = DatasetLayout::new(&ds);
        assert_eq!(layout.versions().unwrap(), vec![v1.clone(), v2.clone()]);
        assert_eq!(layout.latest_version().unwrap(), Some(v2.clone()));
        assert_eq!(layout.newest_version_with("a.nc", None).unwrap(), Some(v1.clone()));
        assert_eq!(layout.newest_version_with("a.nc", Some(&v1)).unwrap(), None);
        assert_eq!(
            layout.resolve_entry(&v1, "a.nc"),
            Some(ds.join("files/d1/a.nc"))
        );
        assert_eq!(layout.latest_target_version("a.nc"), Some(v1));
        assert!(!layout.has_legacy_latest());
        assert!(layout.require_per_file_latest().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_legacy_latest_refused() {
        let temp = TempDir::new().unwrap();
        let ds = temp.path().join("ds");
        fs::create_dir_all(ds.join("v1")).unwrap();
        std::os::unix::fs::symlink("v1", ds.join("latest")).unwrap();

        let layout = DatasetLayout::new(&ds);
        assert!(layout.has_legacy_latest());
        assert!(matches!(
            layout.require_per_file_latest(),
            Err(DrsError::LegacyLatest { path }) if path == ds.join("latest")
        ));
    }
}
