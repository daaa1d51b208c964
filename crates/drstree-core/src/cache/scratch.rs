//! Scratch cache of the previous run.
//!
//! Holds the controlled arguments, the planned tree and per-file results.
//! When a later run has the same arguments and does not just list, the
//! per-file scan is skipped and the cached tree is used instead.

use crate::cache::{atomic_read_json, atomic_write_json};
use crate::drs::tree::DrsTree;
use crate::drs::Action;
use crate::error::Result;
use crate::orchestrator::{FileResult, RunArguments};
use crate::platform::scratch_cache_path;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedRun {
    pub arguments: RunArguments,
    pub index: DrsTree,
    pub results: Vec<FileResult>,
}

#[derive(Debug, Clone)]
pub struct ScratchCache {
    path: PathBuf,
}

impl Default for ScratchCache {
    fn default() -> Self {
        Self::new(scratch_cache_path())
    }
}

impl ScratchCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Previous run, if readable. An unreadable cache is treated as absent.
    pub fn load(&self) -> Option<CachedRun> {
        match atomic_read_json::<CachedRun>(&self.path) {
            Ok(cached) => cached,
            Err(e) => {
                warn!("Ignoring scratch cache {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub fn store(&self, run: &CachedRun) -> Result<()> {
        atomic_write_json(&self.path, run)?;
        debug!("Stored scratch cache {}", self.path.display());
        Ok(())
    }

    /// Cached run usable in place of a scan, if any.
    pub fn reusable(
        &self,
        arguments: &RunArguments,
        action: Action,
        rescan: bool,
    ) -> Option<CachedRun> {
        if rescan || action == Action::List {
            return None;
        }
        self.load().filter(|cached| cached.arguments == *arguments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drs::Command;
    use crate::orchestrator::RunOptions;
    use crate::scheduler::WorkOutcome;
    use tempfile::TempDir;

    fn cached_run(arguments: RunArguments) -> CachedRun {
        CachedRun {
            index: DrsTree::new("/drs", arguments.command),
            arguments,
            results: vec![FileResult {
                source: "/in/tas_Amon.nc".into(),
                outcome: WorkOutcome::Success,
            }],
        }
    }

    #[test]
    fn test_reusable_only_for_same_arguments() {
        let temp = TempDir::new().unwrap();
        let cache = ScratchCache::new(temp.path().join("DRSTree_test.json"));
        let options = RunOptions::new(Command::Make, Action::Todo, "/drs", vec!["/in".into()]);
        let arguments = RunArguments::from(&options);

        assert!(cache.reusable(&arguments, Action::Todo, false).is_none());
        cache.store(&cached_run(arguments.clone())).unwrap();

        let reused = cache.reusable(&arguments, Action::Upgrade, false).unwrap();
        assert_eq!(reused.results.len(), 1);
        assert!(cache.reusable(&arguments, Action::List, false).is_none());
        assert!(cache.reusable(&arguments, Action::Todo, true).is_none());

        let mut other = options.clone();
        other.directories.push("/in2".into());
        assert!(cache
            .reusable(&RunArguments::from(&other), Action::Todo, false)
            .is_none());
    }

    #[test]
    fn test_corrupt_cache_is_ignored() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("DRSTree_test.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(ScratchCache::new(path).load().is_none());
    }
}
