//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use drstree_core::{
    Action, Command, MigrationMode, Orchestrator, ProjectConfig, Result, RunOptions, RunReport,
    TemplateResolver, TraceSink, Version,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;

pub const DATASET: &str = "cmip6/Amon";

/// Temporary root with an incoming area and a DRS root.
pub struct Fixture {
    pub temp: TempDir,
    pub incoming: PathBuf,
    pub root: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let base = temp.path().canonicalize().unwrap();
        let incoming = base.join("incoming");
        let root = base.join("drs");
        fs::create_dir_all(&incoming).unwrap();
        fs::create_dir_all(&root).unwrap();
        Self {
            temp,
            incoming,
            root,
        }
    }

    /// Drop a file into the incoming area.
    pub fn incoming_file(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.incoming.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    pub fn clear_incoming(&self) {
        fs::remove_dir_all(&self.incoming).unwrap();
        fs::create_dir_all(&self.incoming).unwrap();
    }

    pub fn dataset_dir(&self) -> PathBuf {
        self.root.join(DATASET)
    }

    pub fn make_options(&self, action: Action, mode: MigrationMode, version: &str) -> RunOptions {
        let mut options = RunOptions::new(
            Command::Make,
            action,
            self.root.clone(),
            vec![self.incoming.clone()],
        );
        options.mode = mode;
        options.version = Some(version_of(version));
        options.max_processes = 2;
        options
    }

    pub fn dataset_options(&self, command: Command, action: Action) -> RunOptions {
        let mut options = RunOptions::new(command, action, self.root.clone(), vec![self.root.clone()]);
        options.max_processes = 2;
        options
    }

    /// Run `make` with the test project template.
    pub fn make(&self, options: RunOptions, sink: &TraceSink) -> Result<RunReport> {
        let version = options.version.clone().unwrap_or_else(Version::today);
        let resolver = TemplateResolver::new(project_config(), version)?;
        Orchestrator::new(options)
            .with_resolver(Arc::new(resolver))
            .with_sink(sink.clone())
            .run()
    }

    /// Publish the current incoming files as `version` (copy mode).
    pub fn publish(&self, version: &str) -> RunReport {
        let options = self.make_options(Action::Upgrade, MigrationMode::Copy, version);
        let report = self.make(options, &TraceSink::memory()).unwrap();
        assert_eq!(report.exit_code(), 0);
        report
    }

    pub fn run(&self, options: RunOptions, sink: &TraceSink) -> Result<RunReport> {
        Orchestrator::new(options).with_sink(sink.clone()).run()
    }
}

pub fn version_of(token: &str) -> Version {
    Version::from_cli(token).unwrap()
}

/// `{project}/{table}/{version}` with files named `<variable>_<table>.nc`.
pub fn project_config() -> ProjectConfig {
    ProjectConfig {
        project: "cmip6".to_string(),
        directory_format: "{project}/{table}/{version}".to_string(),
        filename_format: r"^(?P<variable>[^_]+)_(?P<table>[^_.]+)\.nc$".to_string(),
        defaults: BTreeMap::new(),
        checksum: None,
        checksum_filename: false,
        filename_filter: None,
    }
}

/// `latest/` entries and their link targets.
pub fn latest_links(dataset_dir: &Path) -> BTreeMap<String, PathBuf> {
    let Ok(entries) = fs::read_dir(dataset_dir.join("latest")) else {
        return BTreeMap::new();
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| {
            (
                e.file_name().to_string_lossy().to_string(),
                fs::read_link(e.path()).unwrap(),
            )
        })
        .collect()
}

/// Names present in `v<version>/`.
pub fn version_entries(dataset_dir: &Path, version: &str) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dataset_dir.join(format!("v{}", version))) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

/// Every entry under `root` with its kind and symlink target or contents.
pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, String> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|entry| {
            let path = entry.path();
            let kind = entry.file_type();
            let description = if kind.is_symlink() {
                format!("link {}", fs::read_link(path).unwrap().display())
            } else if kind.is_dir() {
                "dir".to_string()
            } else {
                format!("file {}", String::from_utf8_lossy(&fs::read(path).unwrap()))
            };
            (path.strip_prefix(root).unwrap().to_path_buf(), description)
        })
        .collect()
}
