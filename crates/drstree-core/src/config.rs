//! Centralized configuration for the DRS tree builder.
//!
//! Layout and scan constants live in unit structs with associated consts.
//! The project template (facet naming, checksum defaults) is a JSON document
//! loaded through [`ProjectConfig::load`].

use crate::cache::atomic_read_json;
use crate::error::{DrsError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// On-disk DRS layout names.
pub struct DrsLayout;

impl DrsLayout {
    pub const FILES_DIR_NAME: &'static str = "files";
    pub const LATEST_DIR_NAME: &'static str = "latest";
    pub const DATA_DIR_PREFIX: &'static str = "d";
    pub const VERSION_DIR_PREFIX: &'static str = "v";
    pub const LATEST_TOKEN: &'static str = "latest";
    pub const VERSION_PLACEHOLDER: &'static str = "{version}";
    pub const VERSION_FACET: &'static str = "version";
    pub const LINK_SEPARATOR: &'static str = " --> ";
}

/// Scan and worker pool defaults.
pub struct ScanConfig;

impl ScanConfig {
    pub const DEFAULT_MAX_PROCESSES: usize = 4;
    pub const DEFAULT_CHECKSUM: &'static str = "sha256";
    pub const HASH_CHUNK_SIZE: usize = 1024 * 1024;
    pub const PROBE_FILE_PREFIX: &'static str = ".drstree-probe-";
}

/// Scratch cache naming.
pub struct CacheConfig;

impl CacheConfig {
    pub const SCRATCH_FILE_PREFIX: &'static str = "DRSTree_";
    pub const SCRATCH_FILE_EXTENSION: &'static str = "json";
}

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const CONFIG_DIR_NAME: &'static str = "drstree";
}

/// Project template: how a file name turns into a dataset path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub project: String,
    /// Slash-separated facet template, `{version}` last.
    pub directory_format: String,
    /// Regex with named capture groups matched against the file name.
    pub filename_format: String,
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
    #[serde(default)]
    pub checksum: Option<String>,
    /// Salt digests with the file name.
    #[serde(default)]
    pub checksum_filename: bool,
    #[serde(default)]
    pub filename_filter: Option<String>,
}

impl ProjectConfig {
    /// Load a project file, failing if it is absent or malformed.
    pub fn load(path: &Path) -> Result<Self> {
        let config: ProjectConfig = atomic_read_json(path)?.ok_or_else(|| DrsError::Config {
            message: format!("project configuration not found: {}", path.display()),
        })?;
        config.validate()?;
        debug!("Loaded project configuration {}", path.display());
        Ok(config)
    }

    /// Default location of a project file: `<config_dir>/drstree/<project>.json`.
    pub fn default_path(project: &str) -> Option<PathBuf> {
        dirs::config_dir().map(|dir| {
            dir.join(AppConfig::CONFIG_DIR_NAME)
                .join(format!("{}.json", project))
        })
    }

    /// Resolve the project file: an explicit path wins over the default location.
    pub fn locate(explicit: Option<&Path>, project: Option<&str>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        let project = project.ok_or_else(|| DrsError::Config {
            message: "either --config or --project is required".to_string(),
        })?;
        Self::default_path(project).ok_or_else(|| DrsError::Config {
            message: "no user configuration directory available".to_string(),
        })
    }

    /// Template segments, e.g. `["{project}", "{table}", "{version}"]`.
    pub fn segments(&self) -> Vec<&str> {
        self.directory_format
            .split('/')
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Checks the template before any file is touched.
    pub fn validate(&self) -> Result<()> {
        let segments = self.segments();
        match segments.last() {
            Some(last) if *last == DrsLayout::VERSION_PLACEHOLDER => {}
            _ => {
                return Err(DrsError::NoVersionPattern {
                    format: self.directory_format.clone(),
                })
            }
        }
        if segments
            .iter()
            .filter(|s| **s == DrsLayout::VERSION_PLACEHOLDER)
            .count()
            > 1
        {
            return Err(DrsError::Config {
                message: format!(
                    "{} appears more than once in {:?}",
                    DrsLayout::VERSION_PLACEHOLDER,
                    self.directory_format
                ),
            });
        }
        for segment in &segments {
            if !(segment.starts_with('{') && segment.ends_with('}')) {
                return Err(DrsError::Config {
                    message: format!("malformed template segment {:?}", segment),
                });
            }
        }
        Regex::new(&self.filename_format)?;
        if let Some(filter) = &self.filename_filter {
            Regex::new(filter)?;
        }
        Ok(())
    }

    /// Facet names in template order, excluding the version.
    pub fn facet_names(&self) -> Vec<String> {
        self.segments()
            .iter()
            .filter(|s| **s != DrsLayout::VERSION_PLACEHOLDER)
            .map(|s| s.trim_start_matches('{').trim_end_matches('}').to_string())
            .collect()
    }
}
