//! Facet resolution: from an incoming file to its dataset key.
//!
//! The resolver is a seam; [`TemplateResolver`] is the default, driven by a
//! project template. Facet values are not checked against any vocabulary.

use crate::config::{DrsLayout, ProjectConfig};
use crate::drs::path_planner::DatasetKey;
use crate::drs::version::Version;
use crate::error::{DrsError, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;

/// Facets of one incoming file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFacets {
    pub dataset_key: DatasetKey,
    pub version: Version,
    pub facets: BTreeMap<String, String>,
}

/// Maps an incoming file to its dataset.
pub trait FacetResolver: Send + Sync {
    /// Resolve one file; failures are per-file `Resolution` errors.
    fn resolve(&self, source: &Path) -> Result<ResolvedFacets>;
}

/// Resolver built from a [`ProjectConfig`] template and command-line overrides.
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    config: ProjectConfig,
    filename_regex: Regex,
    facet_names: Vec<String>,
    version: Version,
    set_values: BTreeMap<String, String>,
    set_keys: BTreeMap<String, String>,
}

impl TemplateResolver {
    pub fn new(config: ProjectConfig, version: Version) -> Result<Self> {
        config.validate()?;
        if version.is_latest() {
            return Err(DrsError::InvalidVersion {
                token: version.to_string(),
            });
        }
        let filename_regex = Regex::new(&config.filename_format)?;
        let facet_names = config.facet_names();
        Ok(Self {
            config,
            filename_regex,
            facet_names,
            version,
            set_values: BTreeMap::new(),
            set_keys: BTreeMap::new(),
        })
    }

    /// Force facets to fixed values (`--set-value facet=value`).
    pub fn with_set_values(mut self, values: BTreeMap<String, String>) -> Self {
        self.set_values = values;
        self
    }

    /// Take facets from another capture group (`--set-key facet=group`).
    pub fn with_set_keys(mut self, keys: BTreeMap<String, String>) -> Self {
        self.set_keys = keys;
        self
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }
}

impl FacetResolver for TemplateResolver {
    fn resolve(&self, source: &Path) -> Result<ResolvedFacets> {
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DrsError::resolution(source, "file name is not valid UTF-8"))?;

        let captures = self.filename_regex.captures(file_name).ok_or_else(|| {
            DrsError::resolution(
                source,
                format!("file name does not match {:?}", self.config.filename_format),
            )
        })?;

        let mut groups = BTreeMap::new();
        for name in self.filename_regex.capture_names().flatten() {
            if let Some(value) = captures.name(name) {
                groups.insert(name.to_string(), value.as_str().to_string());
            }
        }

        let mut facets = groups.clone();
        for (facet, value) in &self.config.defaults {
            facets.entry(facet.clone()).or_insert_with(|| value.clone());
        }
        facets
            .entry("project".to_string())
            .or_insert_with(|| self.config.project.clone());

        for (facet, group) in &self.set_keys {
            let value = groups.get(group).ok_or_else(|| {
                DrsError::resolution(source, format!("no capture group {:?} for {}", group, facet))
            })?;
            facets.insert(facet.clone(), value.clone());
        }
        for (facet, value) in &self.set_values {
            facets.insert(facet.clone(), value.clone());
        }
        facets.insert(
            DrsLayout::VERSION_FACET.to_string(),
            self.version.dir_name(),
        );

        let mut parts = Vec::with_capacity(self.facet_names.len());
        for name in &self.facet_names {
            let value = facets
                .get(name)
                .ok_or_else(|| DrsError::resolution(source, format!("missing facet {:?}", name)))?;
            if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\\']) {
                return Err(DrsError::resolution(
                    source,
                    format!("facet {:?} has invalid value {:?}", name, value),
                ));
            }
            parts.push(value.clone());
        }

        Ok(ResolvedFacets {
            dataset_key: DatasetKey::new(parts)?,
            version: self.version.clone(),
            facets,
        })
    }
}

/// Parse repeated `key=value` pairs.
pub fn parse_assignments(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair.split_once('=').ok_or_else(|| DrsError::Config {
            message: format!("expected key=value, got {:?}", pair),
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(DrsError::Config {
                message: format!("empty key in {:?}", pair),
            });
        }
        map.insert(key.to_string(), value.trim().to_string());
    }
    Ok(map)
}
