//! The in-memory DRS tree shared by all workers of one run.
//!
//! Nodes live in a flat map keyed by identifier (the node's full path).
//! A node's `parent` is a lookup key only; ownership flows from the map.
//! Workers mutate the tree through [`DatasetIndex`], which serializes all
//! access behind one lock.

use crate::config::DrsLayout;
use crate::drs::operation::{MigrationMode, MigrationOperation};
use crate::drs::path_planner::{DatasetKey, DatasetLayout};
use crate::drs::version::Version;
use crate::drs::Command;
use crate::error::{DrsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// One entry of the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrsNode {
    pub identifier: String,
    /// Directory name, or `name --> target` for symlink leaves.
    pub tag: String,
    pub parent: Option<String>,
    pub children: Vec<String>,
    pub leaf: Option<MigrationOperation>,
}

impl DrsNode {
    pub fn is_leaf(&self) -> bool {
        self.leaf.is_some()
    }
}

/// One planned file of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absent for remove-only records.
    pub source: Option<PathBuf>,
    pub destination: PathBuf,
    pub is_duplicate: bool,
    pub checksum: Option<String>,
    #[serde(default)]
    pub size: u64,
}

impl FileRecord {
    pub fn file_name(&self) -> Option<String> {
        self.destination
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
    }
}

/// Per-dataset state accumulated during one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetBuildState {
    pub key: DatasetKey,
    pub dataset_dir: PathBuf,
    /// Newest version on disk before the run.
    pub latest_version: Option<Version>,
    /// Version being created or removed.
    pub upgrade_version: Version,
    pub files: Vec<FileRecord>,
    /// Incoming files dropped because they are unchanged.
    pub duplicates: Vec<PathBuf>,
}

/// Operations planned for one on-disk dataset by `remove` or `latest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetPlan {
    pub key: DatasetKey,
    pub dataset_dir: PathBuf,
    pub latest_version: Option<Version>,
    pub target_version: Version,
    /// Operations with their `force` flag.
    pub operations: Vec<(MigrationOperation, bool)>,
    pub records: Vec<FileRecord>,
}

/// Tree of planned operations plus per-dataset state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrsTree {
    root: PathBuf,
    root_id: String,
    command: Command,
    nodes: BTreeMap<String, DrsNode>,
    datasets: BTreeMap<String, DatasetBuildState>,
}

fn identifier(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

impl DrsTree {
    pub fn new(root: impl Into<PathBuf>, command: Command) -> Self {
        let root = root.into();
        let root_id = identifier(&root);
        let mut nodes = BTreeMap::new();
        nodes.insert(
            root_id.clone(),
            DrsNode {
                identifier: root_id.clone(),
                tag: root_id.clone(),
                parent: None,
                children: Vec::new(),
                leaf: None,
            },
        );
        Self {
            root,
            root_id,
            command,
            nodes,
            datasets: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn node(&self, id: &str) -> Option<&DrsNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Path segments of `path` below the root.
    pub fn segments(&self, path: &Path) -> Option<Vec<String>> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => segments.push(part.to_string_lossy().to_string()),
                _ => return None,
            }
        }
        if segments.is_empty() {
            None
        } else {
            Some(segments)
        }
    }

    /// Ensure every node along `segments` exists; returns the last identifier.
    fn ensure_nodes(&mut self, segments: &[String]) -> String {
        let mut parent_id = self.root_id.clone();
        let mut path = self.root.clone();
        for segment in segments {
            path.push(segment);
            let id = identifier(&path);
            if !self.nodes.contains_key(&id) {
                self.nodes.insert(
                    id.clone(),
                    DrsNode {
                        identifier: id.clone(),
                        tag: segment.clone(),
                        parent: Some(parent_id.clone()),
                        children: Vec::new(),
                        leaf: None,
                    },
                );
                if let Some(parent) = self.nodes.get_mut(&parent_id) {
                    parent.children.push(id.clone());
                }
            }
            parent_id = id;
        }
        parent_id
    }

    /// Directory node for `segments` and its ancestors, no leaf.
    pub fn ensure_dir(&mut self, segments: &[String]) {
        self.ensure_nodes(segments);
    }

    /// Identifier of the node `operation` would land on, when that node
    /// already holds something else.
    fn conflicting_node(&self, segments: &[String], operation: &MigrationOperation) -> Option<String> {
        let mut path = self.root.clone();
        path.extend(segments);
        let id = identifier(&path);
        let node = self.nodes.get(&id)?;
        let taken = match &node.leaf {
            Some(existing) => existing != operation,
            None => !node.children.is_empty(),
        };
        taken.then_some(id)
    }

    /// Fail if a non-forced `operation` would collide with a leaf planned
    /// from another file. Directories and out-of-tree removals never collide.
    pub fn check_leaf_free(&self, operation: &MigrationOperation) -> Result<()> {
        if matches!(operation, MigrationOperation::MakeDir { .. }) {
            return Ok(());
        }
        let Some(segments) = self.segments(operation.target()) else {
            return Ok(());
        };
        match self.conflicting_node(&segments, operation) {
            Some(id) => Err(DrsError::resolution(
                operation.source().unwrap_or(operation.target()),
                format!("{} is already planned from another file", id),
            )),
            None => Ok(()),
        }
    }

    /// Create a leaf and any missing ancestors.
    ///
    /// Unless `force` is set, planning the same operation twice is a no-op
    /// and planning a different one over an existing node is an error.
    /// With `force` the node's tag and operation are replaced in place.
    pub fn create_leaf(
        &mut self,
        segments: &[String],
        label: String,
        operation: MigrationOperation,
        force: bool,
    ) -> Result<()> {
        if segments.is_empty() {
            return Err(DrsError::Other("cannot create a leaf at the tree root".to_string()));
        }
        if !force {
            if let Some(id) = self.conflicting_node(segments, &operation) {
                return Err(DrsError::resolution(
                    operation.source().unwrap_or(operation.target()),
                    format!("{} is already planned from another file", id),
                ));
            }
        }
        let id = self.ensure_nodes(segments);
        let Some(node) = self.nodes.get_mut(&id) else {
            return Err(DrsError::Other(format!("tree node vanished: {}", id)));
        };
        if force || node.leaf.is_none() {
            node.tag = label;
            node.leaf = Some(operation);
        } else {
            debug!("Leaf {} already planned", id);
        }
        Ok(())
    }

    /// Record an operation under the dataset it belongs to.
    ///
    /// `MakeDir` becomes a directory node, `Place` and in-tree `Remove`
    /// become leaves, and a `Remove` outside the root is a dropped duplicate.
    pub fn insert_operation(
        &mut self,
        dataset: &DatasetKey,
        operation: MigrationOperation,
        force: bool,
    ) -> Result<()> {
        let target = operation.target().to_path_buf();
        let Some(segments) = self.segments(&target) else {
            return match operation {
                MigrationOperation::Remove { path } => {
                    let state = self.datasets.get_mut(&dataset.to_string()).ok_or_else(|| {
                        DrsError::Other(format!("unknown dataset {}", dataset))
                    })?;
                    state.duplicates.push(path);
                    Ok(())
                }
                _ => Err(DrsError::Other(format!(
                    "{} is outside of {}",
                    target.display(),
                    self.root.display()
                ))),
            };
        };
        match operation {
            MigrationOperation::MakeDir { .. } => {
                self.ensure_dir(&segments);
                Ok(())
            }
            operation => {
                let label = leaf_label(&operation);
                self.create_leaf(&segments, label, operation, force)
            }
        }
    }

    /// Create the state for a dataset if it does not exist yet.
    pub fn add_path(
        &mut self,
        key: &DatasetKey,
        dataset_dir: PathBuf,
        latest_version: Option<Version>,
        upgrade_version: Version,
    ) -> &mut DatasetBuildState {
        self.datasets
            .entry(key.to_string())
            .or_insert_with(|| DatasetBuildState {
                key: key.clone(),
                dataset_dir,
                latest_version,
                upgrade_version,
                files: Vec::new(),
                duplicates: Vec::new(),
            })
    }

    /// Append a file record to an existing dataset.
    pub fn append_path(&mut self, key: &DatasetKey, record: FileRecord) -> Result<()> {
        let state = self
            .datasets
            .get_mut(&key.to_string())
            .ok_or_else(|| DrsError::Other(format!("unknown dataset {}", key)))?;
        state.files.push(record);
        Ok(())
    }

    /// Record a whole dataset plan.
    pub fn apply_plan(&mut self, plan: DatasetPlan) -> Result<()> {
        self.add_path(
            &plan.key,
            plan.dataset_dir,
            plan.latest_version,
            plan.target_version,
        );
        for record in plan.records {
            self.append_path(&plan.key, record)?;
        }
        for (operation, force) in plan.operations {
            self.insert_operation(&plan.key, operation, force)?;
        }
        Ok(())
    }

    pub fn dataset(&self, key: &DatasetKey) -> Option<&DatasetBuildState> {
        self.datasets.get(&key.to_string())
    }

    pub fn datasets(&self) -> impl Iterator<Item = &DatasetBuildState> {
        self.datasets.values()
    }

    /// Leaves below `subtree` (the root when `None`), depth first in
    /// insertion order.
    pub fn leaves(&self, subtree: Option<&Path>) -> Leaves<'_> {
        let start = match subtree {
            Some(path) => identifier(path),
            None => self.root_id.clone(),
        };
        let stack = if self.nodes.contains_key(&start) {
            vec![start]
        } else {
            Vec::new()
        };
        Leaves { tree: self, stack }
    }

    /// Directory nodes below the root, deepest first.
    pub fn directories_bottom_up(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self
            .nodes
            .values()
            .filter(|node| !node.is_leaf() && node.parent.is_some())
            .map(|node| PathBuf::from(&node.identifier))
            .collect();
        dirs.sort_by(|a, b| {
            b.components()
                .count()
                .cmp(&a.components().count())
                .then_with(|| a.cmp(b))
        });
        dirs
    }

    /// Reject builds that would publish nothing new.
    ///
    /// Only meaningful for `make`: the new version must be strictly newer than
    /// the one on disk, and a version made only of duplicates covering exactly
    /// the files of the latest version is refused.
    pub fn check_uniqueness(&self) -> Result<()> {
        if self.command != Command::Make {
            return Ok(());
        }
        for state in self.datasets.values() {
            let Some(latest) = &state.latest_version else {
                continue;
            };
            if state.upgrade_version == *latest {
                return Err(DrsError::DuplicatedDataset {
                    dataset: state.key.to_string(),
                    version: latest.to_string(),
                });
            }
            if state.upgrade_version < *latest {
                return Err(DrsError::OlderUpgrade {
                    upgrade: state.upgrade_version.to_string(),
                    latest: latest.to_string(),
                });
            }
            if state.files.is_empty() || !state.files.iter().all(|f| f.is_duplicate) {
                continue;
            }
            let incoming: BTreeSet<String> =
                state.files.iter().filter_map(FileRecord::file_name).collect();
            let published = DatasetLayout::new(&state.dataset_dir).version_entries(latest)?;
            if incoming == published {
                return Err(DrsError::DuplicatedDataset {
                    dataset: state.key.to_string(),
                    version: latest.to_string(),
                });
            }
        }
        Ok(())
    }
}

fn leaf_label(operation: &MigrationOperation) -> String {
    let name = operation
        .target()
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    match operation {
        MigrationOperation::Place {
            mode: MigrationMode::Symlink,
            source: Some(target),
            ..
        } => format!("{}{}{}", name, DrsLayout::LINK_SEPARATOR, target.display()),
        _ => name,
    }
}

/// Lazy depth-first iterator over leaf nodes.
pub struct Leaves<'a> {
    tree: &'a DrsTree,
    stack: Vec<String>,
}

impl<'a> Iterator for Leaves<'a> {
    type Item = &'a DrsNode;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.stack.pop() {
            let Some(node) = self.tree.nodes.get(&id) else {
                continue;
            };
            self.stack.extend(node.children.iter().rev().cloned());
            if node.is_leaf() {
                return Some(node);
            }
        }
        None
    }
}

/// Process-wide handle on the tree, shared by the worker pool.
#[derive(Debug, Clone)]
pub struct DatasetIndex {
    inner: Arc<Mutex<DrsTree>>,
}

impl DatasetIndex {
    pub fn new(tree: DrsTree) -> Self {
        Self {
            inner: Arc::new(Mutex::new(tree)),
        }
    }

    /// Run `f` with exclusive access to the tree.
    pub fn with_tree<R>(&self, f: impl FnOnce(&mut DrsTree) -> R) -> Result<R> {
        let mut tree = self
            .inner
            .lock()
            .map_err(|_| DrsError::Other("dataset index lock poisoned".to_string()))?;
        Ok(f(&mut tree))
    }

    /// Take the tree back once every worker is done.
    pub fn into_tree(self) -> Result<DrsTree> {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => mutex
                .into_inner()
                .map_err(|_| DrsError::Other("dataset index lock poisoned".to_string())),
            Err(shared) => shared
                .lock()
                .map(|tree| tree.clone())
                .map_err(|_| DrsError::Other("dataset index lock poisoned".to_string())),
        }
    }
}
