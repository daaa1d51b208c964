//! DRS tree building: planning, the shared index and execution.

pub mod display;
pub mod duplicate;
pub mod executor;
pub mod facets;
pub mod hashing;
pub mod latest;
pub mod operation;
pub mod path_planner;
pub mod remover;
pub mod trace;
pub mod tree;
pub mod version;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use duplicate::{DuplicateCheck, DuplicateResolver};
pub use executor::MigrationExecutor;
pub use facets::{FacetResolver, ResolvedFacets, TemplateResolver};
pub use hashing::{checksum, ChecksumAlgorithm, ChecksumStore};
pub use latest::LatestRepairer;
pub use operation::{shell_quote, FilePlan, MigrationMode, MigrationOperation, OperationPlanner};
pub use path_planner::{DatasetKey, DatasetLayout, DrsPaths, PathPlanner};
pub use remover::VersionRemover;
pub use trace::TraceSink;
pub use tree::{DatasetBuildState, DatasetIndex, DatasetPlan, DrsNode, DrsTree, FileRecord};
pub use version::Version;

/// Sub-command: what the run does to the DRS tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Build a new version from incoming files.
    Make,
    /// Retire one version.
    Remove,
    /// Repair per-file `latest` links.
    Latest,
}

/// What to do with the planned tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    List,
    Tree,
    Todo,
    Upgrade,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Command::Make => "make",
            Command::Remove => "remove",
            Command::Latest => "latest",
        })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::List => "list",
            Action::Tree => "tree",
            Action::Todo => "todo",
            Action::Upgrade => "upgrade",
        })
    }
}
