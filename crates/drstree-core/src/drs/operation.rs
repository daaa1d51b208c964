//! Migration operations and per-file planning.
//!
//! Every mutation is one [`MigrationOperation`]. Its [`render`] form is the
//! shell command printed to the trace, and must stay stable. Paths outside
//! the portable filename set are single-quoted so the trace can be replayed
//! by `sh`.
//!
//! [`render`]: MigrationOperation::render

use crate::drs::path_planner::DrsPaths;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Filesystem primitive used to bring a file into place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationMode {
    Copy,
    Move,
    Hardlink,
    Symlink,
}

impl MigrationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationMode::Copy => "copy",
            MigrationMode::Move => "move",
            MigrationMode::Hardlink => "hardlink",
            MigrationMode::Symlink => "symlink",
        }
    }

    /// Shell command equivalent.
    pub fn command(&self) -> &'static str {
        match self {
            MigrationMode::Copy => "cp",
            MigrationMode::Move => "mv",
            MigrationMode::Hardlink => "ln",
            MigrationMode::Symlink => "ln -s",
        }
    }
}

impl fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationMode {
    type Err = crate::error::DrsError;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s {
            "copy" => Ok(MigrationMode::Copy),
            "move" => Ok(MigrationMode::Move),
            "hardlink" | "link" => Ok(MigrationMode::Hardlink),
            "symlink" => Ok(MigrationMode::Symlink),
            other => Err(crate::error::DrsError::Config {
                message: format!("unknown migration mode {:?}", other),
            }),
        }
    }
}

/// One filesystem mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MigrationOperation {
    MakeDir {
        path: PathBuf,
    },
    /// Place `destination`. For symlinks `source` is the literal link target.
    Place {
        mode: MigrationMode,
        source: Option<PathBuf>,
        destination: PathBuf,
    },
    Remove {
        path: PathBuf,
    },
}

impl MigrationOperation {
    pub fn make_dir(path: impl Into<PathBuf>) -> Self {
        MigrationOperation::MakeDir { path: path.into() }
    }

    pub fn place(mode: MigrationMode, source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        MigrationOperation::Place {
            mode,
            source: Some(source.into()),
            destination: destination.into(),
        }
    }

    pub fn remove(path: impl Into<PathBuf>) -> Self {
        MigrationOperation::Remove { path: path.into() }
    }

    /// Path the operation creates or deletes.
    pub fn target(&self) -> &Path {
        match self {
            MigrationOperation::MakeDir { path } | MigrationOperation::Remove { path } => path,
            MigrationOperation::Place { destination, .. } => destination,
        }
    }

    /// File read by the operation, if any.
    pub fn source(&self) -> Option<&Path> {
        match self {
            MigrationOperation::Place { source, .. } => source.as_deref(),
            _ => None,
        }
    }

    /// Exact shell command equivalent.
    pub fn render(&self) -> String {
        match self {
            MigrationOperation::MakeDir { path } => format!("mkdir -p {}", shell_quote(path)),
            MigrationOperation::Place {
                mode,
                source: Some(source),
                destination,
            } => format!(
                "{} {} {}",
                mode.command(),
                shell_quote(source),
                shell_quote(destination)
            ),
            MigrationOperation::Place {
                destination, ..
            } => format!("rm -f {}", shell_quote(destination)),
            MigrationOperation::Remove { path } => format!("rm -f {}", shell_quote(path)),
        }
    }
}

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_./+=:,@%-".contains(c)
}

/// A path as one shell word: unchanged when every character is safe,
/// otherwise single-quoted with embedded quotes spelled `'\''`.
pub fn shell_quote(path: &Path) -> String {
    let text = path.to_string_lossy();
    if !text.is_empty() && text.chars().all(is_shell_safe) {
        return text.into_owned();
    }
    format!("'{}'", text.replace('\'', "'\\''"))
}

impl fmt::Display for MigrationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Planned operations for one incoming file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePlan {
    pub operations: Vec<MigrationOperation>,
    pub destination: PathBuf,
    pub is_duplicate: bool,
}

/// Turns one incoming file into its ordered operations.
#[derive(Debug, Clone, Copy)]
pub struct OperationPlanner {
    mode: MigrationMode,
    upgrade_from_latest: bool,
}

impl OperationPlanner {
    pub fn new(mode: MigrationMode, upgrade_from_latest: bool) -> Self {
        Self {
            mode,
            upgrade_from_latest,
        }
    }

    pub fn mode(&self) -> MigrationMode {
        self.mode
    }

    pub fn upgrade_from_latest(&self) -> bool {
        self.upgrade_from_latest
    }

    /// `is_newest`: the planned version is the newest one holding this file.
    pub fn plan(&self, source: &Path, paths: &DrsPaths, is_duplicate: bool, is_newest: bool) -> FilePlan {
        let destination = paths.data_file();
        if is_duplicate && self.upgrade_from_latest {
            return FilePlan {
                operations: Vec::new(),
                destination,
                is_duplicate,
            };
        }
        if is_duplicate && self.mode == MigrationMode::Move {
            return FilePlan {
                operations: vec![MigrationOperation::remove(source)],
                destination,
                is_duplicate,
            };
        }

        let mut operations = vec![
            MigrationOperation::make_dir(&paths.data_dir),
            MigrationOperation::place(self.mode, source, paths.data_file()),
            MigrationOperation::make_dir(&paths.version_dir),
            MigrationOperation::place(
                MigrationMode::Symlink,
                paths.version_link_target(),
                paths.version_file(),
            ),
        ];
        if is_newest {
            operations.push(MigrationOperation::make_dir(&paths.latest_dir));
            operations.push(MigrationOperation::place(
                MigrationMode::Symlink,
                paths.latest_link_target(),
                paths.latest_file(),
            ));
        }
        FilePlan {
            operations,
            destination,
            is_duplicate,
        }
    }
}
