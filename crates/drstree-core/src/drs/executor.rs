//! Preflight and execution of planned operations.
//!
//! Every mutation is echoed to the trace sink as its shell equivalent before
//! it is performed. A dry run only echoes.

use crate::config::ScanConfig;
use crate::drs::operation::{shell_quote, MigrationMode, MigrationOperation};
use crate::drs::trace::TraceSink;
use crate::error::{DrsError, Result};
use crate::platform::{can_read, can_write, current_user, nearest_existing_ancestor};
use std::collections::HashSet;
use std::fs::{self, File, FileTimes};
use std::path::{Path, PathBuf};
use tracing::debug;

fn is_cross_device(err: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::EXDEV)
    }

    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

/// Copy a file and carry over its access and modification times.
fn copy_preserving(source: &Path, destination: &Path) -> std::io::Result<()> {
    fs::copy(source, destination)?;
    let metadata = fs::metadata(source)?;
    let times = FileTimes::new()
        .set_accessed(metadata.accessed()?)
        .set_modified(metadata.modified()?);
    File::options()
        .write(true)
        .open(destination)?
        .set_times(times)
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn make_symlink(_target: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "relative symlinks are only supported on unix",
    ))
}

/// Performs operations against the filesystem.
pub struct MigrationExecutor {
    root: PathBuf,
    sink: TraceSink,
    quiet: bool,
    dry_run: bool,
    user: String,
    known_dirs: HashSet<PathBuf>,
    probed: HashSet<(PathBuf, PathBuf)>,
}

impl MigrationExecutor {
    pub fn new(root: impl Into<PathBuf>, sink: TraceSink) -> Self {
        Self {
            root: root.into(),
            sink,
            quiet: false,
            dry_run: false,
            user: current_user(),
            known_dirs: HashSet::new(),
            probed: HashSet::new(),
        }
    }

    /// Perform mutations without echoing them.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Echo mutations without performing them.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn emit(&self, line: &str) -> Result<()> {
        if self.quiet && !self.dry_run {
            return Ok(());
        }
        self.sink.emit(line)
    }

    /// Check every operation before any of them runs.
    ///
    /// Permissions are checked for all operations first, then hardlink
    /// feasibility is probed. A dry run skips both.
    pub fn preflight<'a>(
        &mut self,
        operations: impl IntoIterator<Item = &'a MigrationOperation>,
    ) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        let operations: Vec<&MigrationOperation> = operations.into_iter().collect();
        for operation in &operations {
            self.check_permissions(operation)?;
        }
        for operation in &operations {
            if let MigrationOperation::Place {
                mode: MigrationMode::Hardlink,
                source: Some(source),
                destination,
            } = operation
            {
                self.check_link(source, destination)?;
            }
        }
        debug!("Preflight passed for {} operations", operations.len());
        Ok(())
    }

    fn require_write(&self, path: &Path) -> Result<()> {
        let anchor = nearest_existing_ancestor(path);
        if can_write(&anchor) {
            Ok(())
        } else {
            Err(DrsError::WriteAccessDenied {
                user: self.user.clone(),
                path: anchor,
            })
        }
    }

    fn check_permissions(&self, operation: &MigrationOperation) -> Result<()> {
        match operation {
            MigrationOperation::MakeDir { path } => self.require_write(path),
            MigrationOperation::Remove { path } => {
                self.require_write(path.parent().unwrap_or(Path::new(".")))
            }
            MigrationOperation::Place {
                mode,
                source,
                destination,
            } => {
                if let Some(source) = source.as_ref().filter(|_| *mode != MigrationMode::Symlink) {
                    if !can_read(source) {
                        return Err(DrsError::ReadAccessDenied {
                            user: self.user.clone(),
                            path: source.clone(),
                        });
                    }
                    if *mode == MigrationMode::Move {
                        self.require_write(source.parent().unwrap_or(Path::new(".")))?;
                    }
                }
                self.require_write(destination.parent().unwrap_or(Path::new(".")))
            }
        }
    }

    /// Hardlink a probe file from the source directory into the destination.
    fn check_link(&mut self, source: &Path, destination: &Path) -> Result<()> {
        let source_dir = source.parent().unwrap_or(Path::new(".")).to_path_buf();
        let anchor = nearest_existing_ancestor(destination.parent().unwrap_or(Path::new(".")));
        if !self.probed.insert((source_dir.clone(), anchor.clone())) {
            return Ok(());
        }

        let denied = |reason: String| DrsError::MigrationDenied {
            src: source.to_path_buf(),
            dst: destination.to_path_buf(),
            mode: MigrationMode::Hardlink.to_string(),
            reason,
        };

        let probe = tempfile::Builder::new()
            .prefix(ScanConfig::PROBE_FILE_PREFIX)
            .tempfile_in(&source_dir)
            .map_err(|e| denied(e.to_string()))?;
        let probe_name = probe
            .path()
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        let link = anchor.join(probe_name);

        match fs::hard_link(probe.path(), &link) {
            Ok(()) => {
                let _ = fs::remove_file(&link);
                Ok(())
            }
            Err(e) if is_cross_device(&e) => Err(DrsError::CrossMigrationDenied {
                src: source.to_path_buf(),
                dst: destination.to_path_buf(),
                mode: MigrationMode::Hardlink.to_string(),
            }),
            Err(e) => Err(denied(e.to_string())),
        }
    }

    /// Make `dir` exist, echoing `mkdir -p` the first time it is created.
    pub fn ensure_dir(&mut self, dir: &Path) -> Result<()> {
        if self.known_dirs.contains(dir) {
            return Ok(());
        }
        if !dir.is_dir() {
            let operation = MigrationOperation::make_dir(dir);
            self.emit(&operation.render())?;
            if !self.dry_run {
                fs::create_dir_all(dir).map_err(|e| DrsError::execution(operation.render(), e))?;
            }
        }
        self.known_dirs.insert(dir.to_path_buf());
        Ok(())
    }

    /// Carry out one operation.
    pub fn execute(&mut self, operation: &MigrationOperation) -> Result<()> {
        match operation {
            MigrationOperation::MakeDir { path } => self.ensure_dir(path),
            MigrationOperation::Remove { path } => self.remove(path),
            MigrationOperation::Place {
                source: None,
                destination,
                ..
            } => self.remove(destination),
            MigrationOperation::Place {
                mode,
                source: Some(source),
                destination,
            } => {
                if let Some(parent) = destination.parent() {
                    self.ensure_dir(parent)?;
                }
                if *mode == MigrationMode::Symlink {
                    self.clear_link(destination)?;
                }
                let command = operation.render();
                self.emit(&command)?;
                if self.dry_run {
                    return Ok(());
                }
                let result = match mode {
                    MigrationMode::Copy => copy_preserving(source, destination),
                    MigrationMode::Hardlink => fs::hard_link(source, destination),
                    MigrationMode::Symlink => make_symlink(source, destination),
                    MigrationMode::Move => match fs::rename(source, destination) {
                        Err(e) if is_cross_device(&e) => copy_preserving(source, destination)
                            .and_then(|()| fs::remove_file(source)),
                        other => other,
                    },
                };
                result.map_err(|e| DrsError::execution(command, e))
            }
        }
    }

    /// Unlink an existing symlink at `path`; a real file there is an error.
    fn clear_link(&mut self, path: &Path) -> Result<()> {
        let Ok(metadata) = path.symlink_metadata() else {
            return Ok(());
        };
        if !metadata.file_type().is_symlink() {
            return Err(DrsError::Execution {
                command: format!("ln -s ... {}", shell_quote(path)),
                message: "a regular file already exists at the link path".to_string(),
                source: None,
            });
        }
        self.remove(path)
    }

    fn remove(&mut self, path: &Path) -> Result<()> {
        let command = MigrationOperation::remove(path).render();
        self.emit(&command)?;
        if self.dry_run {
            return Ok(());
        }
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DrsError::execution(command, e)),
        }
    }

    /// Remove empty directories below the root, walking up from each candidate.
    pub fn prune_empty_dirs(&mut self, candidates: impl IntoIterator<Item = PathBuf>) -> Result<usize> {
        if self.dry_run {
            return Ok(0);
        }
        let mut candidates: Vec<PathBuf> = candidates.into_iter().collect();
        candidates.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));

        let mut removed = 0;
        for candidate in candidates {
            let mut current = Some(candidate.as_path());
            while let Some(dir) = current {
                if dir == self.root || !dir.starts_with(&self.root) {
                    break;
                }
                let is_empty = match fs::read_dir(dir) {
                    Ok(mut entries) => entries.next().is_none(),
                    Err(_) => false,
                };
                if !is_empty {
                    break;
                }
                let command = format!("rmdir {}", shell_quote(dir));
                self.emit(&command)?;
                fs::remove_dir(dir).map_err(|e| DrsError::execution(command, e))?;
                self.known_dirs.remove(dir);
                removed += 1;
                current = dir.parent();
            }
        }
        Ok(removed)
    }

    pub fn flush(&self) -> Result<()> {
        self.sink.flush()
    }
}
