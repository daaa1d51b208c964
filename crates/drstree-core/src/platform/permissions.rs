//! Access checks used by the migration preflight.
//!
//! Checks ask the kernel (`access(2)`) on unix so that ACLs and effective ids
//! are honored. Elsewhere they fall back to the read-only flag.

use std::path::{Path, PathBuf};

/// True when the current user may read `path`.
pub fn can_read(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use nix::unistd::{access, AccessFlags};
        access(path, AccessFlags::R_OK).is_ok()
    }

    #[cfg(not(unix))]
    {
        std::fs::metadata(path).is_ok()
    }
}

/// True when the current user may write into `path`.
pub fn can_write(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use nix::unistd::{access, AccessFlags};
        access(path, AccessFlags::W_OK).is_ok()
    }

    #[cfg(not(unix))]
    {
        std::fs::metadata(path)
            .map(|m| !m.permissions().readonly())
            .unwrap_or(false)
    }
}

/// Closest ancestor of `path` (the path included) that exists on disk.
///
/// Relative paths that run out of components resolve to the current directory.
pub fn nearest_existing_ancestor(path: &Path) -> PathBuf {
    let mut current = Some(path);
    while let Some(candidate) = current {
        if candidate.as_os_str().is_empty() {
            break;
        }
        if candidate.symlink_metadata().is_ok() {
            return candidate.to_path_buf();
        }
        current = candidate.parent();
    }
    PathBuf::from(".")
}
