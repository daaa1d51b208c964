//! User identity and per-user scratch locations.

use crate::config::CacheConfig;
use std::path::PathBuf;

/// Name of the invoking user.
///
/// # Platform Behavior
/// - `$USER`, then `$LOGNAME`
/// - **Linux/macOS** fallback: the numeric uid
/// - **Windows** fallback: `$USERNAME`, else `"unknown"`
pub fn current_user() -> String {
    for var in ["USER", "LOGNAME"] {
        if let Ok(value) = std::env::var(var) {
            if !value.is_empty() {
                return value;
            }
        }
    }

    #[cfg(unix)]
    {
        nix::unistd::getuid().as_raw().to_string()
    }

    #[cfg(not(unix))]
    {
        std::env::var("USERNAME").unwrap_or_else(|_| "unknown".to_string())
    }
}

/// Scratch cache file for the invoking user: `<temp_dir>/DRSTree_<user>.json`.
pub fn scratch_cache_path() -> PathBuf {
    std::env::temp_dir().join(format!(
        "{}{}.{}",
        CacheConfig::SCRATCH_FILE_PREFIX,
        current_user(),
        CacheConfig::SCRATCH_FILE_EXTENSION
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_user_not_empty() {
        assert!(!current_user().is_empty());
    }

    #[test]
    fn test_scratch_cache_path() {
        let path = scratch_cache_path();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("DRSTree_"));
        assert!(name.ends_with(".json"));
        assert_eq!(path.parent().unwrap(), std::env::temp_dir());
    }
}
