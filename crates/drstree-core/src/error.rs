//! Error types for the DRS tree builder.
//!
//! Errors fall into the categories the orchestrator reacts to: per-file
//! resolution failures are counted and skipped, planning, permission and
//! link-feasibility failures abort the action before any mutation, and
//! execution failures are reported per leaf without rollback.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the DRS tree builder.
#[derive(Debug, Error)]
pub enum DrsError {
    // Resolution errors
    #[error("Facet resolution failed for {path}: {message}")]
    Resolution { path: PathBuf, message: String },

    #[error("Checksum failed for {path} ({algorithm}): {message}")]
    ChecksumFailed {
        path: PathBuf,
        algorithm: String,
        message: String,
    },

    // Planning errors
    #[error("Dataset already exists: {dataset} (version {version})")]
    DuplicatedDataset { dataset: String, version: String },

    #[error("Upgrade version {upgrade} is older than latest version {latest}")]
    OlderUpgrade { upgrade: String, latest: String },

    #[error("No version pattern found in directory format {format:?}")]
    NoVersionPattern { format: String },

    #[error("Invalid version token: {token}")]
    InvalidVersion { token: String },

    #[error("Version {version} not found for dataset {dataset}")]
    VersionNotFound { dataset: String, version: String },

    #[error("{path} is a whole-directory latest symlink; per-file latest links are required")]
    LegacyLatest { path: PathBuf },

    // Permission errors
    #[error("Read permission required for user {user} on {path}")]
    ReadAccessDenied { user: String, path: PathBuf },

    #[error("Write permission required for user {user} on {path}")]
    WriteAccessDenied { user: String, path: PathBuf },

    // Link feasibility errors
    #[error("Migration on cross-device disallowed: {src} -> {dst} ({mode})")]
    CrossMigrationDenied {
        src: PathBuf,
        dst: PathBuf,
        mode: String,
    },

    #[error("Migration disallowed: {src} -> {dst} ({mode}): {reason}")]
    MigrationDenied {
        src: PathBuf,
        dst: PathBuf,
        mode: String,
        reason: String,
    },

    // Execution errors
    #[error("Failed to execute `{command}`: {message}")]
    Execution {
        command: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid checksum type: {0}")]
    InvalidChecksumType(String),

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for DRS operations.
pub type Result<T> = std::result::Result<T, DrsError>;

/// How the orchestrator treats an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Per-file failure, counted and skipped.
    Resolution,
    /// Structural contradiction found while planning.
    Planning,
    /// Access denied on a source or destination.
    Permission,
    /// Hardlink migration impossible on this filesystem layout.
    LinkFeasibility,
    /// I/O failure while performing a scheduled mutation.
    Execution,
    /// Anything else (configuration, cache, serialization).
    Internal,
}

impl From<std::io::Error> for DrsError {
    fn from(err: std::io::Error) -> Self {
        DrsError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for DrsError {
    fn from(err: serde_json::Error) -> Self {
        DrsError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<regex::Error> for DrsError {
    fn from(err: regex::Error) -> Self {
        DrsError::Config {
            message: format!("invalid regular expression: {}", err),
        }
    }
}

impl DrsError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        DrsError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a per-file resolution error.
    pub fn resolution(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        DrsError::Resolution {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an execution error for a rendered shell command.
    pub fn execution(command: impl Into<String>, err: std::io::Error) -> Self {
        DrsError::Execution {
            command: command.into(),
            message: err.to_string(),
            source: Some(err),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            DrsError::Resolution { .. } | DrsError::ChecksumFailed { .. } => {
                ErrorCategory::Resolution
            }

            DrsError::DuplicatedDataset { .. }
            | DrsError::OlderUpgrade { .. }
            | DrsError::NoVersionPattern { .. }
            | DrsError::InvalidVersion { .. }
            | DrsError::VersionNotFound { .. }
            | DrsError::LegacyLatest { .. } => ErrorCategory::Planning,

            DrsError::ReadAccessDenied { .. } | DrsError::WriteAccessDenied { .. } => {
                ErrorCategory::Permission
            }

            DrsError::CrossMigrationDenied { .. } | DrsError::MigrationDenied { .. } => {
                ErrorCategory::LinkFeasibility
            }

            DrsError::Execution { .. } => ErrorCategory::Execution,

            _ => ErrorCategory::Internal,
        }
    }

    /// True when the error must stop the whole action before any mutation.
    pub fn aborts_action(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Planning | ErrorCategory::Permission | ErrorCategory::LinkFeasibility
        )
    }
}
