//! Duplicate detection against the previously published version.

use crate::drs::hashing::{checksum, ChecksumAlgorithm, ChecksumStore};
use crate::error::{DrsError, Result};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Outcome of a duplicate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    /// Digest of the incoming file, when one was computed.
    pub checksum: Option<String>,
}

/// Decides whether an incoming file is unchanged relative to a published one.
///
/// Without an algorithm, equal sizes count as a duplicate. That is weaker
/// than a content comparison and is reported as such at startup.
#[derive(Debug, Clone, Default)]
pub struct DuplicateResolver {
    algorithm: Option<ChecksumAlgorithm>,
    include_filename: bool,
    store: Arc<ChecksumStore>,
}

impl DuplicateResolver {
    pub fn new(algorithm: Option<ChecksumAlgorithm>) -> Self {
        Self {
            algorithm,
            include_filename: false,
            store: Arc::new(ChecksumStore::default()),
        }
    }

    pub fn with_filename_salt(mut self, include_filename: bool) -> Self {
        self.include_filename = include_filename;
        self
    }

    pub fn with_store(mut self, store: Arc<ChecksumStore>) -> Self {
        self.store = store;
        self
    }

    pub fn algorithm(&self) -> Option<ChecksumAlgorithm> {
        self.algorithm
    }

    /// True when `incoming` duplicates the same-named file in `version_dir`.
    pub fn check(&self, incoming: &Path, version_dir: Option<&Path>) -> Result<bool> {
        Ok(self.check_with_digest(incoming, version_dir)?.is_duplicate)
    }

    pub fn check_with_digest(
        &self,
        incoming: &Path,
        version_dir: Option<&Path>,
    ) -> Result<DuplicateCheck> {
        let not_duplicate = DuplicateCheck {
            is_duplicate: false,
            checksum: None,
        };
        let Some(version_dir) = version_dir else {
            return Ok(not_duplicate);
        };
        let Some(file_name) = incoming.file_name() else {
            return Ok(not_duplicate);
        };

        let published = match fs::canonicalize(version_dir.join(file_name)) {
            Ok(path) => path,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(not_duplicate),
            Err(e) => return Err(DrsError::io_with_path(e, version_dir.join(file_name))),
        };

        let incoming_size = fs::metadata(incoming)
            .map_err(|e| DrsError::io_with_path(e, incoming))?
            .len();
        let published_size = fs::metadata(&published)
            .map_err(|e| DrsError::io_with_path(e, &published))?
            .len();
        if incoming_size != published_size {
            return Ok(not_duplicate);
        }

        let Some(algorithm) = self.algorithm else {
            debug!(
                "{} matches {} by size only",
                incoming.display(),
                published.display()
            );
            return Ok(DuplicateCheck {
                is_duplicate: true,
                checksum: None,
            });
        };

        let incoming_digest = self
            .store
            .digest(incoming, algorithm, self.include_filename)?;
        let published_digest = checksum(&published, algorithm, self.include_filename)?;
        Ok(DuplicateCheck {
            is_duplicate: incoming_digest.eq_ignore_ascii_case(&published_digest),
            checksum: Some(incoming_digest),
        })
    }

    /// Digest of an incoming file, if checksumming is enabled.
    pub fn digest(&self, incoming: &Path) -> Result<Option<String>> {
        match self.algorithm {
            Some(algorithm) => Ok(Some(self.store.digest(
                incoming,
                algorithm,
                self.include_filename,
            )?)),
            None => Ok(None),
        }
    }
}
