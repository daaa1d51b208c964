//! Streaming checksums for incoming and published files.
//!
//! Plain algorithms render the digest as hex. Multihash algorithms prefix the
//! digest with `varint(code) ++ varint(len)` before hex encoding, so the
//! result names its own algorithm.

use crate::config::ScanConfig;
use crate::error::{DrsError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChecksumAlgorithm {
    Sha256,
    Sha512,
    Blake3,
    /// Multihash sha2-256 (code 0x12).
    #[serde(rename = "sha2-256")]
    MultihashSha256,
    /// Multihash sha2-512 (code 0x13).
    #[serde(rename = "sha2-512")]
    MultihashSha512,
    /// Multihash blake3 (code 0x1e).
    #[serde(rename = "blake3-multihash")]
    MultihashBlake3,
}

impl ChecksumAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha512 => "sha512",
            ChecksumAlgorithm::Blake3 => "blake3",
            ChecksumAlgorithm::MultihashSha256 => "sha2-256",
            ChecksumAlgorithm::MultihashSha512 => "sha2-512",
            ChecksumAlgorithm::MultihashBlake3 => "blake3-multihash",
        }
    }

    /// Multihash code, `None` for plain algorithms.
    pub fn multihash_code(&self) -> Option<u64> {
        match self {
            ChecksumAlgorithm::MultihashSha256 => Some(0x12),
            ChecksumAlgorithm::MultihashSha512 => Some(0x13),
            ChecksumAlgorithm::MultihashBlake3 => Some(0x1e),
            _ => None,
        }
    }

    /// Raw digest length in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            ChecksumAlgorithm::Sha256
            | ChecksumAlgorithm::Blake3
            | ChecksumAlgorithm::MultihashSha256
            | ChecksumAlgorithm::MultihashBlake3 => 32,
            ChecksumAlgorithm::Sha512 | ChecksumAlgorithm::MultihashSha512 => 64,
        }
    }

    fn prefix(&self) -> Vec<u8> {
        match self.multihash_code() {
            Some(code) => {
                let mut prefix = encode_varint(code);
                prefix.extend(encode_varint(self.digest_len() as u64));
                prefix
            }
            None => Vec::new(),
        }
    }

    /// True when `digest` has the shape this algorithm produces.
    pub fn is_valid_digest(&self, digest: &str) -> bool {
        let prefix = hex::encode(self.prefix());
        digest.len() == prefix.len() + self.digest_len() * 2
            && digest.bytes().all(|b| b.is_ascii_hexdigit())
            && digest[..prefix.len()].eq_ignore_ascii_case(&prefix)
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = DrsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "sha512" => Ok(ChecksumAlgorithm::Sha512),
            "blake3" => Ok(ChecksumAlgorithm::Blake3),
            "sha2-256" => Ok(ChecksumAlgorithm::MultihashSha256),
            "sha2-512" => Ok(ChecksumAlgorithm::MultihashSha512),
            "blake3-multihash" => Ok(ChecksumAlgorithm::MultihashBlake3),
            other => Err(DrsError::InvalidChecksumType(other.to_string())),
        }
    }
}

/// Unsigned LEB128, as used by multihash.
pub fn encode_varint(mut value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(2);
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

enum Hasher {
    Sha256(Sha256),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha256 | ChecksumAlgorithm::MultihashSha256 => {
                Hasher::Sha256(Sha256::new())
            }
            ChecksumAlgorithm::Sha512 | ChecksumAlgorithm::MultihashSha512 => {
                Hasher::Sha512(Sha512::new())
            }
            ChecksumAlgorithm::Blake3 | ChecksumAlgorithm::MultihashBlake3 => {
                Hasher::Blake3(Box::new(blake3::Hasher::new()))
            }
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
            Hasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Sha512(h) => h.finalize().to_vec(),
            Hasher::Blake3(h) => h.finalize().as_bytes().to_vec(),
        }
    }
}

/// Digest of a file's content, optionally salted with its file name.
pub fn checksum(
    path: impl AsRef<Path>,
    algorithm: ChecksumAlgorithm,
    include_filename: bool,
) -> Result<String> {
    let path = path.as_ref();
    let failed = |e: std::io::Error| DrsError::ChecksumFailed {
        path: path.to_path_buf(),
        algorithm: algorithm.to_string(),
        message: e.to_string(),
    };

    let mut file = std::fs::File::open(path).map_err(failed)?;
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; ScanConfig::HASH_CHUNK_SIZE];
    loop {
        let bytes_read = file.read(&mut buffer).map_err(failed)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    if include_filename {
        if let Some(name) = path.file_name() {
            hasher.update(name.to_string_lossy().as_bytes());
        }
    }

    let mut bytes = algorithm.prefix();
    bytes.extend(hasher.finalize());
    Ok(hex::encode(bytes))
}

/// Precomputed digests read from a `sha256sum`-style listing.
#[derive(Debug, Clone, Default)]
pub struct ChecksumStore {
    digests: HashMap<PathBuf, String>,
}

impl ChecksumStore {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| DrsError::io_with_path(e, path))?;
        let store = Self::parse(&contents);
        debug!(
            "Loaded {} precomputed checksums from {}",
            store.len(),
            path.display()
        );
        Ok(store)
    }

    /// Parse `<digest>  <path>` lines; `*` binary markers are accepted.
    pub fn parse(contents: &str) -> Self {
        let mut digests = HashMap::new();
        for line in contents.lines() {
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((digest, file)) = line.split_once(char::is_whitespace) else {
                warn!("Ignoring malformed checksum line: {}", line);
                continue;
            };
            let file = file.trim_start().trim_start_matches('*');
            let file = PathBuf::from(file);
            let key = file.canonicalize().unwrap_or(file);
            digests.insert(key, digest.to_string());
        }
        Self { digests }
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    /// Stored digest for `path` if it has the algorithm's shape.
    pub fn lookup(&self, path: &Path, algorithm: ChecksumAlgorithm) -> Option<&str> {
        let digest = self.digests.get(path).or_else(|| {
            path.canonicalize()
                .ok()
                .and_then(|canonical| self.digests.get(&canonical))
        })?;
        if algorithm.is_valid_digest(digest) {
            Some(digest.as_str())
        } else {
            warn!(
                "Stored checksum for {} is not a valid {} digest, recomputing",
                path.display(),
                algorithm
            );
            None
        }
    }

    /// Stored digest when usable, otherwise computed from the file.
    pub fn digest(
        &self,
        path: &Path,
        algorithm: ChecksumAlgorithm,
        include_filename: bool,
    ) -> Result<String> {
        match self.lookup(path, algorithm) {
            Some(digest) => Ok(digest.to_ascii_lowercase()),
            None => checksum(path, algorithm, include_filename),
        }
    }
}
