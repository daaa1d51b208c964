//! Dataset version tokens.
//!
//! A concrete version is `v` followed by digits and orders numerically.
//! `latest` is a pseudo-version that sorts above every concrete one and is
//! resolved against the filesystem per file name.

use crate::config::DrsLayout;
use crate::error::{DrsError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Version {
    Concrete(String),
    Latest,
}

impl Version {
    /// Parse a directory token (`v20250401` or `latest`).
    pub fn parse(token: &str) -> Result<Self> {
        if token == DrsLayout::LATEST_TOKEN {
            return Ok(Version::Latest);
        }
        match token.strip_prefix(DrsLayout::VERSION_DIR_PREFIX) {
            Some(digits) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
                Ok(Version::Concrete(digits.to_string()))
            }
            _ => Err(DrsError::InvalidVersion {
                token: token.to_string(),
            }),
        }
    }

    /// Parse a user-supplied version; the `v` prefix is optional.
    pub fn from_cli(value: &str) -> Result<Self> {
        if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(Version::Concrete(value.to_string()));
        }
        Self::parse(value)
    }

    /// Today's date as a version (`vYYYYMMDD`).
    pub fn today() -> Self {
        Version::Concrete(chrono::Local::now().format("%Y%m%d").to_string())
    }

    /// True for directory names of the form `v<digits>`.
    pub fn is_version_dir(name: &str) -> bool {
        matches!(Self::parse(name), Ok(Version::Concrete(_)))
    }

    pub fn is_latest(&self) -> bool {
        matches!(self, Version::Latest)
    }

    pub fn digits(&self) -> Option<&str> {
        match self {
            Version::Concrete(digits) => Some(digits),
            Version::Latest => None,
        }
    }

    /// Version directory name, `v<digits>`.
    pub fn dir_name(&self) -> String {
        self.to_string()
    }

    /// Data directory name, `d<digits>`. Fails for `latest`.
    pub fn data_dir_name(&self) -> Result<String> {
        match self {
            Version::Concrete(digits) => Ok(format!("{}{}", DrsLayout::DATA_DIR_PREFIX, digits)),
            Version::Latest => Err(DrsError::InvalidVersion {
                token: DrsLayout::LATEST_TOKEN.to_string(),
            }),
        }
    }
}

fn significant(digits: &str) -> &str {
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        "0"
    } else {
        trimmed
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Version::Latest, Version::Latest) => Ordering::Equal,
            (Version::Latest, _) => Ordering::Greater,
            (_, Version::Latest) => Ordering::Less,
            (Version::Concrete(a), Version::Concrete(b)) => {
                let (a, b) = (significant(a), significant(b));
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            }
        }
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Version::Concrete(digits) => significant(digits).hash(state),
            Version::Latest => DrsLayout::LATEST_TOKEN.hash(state),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Concrete(digits) => write!(f, "{}{}", DrsLayout::VERSION_DIR_PREFIX, digits),
            Version::Latest => f.write_str(DrsLayout::LATEST_TOKEN),
        }
    }
}

impl TryFrom<String> for Version {
    type Error = DrsError;

    fn try_from(value: String) -> Result<Self> {
        Version::parse(&value)
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(
            Version::parse("v20250401").unwrap(),
            Version::Concrete("20250401".into())
        );
        assert_eq!(Version::parse("latest").unwrap(), Version::Latest);
        assert!(Version::parse("20250401").is_err());
        assert!(Version::parse("v").is_err());
        assert!(Version::parse("v2025a").is_err());
        assert!(Version::parse("files").is_err());
    }

    #[test]
    fn test_from_cli_accepts_bare_digits() {
        assert_eq!(Version::from_cli("3").unwrap().dir_name(), "v3");
        assert_eq!(Version::from_cli("v3").unwrap().dir_name(), "v3");
        assert!(Version::from_cli("three").is_err());
    }

    #[test]
    fn test_numeric_ordering() {
        let v9 = Version::parse("v9").unwrap();
        let v10 = Version::parse("v10").unwrap();
        let v010 = Version::parse("v010").unwrap();
        assert!(v9 < v10);
        assert_eq!(v10.cmp(&v010), Ordering::Equal);
        assert!(v10 < Version::Latest);
    }

    #[test]
    fn test_dir_names() {
        let v = Version::parse("v20250401").unwrap();
        assert_eq!(v.dir_name(), "v20250401");
        assert_eq!(v.data_dir_name().unwrap(), "d20250401");
        assert!(Version::Latest.data_dir_name().is_err());
    }

    #[test]
    fn test_today_is_dated() {
        let today = Version::today();
        assert_eq!(today.digits().map(str::len), Some(8));
    }

    #[test]
    fn test_serde_as_string() {
        let v = Version::parse("v7").unwrap();
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"v7\"");
        let back: Version = serde_json::from_str("\"latest\"").unwrap();
        assert!(back.is_latest());
    }
}
