//! Hash algorithms and file references.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The digest used to fingerprint tracked files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-256, 64 hex characters.
    #[default]
    Sha256,
    /// MD5, 32 hex characters.
    Md5,
}

impl HashAlgorithm {
    /// Returns the length of a hex digest produced by this algorithm.
    #[must_use]
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Md5 => 32,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::Md5 => write!(f, "md5"),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "md5" => Ok(Self::Md5),
            other => Err(format!("unknown hash algorithm '{other}' (expected sha256 or md5)")),
        }
    }
}

/// A recorded file: its path, content digest and size in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRef {
    /// Path relative to the pipeline root.
    pub path: String,
    /// Hex content digest.
    pub hash: String,
    /// Size in bytes (total size for directories).
    pub size: u64,
}

impl FileRef {
    /// Creates a new file reference.
    #[must_use]
    pub fn new(path: impl Into<String>, hash: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            hash: hash.into(),
            size,
        }
    }

    /// Returns true if both references describe the same bytes.
    ///
    /// Paths are ignored.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.hash == other.hash && self.size == other.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_algorithm_parse() {
        assert_eq!("sha256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!("MD5".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Md5);
        assert!("crc32".parse::<HashAlgorithm>().is_err());
    }

    #[test]
    fn test_hash_algorithm_serialize() {
        let json = serde_json::to_string(&HashAlgorithm::Md5).unwrap();
        assert_eq!(json, r#""md5""#);
        assert_eq!(HashAlgorithm::Sha256.to_string(), "sha256");
    }

    #[test]
    fn test_same_content_ignores_path() {
        let a = FileRef::new("data/train.csv", "abc", 3);
        let b = FileRef::new("backup/train.csv", "abc", 3);
        let c = FileRef::new("data/train.csv", "abd", 3);

        assert!(a.same_content(&b));
        assert!(!a.same_content(&c));
    }
}
