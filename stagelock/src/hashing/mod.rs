//! Content fingerprinting for tracked files and directories.
//!
//! Digests depend only on file bytes, never on metadata. Files are streamed
//! in fixed-size chunks. A directory's digest covers the sorted list of its
//! regular files together with each file's own digest. The lockfile and its
//! temporary siblings are left out of directory digests, since they are
//! rewritten after every stage.

use crate::core::{FileRef, HashAlgorithm};
use crate::errors::IoError;
use crate::registry::{is_lock_temp_file, path_within};
use md5::Md5;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

const CHUNK_SIZE: usize = 64 * 1024;

/// Computes content fingerprints relative to a pipeline root.
#[derive(Debug, Clone)]
pub struct ContentHasher {
    root: PathBuf,
    algorithm: HashAlgorithm,
    excluded: Vec<PathBuf>,
}

impl ContentHasher {
    /// Creates a hasher for paths under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, algorithm: HashAlgorithm) -> Self {
        Self {
            root: root.into(),
            algorithm,
            excluded: Vec::new(),
        }
    }

    /// Leaves the lockfile at `path` out of directory digests, together with
    /// the temporary files written next to it on persist.
    #[must_use]
    pub fn with_excluded(mut self, path: impl Into<PathBuf>) -> Self {
        self.excluded.push(path.into());
        self
    }

    /// Returns the configured algorithm.
    #[must_use]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Returns the pipeline root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fingerprints the file or directory at `path` (relative to the root).
    ///
    /// # Errors
    ///
    /// Returns an [`IoError`] if the path does not exist or cannot be read.
    pub fn fingerprint(&self, path: &str) -> Result<FileRef, IoError> {
        let full = self.root.join(path);
        let meta = fs::metadata(&full).map_err(|e| IoError::new(&full, e))?;

        let (hash, size) = if meta.is_dir() {
            self.hash_dir(&full)?
        } else {
            self.hash_file(&full)?
        };

        debug!(path = %path, hash = %hash, size, "fingerprinted");
        Ok(FileRef::new(path, hash, size))
    }

    fn hash_file(&self, path: &Path) -> Result<(String, u64), IoError> {
        let file = File::open(path).map_err(|e| IoError::new(path, e))?;
        match self.algorithm {
            HashAlgorithm::Sha256 => stream_digest::<Sha256>(file, path),
            HashAlgorithm::Md5 => stream_digest::<Md5>(file, path),
        }
    }

    fn hash_dir(&self, dir: &Path) -> Result<(String, u64), IoError> {
        let mut files = Vec::new();
        self.collect_files(dir, dir, &mut files)?;
        files.sort();

        let mut listing = String::new();
        let mut total = 0u64;
        for rel in &files {
            let (hash, size) = self.hash_file(&dir.join(rel))?;
            listing.push_str(rel);
            listing.push('\0');
            listing.push_str(&hash);
            listing.push('\n');
            total += size;
        }

        let (hash, _) = match self.algorithm {
            HashAlgorithm::Sha256 => stream_digest::<Sha256>(listing.as_bytes(), dir)?,
            HashAlgorithm::Md5 => stream_digest::<Md5>(listing.as_bytes(), dir)?,
        };
        Ok((hash, total))
    }

    /// Collects regular files below `dir` as `/`-separated paths relative to `base`.
    fn collect_files(&self, base: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), IoError> {
        let entries = fs::read_dir(dir).map_err(|e| IoError::new(dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| IoError::new(dir, e))?;
            let path = entry.path();
            if self.is_excluded(&path) {
                continue;
            }
            let meta = fs::metadata(&path).map_err(|e| IoError::new(&path, e))?;
            if meta.is_dir() {
                self.collect_files(base, &path, out)?;
            } else if meta.is_file() {
                let rel = path
                    .strip_prefix(base)
                    .unwrap_or(&path)
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(rel);
            }
        }
        Ok(())
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.excluded.iter().any(|excluded| {
            path == excluded
                || (path.parent() == excluded.parent()
                    && path.file_name().and_then(OsStr::to_str).is_some_and(is_lock_temp_file))
        })
    }
}

fn stream_digest<D: Digest>(mut reader: impl Read, path: &Path) -> Result<(String, u64), IoError> {
    let mut hasher = D::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut size = 0u64;

    loop {
        let n = reader.read(&mut buf).map_err(|e| IoError::new(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }

    Ok((hex::encode(hasher.finalize()), size))
}

/// Memoises fingerprints for one planning or run pass.
///
/// Missing paths are cached as `None`. Entries must be invalidated when a
/// stage rewrites its outputs.
#[derive(Debug)]
pub struct FingerprintCache {
    hasher: ContentHasher,
    entries: HashMap<String, Option<FileRef>>,
}

impl FingerprintCache {
    /// Creates an empty cache around `hasher`.
    #[must_use]
    pub fn new(hasher: ContentHasher) -> Self {
        Self {
            hasher,
            entries: HashMap::new(),
        }
    }

    /// Returns the wrapped hasher.
    #[must_use]
    pub fn hasher(&self) -> &ContentHasher {
        &self.hasher
    }

    /// Returns the fingerprint of `path`, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an [`IoError`] for failures other than a missing path.
    pub fn get(&mut self, path: &str) -> Result<Option<FileRef>, IoError> {
        if let Some(cached) = self.entries.get(path) {
            return Ok(cached.clone());
        }

        let result = match self.hasher.fingerprint(path) {
            Ok(file_ref) => Some(file_ref),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        self.entries.insert(path.to_string(), result.clone());
        Ok(result)
    }

    /// Drops cached entries for `path`, anything below it and any directory
    /// containing it.
    pub fn invalidate(&mut self, path: &str) {
        self.entries
            .retain(|cached, _| !path_within(cached, path) && !path_within(path, cached));
    }

    /// Drops every cached entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns the number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
