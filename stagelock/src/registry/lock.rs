//! Lockfile: the last-known-good state of every stage.

use crate::core::{FileRef, HashAlgorithm, ParamRef, ParamValue};
use crate::errors::{ConfigError, IoError, StagelockError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// Current lockfile schema version.
pub const LOCK_SCHEMA: &str = "1";

const TEMP_PREFIX: &str = ".stagelock-";
const TEMP_SUFFIX: &str = ".tmp";

/// Returns true for the names of temporary files written while persisting.
#[must_use]
pub fn is_lock_temp_file(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)
}

/// Recorded state of one stage after its last successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedStage {
    /// Command that produced the recorded outputs.
    pub cmd: String,
    /// Dependencies as they were when the command ran.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<FileRef>,
    /// Parameter values, grouped by source file.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, BTreeMap<String, ParamValue>>,
    /// Outputs as written by the command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outs: Vec<FileRef>,
}

impl LockedStage {
    /// Creates an entry with only a command recorded.
    #[must_use]
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            deps: Vec::new(),
            params: BTreeMap::new(),
            outs: Vec::new(),
        }
    }

    /// Returns the recorded dependency at `path`.
    #[must_use]
    pub fn dep(&self, path: &str) -> Option<&FileRef> {
        self.deps.iter().find(|d| d.path == path)
    }

    /// Returns the recorded output at `path`.
    #[must_use]
    pub fn out(&self, path: &str) -> Option<&FileRef> {
        self.outs.iter().find(|o| o.path == path)
    }

    /// Returns the recorded value of a parameter.
    #[must_use]
    pub fn param(&self, param: &ParamRef) -> Option<&ParamValue> {
        self.params.get(&param.source)?.get(&param.key)
    }

    /// Records a parameter value.
    pub fn set_param(&mut self, param: &ParamRef, value: ParamValue) {
        self.params
            .entry(param.source.clone())
            .or_default()
            .insert(param.key.clone(), value);
    }

    /// Returns every recorded parameter reference.
    #[must_use]
    pub fn param_refs(&self) -> Vec<ParamRef> {
        self.params
            .iter()
            .flat_map(|(source, keys)| keys.keys().map(move |key| ParamRef::new(source.clone(), key.clone())))
            .collect()
    }
}

/// The persisted lock document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockFile {
    /// Schema version.
    pub schema: String,
    /// Digest used for every recorded hash.
    pub hash: HashAlgorithm,
    /// Recorded stages, keyed by name.
    #[serde(default)]
    pub stages: BTreeMap<String, LockedStage>,
}

impl LockFile {
    /// Creates an empty lock.
    #[must_use]
    pub fn empty(hash: HashAlgorithm) -> Self {
        Self {
            schema: LOCK_SCHEMA.to_string(),
            hash,
            stages: BTreeMap::new(),
        }
    }

    /// Parses a lock document.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for malformed documents or unknown schemas.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let lock: Self = serde_yaml::from_str(text)
            .map_err(|e| ConfigError::new(format!("invalid lockfile: {e}")))?;
        if lock.schema != LOCK_SCHEMA {
            return Err(ConfigError::new(format!(
                "unsupported lockfile schema '{}' (expected '{LOCK_SCHEMA}')",
                lock.schema
            )));
        }
        Ok(lock)
    }

    /// Loads the lock at `path`.
    ///
    /// A missing file is an empty lock. A lock recorded with a different hash
    /// algorithm is discarded, which makes every stage stale.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is malformed.
    pub fn load(path: &Path, algorithm: HashAlgorithm) -> Result<Self, StagelockError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no lockfile, starting empty");
                return Ok(Self::empty(algorithm));
            }
            Err(e) => return Err(IoError::new(path, e).into()),
        };

        if text.trim().is_empty() {
            return Ok(Self::empty(algorithm));
        }

        let lock = Self::parse(&text).map_err(|e| e.with_file(path))?;
        if lock.hash != algorithm {
            warn!(
                path = %path.display(),
                recorded = %lock.hash,
                configured = %algorithm,
                "Lockfile uses a different hash algorithm; discarding recorded state"
            );
            return Ok(Self::empty(algorithm));
        }
        Ok(lock)
    }

    /// Serialises the lock to YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Writes the lock to `path` atomically.
    ///
    /// The document is written to a temporary file in the same directory,
    /// synced, then renamed over `path`.
    ///
    /// # Errors
    ///
    /// Returns an [`IoError`] if any step fails; `path` is left untouched.
    pub fn persist(&self, path: &Path) -> Result<(), IoError> {
        let yaml = self
            .to_yaml()
            .map_err(|e| IoError::new(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(dir)
            .map_err(|e| IoError::new(dir, e))?;
        tmp.write_all(yaml.as_bytes())
            .map_err(|e| IoError::new(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| IoError::new(tmp.path(), e))?;
        tmp.persist(path).map_err(|e| IoError::new(path, e.error))?;

        debug!(path = %path.display(), stages = self.stages.len(), "lockfile persisted");
        Ok(())
    }
}
