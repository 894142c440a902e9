//! Engine configuration.
//!
//! Configuration is resolved in two layers: an optional `.stagelock.yaml`
//! at the pipeline root, then explicit overrides (typically CLI flags).

use crate::core::HashAlgorithm;
use crate::errors::{ConfigError, IoError, StagelockError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the optional per-project configuration file.
pub const CONFIG_FILE_NAME: &str = ".stagelock.yaml";

/// Configuration for loading, planning and running a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Pipeline root; every tracked path is relative to it.
    #[serde(skip)]
    pub root: PathBuf,
    /// Pipeline definition file, relative to the root.
    #[serde(default = "default_pipeline_file")]
    pub pipeline_file: String,
    /// Lockfile, relative to the root.
    #[serde(default = "default_lock_file")]
    pub lock_file: String,
    /// Default params source for bare parameter keys.
    #[serde(default = "default_params_file")]
    pub params_file: String,
    /// Digest used for fingerprints.
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,
    /// Shell used to run stage commands (`<shell> -c <cmd>`).
    #[serde(default = "default_shell")]
    pub shell: String,
}

fn default_pipeline_file() -> String {
    "pipeline.yaml".to_string()
}

fn default_lock_file() -> String {
    "pipeline.lock".to_string()
}

fn default_params_file() -> String {
    "params.yaml".to_string()
}

fn default_shell() -> String {
    "sh".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            pipeline_file: default_pipeline_file(),
            lock_file: default_lock_file(),
            params_file: default_params_file(),
            hash_algorithm: HashAlgorithm::default(),
            shell: default_shell(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Loads `<root>/.stagelock.yaml` if present, else returns defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn discover(root: impl Into<PathBuf>) -> Result<Self, StagelockError> {
        let root = root.into();
        let path = root.join(CONFIG_FILE_NAME);

        let mut config = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Self::default(),
            Ok(text) => serde_yaml::from_str::<Self>(&text).map_err(|e| {
                ConfigError::new(format!("invalid configuration: {e}")).with_file(&path)
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(IoError::new(&path, e).into()),
        };
        config.root = root;
        Ok(config)
    }

    /// Sets the pipeline definition file.
    #[must_use]
    pub fn with_pipeline_file(mut self, file: impl Into<String>) -> Self {
        self.pipeline_file = file.into();
        self
    }

    /// Sets the lockfile.
    #[must_use]
    pub fn with_lock_file(mut self, file: impl Into<String>) -> Self {
        self.lock_file = file.into();
        self
    }

    /// Sets the default params file.
    #[must_use]
    pub fn with_params_file(mut self, file: impl Into<String>) -> Self {
        self.params_file = file.into();
        self
    }

    /// Sets the hash algorithm.
    #[must_use]
    pub fn with_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    /// Sets the shell.
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Absolute-or-relative path of the pipeline definition.
    #[must_use]
    pub fn pipeline_path(&self) -> PathBuf {
        self.root.join(&self.pipeline_file)
    }

    /// Path of the lockfile.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(&self.lock_file)
    }

    /// Returns the pipeline root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}
