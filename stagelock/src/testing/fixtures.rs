//! Temporary pipeline workspaces.

use std::fs;
use std::path::Path;

use crate::config::EngineConfig;
use crate::registry::StageRegistry;

/// A temporary directory acting as a pipeline root.
///
/// The directory is removed when the workspace is dropped.
#[derive(Debug)]
pub struct Workspace {
    dir: tempfile::TempDir,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Workspace {
    /// Creates an empty workspace.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp workspace"),
        }
    }

    /// Returns the workspace root.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Writes a file, creating parent directories.
    pub fn write(&self, path: &str, contents: &str) {
        let target = self.root().join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(target, contents).expect("write workspace file");
    }

    /// Reads a file.
    #[must_use]
    pub fn read(&self, path: &str) -> String {
        fs::read_to_string(self.root().join(path)).expect("read workspace file")
    }

    /// Returns true if `path` exists.
    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        self.root().join(path).exists()
    }

    /// Removes a file.
    pub fn remove(&self, path: &str) {
        fs::remove_file(self.root().join(path)).expect("remove workspace file");
    }

    /// Returns the default configuration rooted here.
    #[must_use]
    pub fn config(&self) -> EngineConfig {
        EngineConfig::new(self.root())
    }

    /// Loads the registry from `pipeline.yaml` and `pipeline.lock`.
    #[must_use]
    pub fn registry(&self) -> StageRegistry {
        StageRegistry::load(&self.config()).expect("load registry")
    }
}
