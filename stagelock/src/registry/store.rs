//! The stage registry: definitions plus recorded lock state.

use super::{LockFile, LockedStage, PipelineDefinition, StageDefinition};
use crate::config::EngineConfig;
use crate::core::HashAlgorithm;
use crate::errors::StagelockError;
use std::path::{Path, PathBuf};
use tracing::info;

/// Declared stages together with their last-known-good state.
///
/// The registry is an explicit value: it is loaded once, passed by reference
/// to the planner, mutated only by the runner, and persisted after every
/// successful stage.
#[derive(Debug, Clone)]
pub struct StageRegistry {
    root: PathBuf,
    definition: PipelineDefinition,
    lock: LockFile,
    lock_path: PathBuf,
}

impl StageRegistry {
    /// Loads the definition and lockfile named by `config`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if either file is malformed, or an I/O
    /// error if the definition cannot be read.
    pub fn load(config: &EngineConfig) -> Result<Self, StagelockError> {
        let definition = PipelineDefinition::load(&config.pipeline_path(), &config.params_file)?;
        let lock = LockFile::load(&config.lock_path(), config.hash_algorithm)?;

        info!(
            stages = definition.len(),
            recorded = lock.stages.len(),
            "Loaded pipeline registry"
        );

        Ok(Self::from_parts(config.root.clone(), definition, lock, config.lock_path()))
    }

    /// Assembles a registry from already-loaded parts.
    #[must_use]
    pub fn from_parts(
        root: impl Into<PathBuf>,
        definition: PipelineDefinition,
        lock: LockFile,
        lock_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            root: root.into(),
            definition,
            lock,
            lock_path: lock_path.into(),
        }
    }

    /// Returns the pipeline root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the lockfile path.
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Returns the pipeline definition.
    #[must_use]
    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    /// Returns the stages in declaration order.
    #[must_use]
    pub fn stages(&self) -> &[StageDefinition] {
        self.definition.stages()
    }

    /// Returns the recorded lock.
    #[must_use]
    pub fn lock(&self) -> &LockFile {
        &self.lock
    }

    /// Returns the hash algorithm of the recorded state.
    #[must_use]
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.lock.hash
    }

    /// Returns the recorded state of a stage.
    #[must_use]
    pub fn recorded(&self, stage: &str) -> Option<&LockedStage> {
        self.lock.stages.get(stage)
    }

    /// Replaces the recorded state of a stage.
    pub fn record(&mut self, stage: impl Into<String>, entry: LockedStage) {
        self.lock.stages.insert(stage.into(), entry);
    }

    /// Writes the lock atomically, dropping entries for undeclared stages.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the lock cannot be written.
    pub fn persist(&mut self) -> Result<(), StagelockError> {
        let definition = &self.definition;
        self.lock
            .stages
            .retain(|name, _| definition.get(name).is_some());
        self.lock.persist(&self.lock_path)?;
        Ok(())
    }
}
