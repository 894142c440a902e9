//! Staleness evaluation: does a stage's recorded state still match the
//! current files, parameters and command?
//!
//! Evaluation never writes to disk or to the registry. Fingerprints and
//! parsed params files are memoised for the lifetime of the evaluator.

use super::DependencyGraph;
use crate::core::{format_value, FileRef, ParamRef, ParamValue};
use crate::errors::{IoError, MissingInputError, StagelockError};
use crate::hashing::{ContentHasher, FingerprintCache};
use crate::registry::{ParamsStore, StageDefinition, StageRegistry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use tracing::debug;

/// Why a stage must rerun.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StaleReason {
    /// No state has been recorded for the stage.
    NeverRun,
    /// The stage command differs from the recorded one.
    CommandChanged,
    /// A dependency does not exist (an upstream stage will produce it).
    DependencyMissing {
        /// The dependency path.
        path: String,
    },
    /// A dependency's content differs from the recorded content, or it was
    /// never recorded.
    DependencyChanged {
        /// The dependency path.
        path: String,
    },
    /// A recorded dependency is no longer declared.
    DependencyRemoved {
        /// The dependency path.
        path: String,
    },
    /// A parameter cannot be found in its source.
    ParamMissing {
        /// The parameter.
        param: ParamRef,
    },
    /// A parameter's value differs from the recorded value.
    ParamChanged {
        /// The parameter.
        param: ParamRef,
        /// The recorded value, if any.
        recorded: Option<String>,
        /// The current value.
        current: String,
    },
    /// A recorded parameter is no longer declared.
    ParamRemoved {
        /// The parameter.
        param: ParamRef,
    },
    /// An output does not exist.
    OutputMissing {
        /// The output path.
        path: String,
    },
    /// An output's content differs from the recorded content, or it was never
    /// recorded.
    OutputChanged {
        /// The output path.
        path: String,
    },
    /// A recorded output is no longer declared.
    OutputRemoved {
        /// The output path.
        path: String,
    },
    /// A stage producing one of this stage's dependencies is stale or reran.
    Upstream {
        /// The upstream stage.
        stage: String,
    },
    /// The caller asked for the stage to rerun.
    Forced,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NeverRun => write!(f, "never run"),
            Self::CommandChanged => write!(f, "command changed"),
            Self::DependencyMissing { path } => write!(f, "dependency missing: {path}"),
            Self::DependencyChanged { path } => write!(f, "dependency changed: {path}"),
            Self::DependencyRemoved { path } => write!(f, "dependency removed: {path}"),
            Self::ParamMissing { param } => write!(f, "param missing: {param}"),
            Self::ParamChanged {
                param,
                recorded: Some(recorded),
                current,
            } => write!(f, "param changed: {param} ({recorded} -> {current})"),
            Self::ParamChanged {
                param,
                recorded: None,
                current,
            } => write!(f, "param added: {param} = {current}"),
            Self::ParamRemoved { param } => write!(f, "param removed: {param}"),
            Self::OutputMissing { path } => write!(f, "output missing: {path}"),
            Self::OutputChanged { path } => write!(f, "output changed: {path}"),
            Self::OutputRemoved { path } => write!(f, "output removed: {path}"),
            Self::Upstream { stage } => write!(f, "upstream stage '{stage}' reruns"),
            Self::Forced => write!(f, "forced"),
        }
    }
}

/// Staleness of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageAssessment {
    /// The stage name.
    pub name: String,
    /// Why it must rerun; empty when up to date.
    pub reasons: Vec<StaleReason>,
}

impl StageAssessment {
    /// Returns true if the stage must rerun.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        !self.reasons.is_empty()
    }
}

/// Compares recorded stage state against the filesystem and params files.
#[derive(Debug)]
pub struct StalenessEvaluator {
    cache: FingerprintCache,
    params: ParamsStore,
}

impl StalenessEvaluator {
    /// Creates an evaluator for the registry's root and hash algorithm.
    #[must_use]
    pub fn new(registry: &StageRegistry) -> Self {
        let hasher = ContentHasher::new(registry.root(), registry.hash_algorithm())
            .with_excluded(registry.lock_path());
        Self {
            cache: FingerprintCache::new(hasher),
            params: ParamsStore::new(registry.root()),
        }
    }

    /// Returns the current fingerprint of `path`, or `None` if it is absent.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the path exists but cannot be read.
    pub fn fingerprint(&mut self, path: &str) -> Result<Option<FileRef>, IoError> {
        self.cache.get(path)
    }

    /// Returns the current value of `param`, or `None` if it is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the params file exists but cannot be parsed.
    pub fn param(&mut self, param: &ParamRef) -> Result<Option<ParamValue>, StagelockError> {
        self.params.lookup(param)
    }

    /// Forgets cached fingerprints for the stage's outputs, after it reran.
    pub fn invalidate_outputs(&mut self, stage: &StageDefinition) {
        for out in &stage.outs {
            self.cache.invalidate(out);
        }
    }

    /// Returns the reasons a stage is stale on its own, ignoring upstream
    /// stages.
    ///
    /// # Errors
    ///
    /// Returns a [`MissingInputError`] if a dependency is missing and no stage
    /// produces it, or an I/O/config error if files cannot be read.
    pub fn direct_reasons(
        &mut self,
        stage: &StageDefinition,
        registry: &StageRegistry,
        graph: &DependencyGraph,
    ) -> Result<Vec<StaleReason>, StagelockError> {
        let mut reasons = Vec::new();
        let recorded = registry.recorded(&stage.name);
        if recorded.is_none() {
            reasons.push(StaleReason::NeverRun);
        }

        if let Some(lock) = recorded {
            if lock.cmd != stage.cmd {
                reasons.push(StaleReason::CommandChanged);
            }
        }

        for dep in &stage.deps {
            let current = self.cache.get(dep)?;
            match (current, recorded) {
                (None, _) => {
                    if graph.producers_of(dep).is_empty() {
                        return Err(MissingInputError::dependency(&stage.name, dep).into());
                    }
                    reasons.push(StaleReason::DependencyMissing { path: dep.clone() });
                }
                (Some(current), Some(lock)) => {
                    if !lock.dep(dep).is_some_and(|r| r.same_content(&current)) {
                        reasons.push(StaleReason::DependencyChanged { path: dep.clone() });
                    }
                }
                (Some(_), None) => {}
            }
        }

        for param in &stage.params {
            let current = self.params.lookup(param)?;
            match (current, recorded) {
                (None, _) => reasons.push(StaleReason::ParamMissing { param: param.clone() }),
                (Some(current), Some(lock)) => {
                    let previous = lock.param(param);
                    if previous != Some(&current) {
                        reasons.push(StaleReason::ParamChanged {
                            param: param.clone(),
                            recorded: previous.map(format_value),
                            current: format_value(&current),
                        });
                    }
                }
                (Some(_), None) => {}
            }
        }

        for out in &stage.outs {
            let current = self.cache.get(out)?;
            match (current, recorded) {
                (None, _) => reasons.push(StaleReason::OutputMissing { path: out.clone() }),
                (Some(current), Some(lock)) => {
                    if !lock.out(out).is_some_and(|r| r.same_content(&current)) {
                        reasons.push(StaleReason::OutputChanged { path: out.clone() });
                    }
                }
                (Some(_), None) => {}
            }
        }

        if let Some(lock) = recorded {
            reasons.extend(
                lock.deps
                    .iter()
                    .filter(|d| !stage.deps.contains(&d.path))
                    .map(|d| StaleReason::DependencyRemoved { path: d.path.clone() }),
            );
            reasons.extend(
                lock.param_refs()
                    .into_iter()
                    .filter(|p| !stage.params.contains(p))
                    .map(|param| StaleReason::ParamRemoved { param }),
            );
            reasons.extend(
                lock.outs
                    .iter()
                    .filter(|o| !stage.outs.contains(&o.path))
                    .map(|o| StaleReason::OutputRemoved { path: o.path.clone() }),
            );
        }

        debug!(stage = %stage.name, reasons = reasons.len(), "evaluated");
        Ok(reasons)
    }

    /// Evaluates the `selected` stages in execution order, propagating
    /// staleness forward: a stage fed by a stale stage is stale too.
    ///
    /// `selected` must be closed under ancestors (see
    /// [`DependencyGraph::with_ancestors`]).
    ///
    /// # Errors
    ///
    /// Propagates the first error from [`Self::direct_reasons`].
    pub fn evaluate(
        &mut self,
        registry: &StageRegistry,
        graph: &DependencyGraph,
        selected: &BTreeSet<usize>,
    ) -> Result<Vec<StageAssessment>, StagelockError> {
        let stages = registry.stages();
        let mut stale: HashSet<usize> = HashSet::new();
        let mut assessments = Vec::with_capacity(selected.len());

        for &index in graph.order().iter().filter(|i| selected.contains(i)) {
            let stage = &stages[index];
            let mut reasons = self.direct_reasons(stage, registry, graph)?;
            reasons.extend(
                graph
                    .upstream(index)
                    .iter()
                    .filter(|u| stale.contains(u))
                    .map(|&u| StaleReason::Upstream {
                        stage: graph.name(u).to_string(),
                    }),
            );

            if !reasons.is_empty() {
                stale.insert(index);
            }
            assessments.push(StageAssessment {
                name: stage.name.clone(),
                reasons,
            });
        }

        Ok(assessments)
    }

    /// Returns true if `stage` must rerun, including upstream propagation.
    ///
    /// # Errors
    ///
    /// Propagates evaluation errors; unknown stage names are not stale.
    pub fn is_stale(
        &mut self,
        stage: &str,
        registry: &StageRegistry,
        graph: &DependencyGraph,
    ) -> Result<bool, StagelockError> {
        let Some(index) = graph.index_of(stage) else {
            return Ok(false);
        };
        let selected = graph.with_ancestors(&[index]);
        Ok(self
            .evaluate(registry, graph, &selected)?
            .iter()
            .any(|a| a.name == stage && a.is_stale()))
    }
}
