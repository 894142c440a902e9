//! # Stagelock
//!
//! A content-addressed reproducibility engine for file-based pipelines.
//!
//! A pipeline is a set of stages, each an external command with declared
//! input files, parameters and output files. Stagelock records the content
//! fingerprint of every input and output after a stage succeeds, and on the
//! next invocation reruns only the stages whose recorded state no longer
//! matches:
//!
//! - **Dependency graph**: derived from declared outputs and dependencies,
//!   topologically sorted, cycles rejected
//! - **Staleness**: command, dependency, parameter and output changes, plus
//!   forward propagation to downstream stages
//! - **Sequential runner**: halts on the first failure and persists the
//!   lockfile atomically after every successful stage
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagelock::prelude::*;
//! use std::sync::Arc;
//!
//! let config = EngineConfig::discover(".")?;
//! let mut registry = StageRegistry::load(&config)?;
//!
//! let plan = plan(&registry)?;
//! println!("{:?}", plan.stage_names());
//!
//! let runner = Runner::new(Arc::new(ShellLauncher::new(&config.shell)));
//! let result = runner
//!     .reproduce(&mut registry, &PlanOptions::default(), RunStrategy::Preemptive)
//!     .await?
//!     .into_result()?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cli;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod hashing;
pub mod pipeline;
pub mod registry;
pub mod stages;

#[cfg(test)]
mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::core::{
        FailureReason, FileRef, HashAlgorithm, ParamRef, ParamValue, StageOutcome,
    };
    pub use crate::errors::{
        ConfigError, ContractErrorInfo, ContractViolationError, CycleDetectedError, IoError,
        MissingInputError, StageExecutionError, StagelockError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::hashing::{ContentHasher, FingerprintCache};
    pub use crate::pipeline::{
        plan, DependencyGraph, Plan, PlanOptions, Planner, RunResult, RunStrategy, Runner,
        StageAssessment, StageReport, StaleReason,
    };
    pub use crate::registry::{LockFile, PipelineDefinition, StageDefinition, StageRegistry};
    pub use crate::stages::{CommandLauncher, Executable, ShellCommand, ShellLauncher};
}
