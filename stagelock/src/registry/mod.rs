//! Stage registry: pipeline definitions, lockfile state and parameters.
//!
//! This module provides:
//! - The pipeline definition file and its validation
//! - The lockfile model with atomic persistence
//! - Parameter lookup in YAML params files
//! - The combined registry handed to the planner and runner

mod definition;
mod lock;
mod params;
mod store;

pub use definition::{normalize_path, path_within, PipelineDefinition, StageDefinition};
pub use lock::{is_lock_temp_file, LockFile, LockedStage, LOCK_SCHEMA};
pub use params::{lookup_key, ParamsStore};
pub use store::StageRegistry;
