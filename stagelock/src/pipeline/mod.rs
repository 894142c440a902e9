//! Dependency graph, staleness, planning and execution.
//!
//! This module provides:
//! - The stage DAG derived from declared outputs and dependencies
//! - Staleness evaluation against the lockfile
//! - Plans (ordered stale stages)
//! - A sequential runner with preemptive and interleaved strategies

mod graph;
mod planner;
mod runner;
mod staleness;


pub use graph::DependencyGraph;
pub use planner::{plan, Plan, PlanOptions, Planner};
pub use runner::{RunResult, RunStrategy, Runner, StageReport};
pub use staleness::{StageAssessment, StaleReason, StalenessEvaluator};
