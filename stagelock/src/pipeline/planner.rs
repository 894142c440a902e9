//! Execution planning.

use super::staleness::{StageAssessment, StaleReason, StalenessEvaluator};
use super::DependencyGraph;
use crate::errors::{ConfigError, StagelockError};
use crate::registry::StageRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Options narrowing or widening a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanOptions {
    /// Treat every selected stage as stale.
    pub force: bool,
    /// Restrict the plan to these stages and their ancestors.
    pub targets: Vec<String>,
}

impl PlanOptions {
    /// Creates default options: every stage, nothing forced.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the force flag.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Adds a target stage.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.targets.push(target.into());
        self
    }

    /// Replaces the target stages.
    #[must_use]
    pub fn with_targets(mut self, targets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }
}

/// Ordered staleness report for the selected stages.
///
/// Stages appear in execution order; [`Plan::stale`] yields the ones that
/// must run, in the order they must run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    assessments: Vec<StageAssessment>,
}

impl Plan {
    /// Creates a plan from assessments already in execution order.
    #[must_use]
    pub fn from_assessments(assessments: Vec<StageAssessment>) -> Self {
        Self { assessments }
    }

    /// Every selected stage, stale or not.
    #[must_use]
    pub fn assessments(&self) -> &[StageAssessment] {
        &self.assessments
    }

    /// The stages that must run.
    pub fn stale(&self) -> impl Iterator<Item = &StageAssessment> {
        self.assessments.iter().filter(|a| a.is_stale())
    }

    /// Names of the stages that must run, in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stale().map(|a| a.name.as_str()).collect()
    }

    /// Returns true if nothing needs to run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stale().next().is_none()
    }

    /// Returns the assessment of `stage`, if it was selected.
    #[must_use]
    pub fn assessment(&self, stage: &str) -> Option<&StageAssessment> {
        self.assessments.iter().find(|a| a.name == stage)
    }
}

/// Builds plans from a registry.
#[derive(Debug)]
pub struct Planner<'a> {
    registry: &'a StageRegistry,
    graph: DependencyGraph,
}

impl<'a> Planner<'a> {
    /// Builds the dependency graph of the registry's pipeline.
    ///
    /// # Errors
    ///
    /// Returns a cycle error if the pipeline is not a DAG.
    pub fn new(registry: &'a StageRegistry) -> Result<Self, StagelockError> {
        let graph = DependencyGraph::build(registry.definition())?;
        Ok(Self { registry, graph })
    }

    /// The dependency graph.
    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Resolves targets to the set of stage indices to assess.
    ///
    /// # Errors
    ///
    /// Returns a config error naming the first unknown target.
    pub fn select(&self, options: &PlanOptions) -> Result<BTreeSet<usize>, StagelockError> {
        if options.targets.is_empty() {
            return Ok((0..self.graph.stage_count()).collect());
        }

        let roots = options
            .targets
            .iter()
            .map(|target| {
                self.graph.index_of(target).ok_or_else(|| {
                    ConfigError::new(format!("unknown stage '{target}'")).with_stage(target)
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.graph.with_ancestors(&roots))
    }

    /// Computes the plan.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown targets, dependencies that nothing
    /// produces, or unreadable files.
    pub fn plan(&self, options: &PlanOptions) -> Result<Plan, StagelockError> {
        let selected = self.select(options)?;
        let mut evaluator = StalenessEvaluator::new(self.registry);
        let mut assessments = evaluator.evaluate(self.registry, &self.graph, &selected)?;

        if options.force {
            for assessment in &mut assessments {
                assessment.reasons.insert(0, StaleReason::Forced);
            }
        }

        let plan = Plan::from_assessments(assessments);
        for assessment in plan.stale() {
            debug!(
                stage = %assessment.name,
                reasons = ?assessment.reasons.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "Stage is stale"
            );
        }
        info!(
            selected = selected.len(),
            stale = plan.stale().count(),
            "Computed plan"
        );
        Ok(plan)
    }
}

/// Computes the plan for every stage of the registry.
///
/// # Errors
///
/// See [`Planner::plan`].
pub fn plan(registry: &StageRegistry) -> Result<Plan, StagelockError> {
    Planner::new(registry)?.plan(&PlanOptions::default())
}
