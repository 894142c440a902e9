//! Sequential execution of planned stages.

use super::planner::{Plan, PlanOptions, Planner};
use super::staleness::{StaleReason, StalenessEvaluator};
use super::DependencyGraph;
use crate::core::{FailureReason, StageOutcome};
use crate::errors::{ConfigError, MissingInput, StagelockError};
use crate::events::{EventSink, NoOpEventSink};
use crate::registry::{LockedStage, StageDefinition, StageRegistry};
use crate::stages::CommandLauncher;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// When staleness is decided relative to execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStrategy {
    /// Plan the whole pipeline first, then execute the plan.
    #[default]
    Preemptive,
    /// Decide each stage's staleness just before it would run.
    Interleaved,
}

/// What happened to one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    /// The stage name.
    pub stage: String,
    /// The outcome.
    pub outcome: StageOutcome,
    /// Why the stage was stale; empty for up-to-date stages.
    pub reasons: Vec<StaleReason>,
    /// Command wall time in milliseconds; zero when the command did not run.
    pub duration_ms: f64,
}

/// Result of a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Reports for every selected stage, in execution order.
    pub reports: Vec<StageReport>,
    /// Total run time in milliseconds.
    pub duration_ms: f64,
}

impl RunResult {
    /// Returns the failed stage's report, if any stage failed.
    #[must_use]
    pub fn failure(&self) -> Option<&StageReport> {
        self.reports.iter().find(|r| r.outcome.is_failure())
    }

    /// Returns true if no stage failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure().is_none()
    }

    /// Names of the stages whose commands ran successfully.
    #[must_use]
    pub fn succeeded(&self) -> Vec<&str> {
        self.reports
            .iter()
            .filter(|r| r.outcome.is_success())
            .map(|r| r.stage.as_str())
            .collect()
    }

    /// Returns the outcome of `stage`, if it was selected.
    #[must_use]
    pub fn outcome(&self, stage: &str) -> Option<&StageOutcome> {
        self.reports.iter().find(|r| r.stage == stage).map(|r| &r.outcome)
    }

    /// Converts a failed run into the matching error.
    ///
    /// # Errors
    ///
    /// Returns a stage execution, contract violation or missing input error
    /// for the failed stage.
    pub fn into_result(self) -> Result<Self, StagelockError> {
        match self.failure() {
            Some(StageReport {
                stage,
                outcome: StageOutcome::Failed { reason },
                ..
            }) => Err(reason.clone().into_error(stage)),
            _ => Ok(self),
        }
    }
}

/// Executes stale stages one at a time and records their new state.
#[derive(Clone)]
pub struct Runner {
    launcher: Arc<dyn CommandLauncher>,
    event_sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("launcher", &self.launcher)
            .finish_non_exhaustive()
    }
}

impl Runner {
    /// Creates a runner that launches commands with `launcher`.
    #[must_use]
    pub fn new(launcher: Arc<dyn CommandLauncher>) -> Self {
        Self {
            launcher,
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Plans and executes with the given strategy.
    ///
    /// # Errors
    ///
    /// Returns planning errors (cycles, unknown targets, dependencies nothing
    /// produces) and I/O errors. Stage failures are reported in the result.
    pub async fn reproduce(
        &self,
        registry: &mut StageRegistry,
        options: &PlanOptions,
        strategy: RunStrategy,
    ) -> Result<RunResult, StagelockError> {
        match strategy {
            RunStrategy::Preemptive => {
                let plan = Planner::new(registry)?.plan(options)?;
                self.run(registry, &plan).await
            }
            RunStrategy::Interleaved => self.run_interleaved(registry, options).await,
        }
    }

    /// Executes the stale stages of `plan` in order.
    ///
    /// Halts at the first failure; later planned stages are reported as
    /// not attempted. The registry is persisted after every success.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be hashed or the lock cannot be
    /// written. Stage failures are reported in the result.
    pub async fn run(
        &self,
        registry: &mut StageRegistry,
        plan: &Plan,
    ) -> Result<RunResult, StagelockError> {
        let start = Instant::now();
        let mut evaluator = StalenessEvaluator::new(registry);
        let mut reports = Vec::with_capacity(plan.assessments().len());
        let mut halted = false;

        self.emit_started(plan.stage_names().len()).await;

        for assessment in plan.assessments() {
            if !assessment.is_stale() {
                reports.push(self.skip(&assessment.name).await);
                continue;
            }
            if halted {
                reports.push(not_attempted(&assessment.name, assessment.reasons.clone()));
                continue;
            }

            let stage = lookup_stage(registry, &assessment.name)?;
            let report = self
                .execute(registry, &mut evaluator, &stage, assessment.reasons.clone())
                .await?;
            halted = report.outcome.is_failure();
            reports.push(report);
        }

        let result = RunResult {
            reports,
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        };
        self.emit_finished(&result).await;
        Ok(result)
    }

    async fn run_interleaved(
        &self,
        registry: &mut StageRegistry,
        options: &PlanOptions,
    ) -> Result<RunResult, StagelockError> {
        let start = Instant::now();
        let (graph, selected): (DependencyGraph, _) = {
            let planner = Planner::new(registry)?;
            let selected = planner.select(options)?;
            (planner.graph().clone(), selected)
        };
        let mut evaluator = StalenessEvaluator::new(registry);
        let mut reran: HashSet<usize> = HashSet::new();
        let mut reports = Vec::with_capacity(selected.len());
        let mut halted = false;

        self.emit_started(selected.len()).await;

        for &index in graph.order().iter().filter(|i| selected.contains(i)) {
            let stage = registry.stages()[index].clone();

            if halted {
                reports.push(not_attempted(&stage.name, Vec::new()));
                continue;
            }

            let mut reasons = evaluator.direct_reasons(&stage, registry, &graph)?;
            reasons.extend(
                graph
                    .upstream(index)
                    .iter()
                    .filter(|u| reran.contains(u))
                    .map(|&u| StaleReason::Upstream {
                        stage: graph.name(u).to_string(),
                    }),
            );
            if options.force {
                reasons.insert(0, StaleReason::Forced);
            }

            if reasons.is_empty() {
                reports.push(self.skip(&stage.name).await);
                continue;
            }

            let report = self.execute(registry, &mut evaluator, &stage, reasons).await?;
            halted = report.outcome.is_failure();
            if !halted {
                reran.insert(index);
            }
            reports.push(report);
        }

        let result = RunResult {
            reports,
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        };
        self.emit_finished(&result).await;
        Ok(result)
    }

    /// Runs one stage and records its new state on success.
    async fn execute(
        &self,
        registry: &mut StageRegistry,
        evaluator: &mut StalenessEvaluator,
        stage: &StageDefinition,
        reasons: Vec<StaleReason>,
    ) -> Result<StageReport, StagelockError> {
        let reason_text: Vec<String> = reasons.iter().map(ToString::to_string).collect();
        info!(stage = %stage.name, reasons = ?reason_text, "Running stage");
        self.event_sink
            .emit(
                "stage.started",
                Some(serde_json::json!({
                    "stage": stage.name,
                    "cmd": stage.cmd,
                    "reasons": reason_text,
                })),
            )
            .await;

        let stage_start = Instant::now();
        let attempt = self.attempt(registry, evaluator, stage).await?;
        let duration_ms = stage_start.elapsed().as_secs_f64() * 1000.0;

        let outcome = match attempt {
            Ok(entry) => {
                registry.record(&stage.name, entry);
                registry.persist()?;
                info!(stage = %stage.name, duration_ms, "Stage succeeded");
                self.event_sink
                    .emit(
                        "stage.completed",
                        Some(serde_json::json!({
                            "stage": stage.name,
                            "duration_ms": duration_ms,
                        })),
                    )
                    .await;
                StageOutcome::Succeeded
            }
            Err(reason) => {
                error!(stage = %stage.name, reason = %reason, "Stage failed");
                self.event_sink
                    .emit(
                        "stage.failed",
                        Some(serde_json::json!({
                            "stage": stage.name,
                            "error": reason.to_string(),
                            "reason": reason,
                            "duration_ms": duration_ms,
                        })),
                    )
                    .await;
                StageOutcome::Failed { reason }
            }
        };

        Ok(StageReport {
            stage: stage.name.clone(),
            outcome,
            reasons,
            duration_ms,
        })
    }

    /// Fingerprints inputs, runs the command and fingerprints outputs.
    ///
    /// The outer error is for engine failures (unreadable files); the inner
    /// error is a stage failure.
    async fn attempt(
        &self,
        registry: &StageRegistry,
        evaluator: &mut StalenessEvaluator,
        stage: &StageDefinition,
    ) -> Result<Result<LockedStage, FailureReason>, StagelockError> {
        let mut entry = LockedStage::new(&stage.cmd);

        for dep in &stage.deps {
            match evaluator.fingerprint(dep)? {
                Some(fingerprint) => entry.deps.push(fingerprint),
                None => {
                    return Ok(Err(FailureReason::MissingInput {
                        input: MissingInput::Dependency { path: dep.clone() },
                    }))
                }
            }
        }

        for param in &stage.params {
            match evaluator.param(param)? {
                Some(value) => entry.set_param(param, value),
                None => {
                    return Ok(Err(FailureReason::MissingInput {
                        input: MissingInput::Parameter {
                            source: param.source.clone(),
                            key: param.key.clone(),
                        },
                    }))
                }
            }
        }

        let workdir = match &stage.wdir {
            Some(wdir) => registry.root().join(wdir),
            None => registry.root().to_path_buf(),
        };
        let executable = self.launcher.launch(stage);
        let status = match executable.run(&workdir).await {
            Ok(status) => status,
            Err(e) => {
                return Ok(Err(FailureReason::LaunchFailed {
                    message: e.to_string(),
                }))
            }
        };

        evaluator.invalidate_outputs(stage);

        if status.timed_out {
            return Ok(Err(FailureReason::TimedOut {
                timeout_secs: stage.timeout_secs.unwrap_or_default(),
            }));
        }
        if !status.is_success() {
            return Ok(Err(FailureReason::NonZeroExit {
                exit_code: status.code,
            }));
        }

        let mut missing_outputs = Vec::new();
        for out in &stage.outs {
            match evaluator.fingerprint(out)? {
                Some(fingerprint) => entry.outs.push(fingerprint),
                None => missing_outputs.push(out.clone()),
            }
        }
        if !missing_outputs.is_empty() {
            return Ok(Err(FailureReason::ContractViolation { missing_outputs }));
        }

        Ok(Ok(entry))
    }

    async fn skip(&self, stage: &str) -> StageReport {
        info!(stage = %stage, "Stage up to date");
        self.event_sink
            .emit(
                "stage.skipped",
                Some(serde_json::json!({
                    "stage": stage,
                    "reason": "up to date",
                })),
            )
            .await;
        StageReport {
            stage: stage.to_string(),
            outcome: StageOutcome::Skipped,
            reasons: Vec::new(),
            duration_ms: 0.0,
        }
    }

    async fn emit_started(&self, stages: usize) {
        self.event_sink
            .emit(
                "pipeline.started",
                Some(serde_json::json!({ "stages": stages })),
            )
            .await;
    }

    async fn emit_finished(&self, result: &RunResult) {
        if let Some(failed) = result.failure() {
            self.event_sink
                .emit(
                    "pipeline.failed",
                    Some(serde_json::json!({
                        "stage": failed.stage,
                        "error": failed.outcome.to_string(),
                        "duration_ms": result.duration_ms,
                    })),
                )
                .await;
        } else {
            info!(
                succeeded = result.succeeded().len(),
                duration_ms = result.duration_ms,
                "Pipeline up to date"
            );
            self.event_sink
                .emit(
                    "pipeline.completed",
                    Some(serde_json::json!({
                        "succeeded": result.succeeded(),
                        "duration_ms": result.duration_ms,
                    })),
                )
                .await;
        }
    }
}

fn not_attempted(stage: &str, reasons: Vec<StaleReason>) -> StageReport {
    StageReport {
        stage: stage.to_string(),
        outcome: StageOutcome::NotAttempted,
        reasons,
        duration_ms: 0.0,
    }
}

fn lookup_stage(registry: &StageRegistry, name: &str) -> Result<StageDefinition, StagelockError> {
    registry.definition().get(name).cloned().ok_or_else(|| {
        ConfigError::new(format!("planned stage '{name}' is not defined"))
            .with_stage(name)
            .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::HashAlgorithm;
    use crate::events::CollectingEventSink;
    use crate::registry::{LockFile, PipelineDefinition};
    use crate::testing::{ScriptedLauncher, Workspace};

    fn registry(ws: &Workspace, stages: Vec<StageDefinition>) -> StageRegistry {
        StageRegistry::from_parts(
            ws.root(),
            PipelineDefinition::new(stages).unwrap(),
            LockFile::empty(HashAlgorithm::Sha256),
            ws.root().join("pipeline.lock"),
        )
    }

    #[tokio::test]
    async fn test_success_records_and_persists() {
        let ws = Workspace::new();
        ws.write("raw.csv", "a\n1\n");
        ws.write("params.yaml", "split:\n  seed: 7\n");
        let mut reg = registry(
            &ws,
            vec![StageDefinition::new("split", "split")
                .with_deps(["raw.csv"])
                .with_param("params.yaml", "split.seed")
                .with_outs(["train.csv"])],
        );
        let launcher = ScriptedLauncher::new().writes("split", "train.csv", "a\n1\n");
        let sink = Arc::new(CollectingEventSink::new());
        let runner = Runner::new(Arc::new(launcher.clone())).with_event_sink(sink.clone());

        let result = runner
            .reproduce(&mut reg, &PlanOptions::default(), RunStrategy::Preemptive)
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.succeeded(), vec!["split"]);
        let entry = reg.recorded("split").unwrap();
        assert_eq!(entry.deps[0].path, "raw.csv");
        assert_eq!(entry.outs[0].path, "train.csv");
        assert!(ws.exists("pipeline.lock"));
        assert_eq!(
            sink.event_types(),
            vec!["pipeline.started", "stage.started", "stage.completed", "pipeline.completed"]
        );
    }

    #[tokio::test]
    async fn test_nonzero_exit_halts() {
        let ws = Workspace::new();
        ws.write("raw.csv", "a\n");
        let mut reg = registry(
            &ws,
            vec![
                StageDefinition::new("a", "a").with_deps(["raw.csv"]).with_outs(["a.out"]),
                StageDefinition::new("b", "b").with_deps(["a.out"]).with_outs(["b.out"]),
            ],
        );
        let launcher = ScriptedLauncher::new().exits("a", 2);
        let runner = Runner::new(Arc::new(launcher.clone()));

        let result = runner
            .reproduce(&mut reg, &PlanOptions::default(), RunStrategy::Preemptive)
            .await
            .unwrap();

        assert_eq!(
            result.outcome("a"),
            Some(&StageOutcome::Failed {
                reason: FailureReason::NonZeroExit { exit_code: Some(2) }
            })
        );
        assert_eq!(result.outcome("b"), Some(&StageOutcome::NotAttempted));
        assert_eq!(launcher.launched(), vec!["a"]);
        assert!(reg.recorded("a").is_none());

        let err = result.into_result().unwrap_err();
        assert!(matches!(err, StagelockError::StageExecution(_)));
        assert_eq!(err.stage(), Some("a"));
    }

    #[tokio::test]
    async fn test_missing_output_is_contract_violation() {
        let ws = Workspace::new();
        let mut reg = registry(
            &ws,
            vec![StageDefinition::new("train", "train").with_outs(["model.pkl", "metrics.json"])],
        );
        let launcher = ScriptedLauncher::new().writes("train", "model.pkl", "m");
        let result = Runner::new(Arc::new(launcher))
            .reproduce(&mut reg, &PlanOptions::default(), RunStrategy::Preemptive)
            .await
            .unwrap();

        assert_eq!(
            result.outcome("train"),
            Some(&StageOutcome::Failed {
                reason: FailureReason::ContractViolation {
                    missing_outputs: vec!["metrics.json".into()]
                }
            })
        );
        assert!(reg.recorded("train").is_none());
        assert!(matches!(
            result.into_result().unwrap_err(),
            StagelockError::ContractViolation(_)
        ));
    }

    #[tokio::test]
    async fn test_missing_param_fails_with_missing_input() {
        let ws = Workspace::new();
        ws.write("params.yaml", "split: {}\n");
        let mut reg = registry(
            &ws,
            vec![StageDefinition::new("split", "split")
                .with_param("params.yaml", "split.test_size")
                .with_outs(["train.csv"])],
        );
        let launcher = ScriptedLauncher::new().writes("split", "train.csv", "x");
        let result = Runner::new(Arc::new(launcher.clone()))
            .reproduce(&mut reg, &PlanOptions::default(), RunStrategy::Preemptive)
            .await
            .unwrap();

        assert!(launcher.launched().is_empty());
        assert!(matches!(
            result.into_result().unwrap_err(),
            StagelockError::MissingInput(_)
        ));
    }

    #[tokio::test]
    async fn test_launch_failure_and_timeout() {
        let ws = Workspace::new();
        let mut reg = registry(
            &ws,
            vec![StageDefinition::new("slow", "slow")
                .with_outs(["out.txt"])
                .with_timeout_secs(5)],
        );
        let launcher = ScriptedLauncher::new().times_out("slow");
        let result = Runner::new(Arc::new(launcher))
            .reproduce(&mut reg, &PlanOptions::default(), RunStrategy::Preemptive)
            .await
            .unwrap();
        assert_eq!(
            result.outcome("slow"),
            Some(&StageOutcome::Failed {
                reason: FailureReason::TimedOut { timeout_secs: 5 }
            })
        );

        let launcher = ScriptedLauncher::new().fails_to_launch("slow");
        let result = Runner::new(Arc::new(launcher))
            .reproduce(&mut reg, &PlanOptions::default(), RunStrategy::Preemptive)
            .await
            .unwrap();
        assert!(matches!(
            result.outcome("slow"),
            Some(StageOutcome::Failed {
                reason: FailureReason::LaunchFailed { .. }
            })
        ));
    }
}
