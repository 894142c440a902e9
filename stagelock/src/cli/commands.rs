//! CLI command implementations.

use super::{Cli, Commands};
use crate::config::EngineConfig;
use crate::errors::StagelockError;
use crate::events::LoggingEventSink;
use crate::pipeline::{Plan, PlanOptions, Planner, RunResult, RunStrategy, Runner};
use crate::registry::StageRegistry;
use crate::stages::ShellLauncher;
use anyhow::Context;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::process::ExitCode;
use std::sync::Arc;

/// How a successfully executed command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Everything succeeded.
    Success,
    /// A stage failed during `run`.
    StageFailed,
}

/// Executes the parsed command and maps the outcome to a process exit code:
/// 0 success, 1 stage failure, 2 configuration error, 3 I/O error.
pub async fn run_command(cli: Cli) -> ExitCode {
    let json = cli.json;
    match execute(&cli).await {
        Ok(CommandOutcome::Success) => ExitCode::SUCCESS,
        Ok(CommandOutcome::StageFailed) => ExitCode::from(1),
        Err(err) => {
            report_error(&err, json);
            ExitCode::from(exit_code_for(&err))
        }
    }
}

/// Executes the parsed command, printing results on stdout.
///
/// # Errors
///
/// Returns configuration, planning and I/O errors. A failed stage during
/// `run` is reported through [`CommandOutcome::StageFailed`].
pub async fn execute(cli: &Cli) -> anyhow::Result<CommandOutcome> {
    let config = resolve_config(cli)?;
    let mut registry = StageRegistry::load(&config)
        .with_context(|| format!("failed to load pipeline at {}", config.root().display()))?;

    match &cli.command {
        Commands::Plan { targets, force } => {
            let options = PlanOptions::new().with_targets(targets.clone()).with_force(*force);
            let plan = Planner::new(&registry)?.plan(&options)?;
            print!("{}", render_plan(&plan, cli.json)?);
        }
        Commands::Status { targets } => {
            let options = PlanOptions::new().with_targets(targets.clone());
            let plan = Planner::new(&registry)?.plan(&options)?;
            print!("{}", render_status(&plan, &registry, cli.json)?);
        }
        Commands::Run {
            targets,
            force,
            interleaved,
        } => {
            let options = PlanOptions::new().with_targets(targets.clone()).with_force(*force);
            let strategy = if *interleaved {
                RunStrategy::Interleaved
            } else {
                RunStrategy::Preemptive
            };
            let mut launcher = ShellLauncher::new(&config.shell);
            if cli.json {
                launcher = launcher.with_stdout_to_stderr();
            }
            let runner = Runner::new(Arc::new(launcher))
                .with_event_sink(Arc::new(LoggingEventSink::debug()));
            let result = runner.reproduce(&mut registry, &options, strategy).await?;
            print!("{}", render_run(&result, cli.json)?);

            if let Err(err) = result.into_result() {
                if !cli.json {
                    report_error(&anyhow::Error::from(err), false);
                }
                return Ok(CommandOutcome::StageFailed);
            }
        }
        Commands::Graph => {
            let planner = Planner::new(&registry)?;
            print!("{}", render_graph(&planner, &registry, cli.json)?);
        }
    }

    Ok(CommandOutcome::Success)
}

/// Maps an error to the process exit code.
#[must_use]
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<StagelockError>() {
        Some(StagelockError::StageExecution(_) | StagelockError::ContractViolation(_)) => 1,
        Some(
            StagelockError::Config(_) | StagelockError::Cycle(_) | StagelockError::MissingInput(_),
        ) => 2,
        Some(StagelockError::Io(_)) | None => 3,
    }
}

fn resolve_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig::discover(&cli.directory)
        .with_context(|| format!("failed to read configuration in {}", cli.directory.display()))?;
    if let Some(pipeline) = &cli.pipeline {
        config = config.with_pipeline_file(pipeline);
    }
    if let Some(lock) = &cli.lock {
        config = config.with_lock_file(lock);
    }
    if let Some(params) = &cli.params {
        config = config.with_params_file(params);
    }
    if let Some(hash) = cli.hash {
        config = config.with_hash_algorithm(hash);
    }
    Ok(config)
}

fn report_error(err: &anyhow::Error, json: bool) {
    let info = err.downcast_ref::<StagelockError>().map(StagelockError::error_info);
    if json {
        let body = match &info {
            Some(info) => info.to_json(),
            None => serde_json::json!({ "summary": format!("{err:#}") }),
        };
        println!("{}", serde_json::json!({ "error": body }));
        return;
    }

    eprintln!("error: {err:#}");
    if let Some(hint) = info.and_then(|i| i.fix_hint) {
        eprintln!("hint: {hint}");
    }
}

fn render_json(value: &impl serde::Serialize) -> anyhow::Result<String> {
    Ok(format!("{}\n", serde_json::to_string_pretty(value)?))
}

/// Stage descriptions keyed by stage name, for stages that declare one.
fn descriptions(registry: &StageRegistry) -> BTreeMap<&str, &str> {
    registry
        .stages()
        .iter()
        .filter_map(|s| s.desc.as_deref().map(|desc| (s.name.as_str(), desc)))
        .collect()
}

fn render_plan(plan: &Plan, json: bool) -> anyhow::Result<String> {
    if json {
        let stale: Vec<_> = plan.stale().collect();
        return render_json(&serde_json::json!({ "stages": stale }));
    }

    if plan.is_empty() {
        return Ok("Pipeline is up to date.\n".to_string());
    }
    let mut out = String::from("Stages to run:\n");
    for (position, assessment) in plan.stale().enumerate() {
        let reasons: Vec<String> = assessment.reasons.iter().map(ToString::to_string).collect();
        writeln!(out, "  {}. {} ({})", position + 1, assessment.name, reasons.join("; "))?;
    }
    Ok(out)
}

fn render_status(plan: &Plan, registry: &StageRegistry, json: bool) -> anyhow::Result<String> {
    let descriptions = descriptions(registry);
    if json {
        return render_json(&serde_json::json!({
            "assessments": plan.assessments(),
            "descriptions": descriptions,
        }));
    }

    let mut out = String::new();
    for assessment in plan.assessments() {
        let state = if assessment.is_stale() { "stale" } else { "up to date" };
        match descriptions.get(assessment.name.as_str()) {
            Some(desc) => writeln!(out, "{}: {state} - {desc}", assessment.name)?,
            None => writeln!(out, "{}: {state}", assessment.name)?,
        }
        for reason in &assessment.reasons {
            writeln!(out, "    {reason}")?;
        }
    }
    Ok(out)
}

/// Renders a run. In JSON mode a failed stage's error is part of the same
/// document.
fn render_run(result: &RunResult, json: bool) -> anyhow::Result<String> {
    if json {
        let mut doc = serde_json::to_value(result)?;
        if let Err(err) = result.clone().into_result() {
            doc["error"] = err.error_info().to_json();
        }
        return render_json(&doc);
    }

    let mut out = String::new();
    for report in &result.reports {
        if report.outcome.is_success() || report.outcome.is_failure() {
            writeln!(out, "{}: {} ({:.0} ms)", report.stage, report.outcome, report.duration_ms)?;
        } else {
            writeln!(out, "{}: {}", report.stage, report.outcome)?;
        }
    }
    Ok(out)
}

fn render_graph(planner: &Planner<'_>, registry: &StageRegistry, json: bool) -> anyhow::Result<String> {
    let graph = planner.graph();
    let order = graph.execution_order();
    let edges = graph.edges();
    let descriptions = descriptions(registry);

    if json {
        return render_json(&serde_json::json!({
            "order": order,
            "edges": edges,
            "descriptions": descriptions,
        }));
    }

    let mut out = String::new();
    for (position, stage) in order.iter().enumerate() {
        match descriptions.get(stage) {
            Some(desc) => writeln!(out, "{}. {stage} - {desc}", position + 1)?,
            None => writeln!(out, "{}. {stage}", position + 1)?,
        }
    }
    if !edges.is_empty() {
        out.push('\n');
        for (producer, consumer) in edges {
            writeln!(out, "{producer} -> {consumer}")?;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ConfigError, IoError};
    use crate::testing::Workspace;
    use clap::Parser;

    fn cli(ws: &Workspace, args: &[&str]) -> Cli {
        let root = ws.root().display().to_string();
        let mut argv = vec!["stagelock", "-C", root.as_str()];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_exit_codes() {
        let config: anyhow::Error = StagelockError::from(ConfigError::new("bad")).into();
        assert_eq!(exit_code_for(&config), 2);

        let io: anyhow::Error = StagelockError::from(IoError::new(
            "pipeline.lock",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        ))
        .into();
        assert_eq!(exit_code_for(&io.context("while persisting")), 3);

        assert_eq!(exit_code_for(&anyhow::anyhow!("other")), 3);
    }

    #[tokio::test]
    async fn test_run_then_plan_is_empty() {
        let ws = Workspace::new();
        ws.write(
            "pipeline.yaml",
            "stages:\n  hello:\n    cmd: printf hello > hello.txt\n    outs: [hello.txt]\n",
        );

        assert_eq!(execute(&cli(&ws, &["run"])).await.unwrap(), CommandOutcome::Success);
        assert_eq!(ws.read("hello.txt"), "hello");

        let registry = ws.registry();
        assert!(crate::pipeline::plan(&registry).unwrap().is_empty());
        assert_eq!(execute(&cli(&ws, &["status", "--json"])).await.unwrap(), CommandOutcome::Success);
        assert_eq!(execute(&cli(&ws, &["graph"])).await.unwrap(), CommandOutcome::Success);
    }

    #[tokio::test]
    async fn test_stage_failure_status() {
        let ws = Workspace::new();
        ws.write("pipeline.yaml", "stages:\n  broken:\n    cmd: exit 1\n");
        assert_eq!(execute(&cli(&ws, &["run"])).await.unwrap(), CommandOutcome::StageFailed);
    }

    #[tokio::test]
    async fn test_json_run_failure_is_one_document() {
        let ws = Workspace::new();
        ws.write(
            "pipeline.yaml",
            "stages:\n  broken:\n    cmd: echo training; exit 4\n  after:\n    cmd: printf ok\n    deps: [x.txt]\n",
        );
        ws.write("x.txt", "x");
        let config = ws.config();
        let mut registry = StageRegistry::load(&config).unwrap();
        let result = Runner::new(Arc::new(ShellLauncher::default().with_stdout_to_stderr()))
            .reproduce(&mut registry, &PlanOptions::default(), RunStrategy::Preemptive)
            .await
            .unwrap();

        let rendered = render_run(&result, true).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(doc["reports"].as_array().unwrap().len(), 2);
        assert!(doc["error"]["code"].is_string());
        assert_eq!(doc["error"]["context"]["stage"], "broken");
        assert_eq!(doc["error"]["context"]["exit_code"], "4");

        assert!(render_run(&result, false).unwrap().starts_with("broken: "));
    }

    #[test]
    fn test_descriptions_in_status_and_graph() {
        let ws = Workspace::new();
        ws.write(
            "pipeline.yaml",
            "stages:\n  split:\n    desc: Split raw data\n    cmd: python split.py\n    outs: [train.csv]\n  train:\n    cmd: python train.py\n    deps: [train.csv]\n",
        );
        let registry = ws.registry();
        let planner = Planner::new(&registry).unwrap();

        let graph = render_graph(&planner, &registry, false).unwrap();
        assert_eq!(graph, "1. split - Split raw data\n2. train\n\nsplit -> train\n");

        let plan = planner.plan(&PlanOptions::default()).unwrap();
        let status = render_status(&plan, &registry, false).unwrap();
        assert!(status.starts_with("split: stale - Split raw data\n    never run\n"));
        assert!(status.contains("\ntrain: stale\n"));

        let doc: serde_json::Value =
            serde_json::from_str(&render_graph(&planner, &registry, true).unwrap()).unwrap();
        assert_eq!(doc["descriptions"]["split"], "Split raw data");
        assert!(doc["descriptions"].get("train").is_none());
    }

    #[tokio::test]
    async fn test_missing_pipeline_is_error() {
        let ws = Workspace::new();
        let err = execute(&cli(&ws, &["plan"])).await.unwrap_err();
        assert_eq!(exit_code_for(&err), 2);
    }
}
