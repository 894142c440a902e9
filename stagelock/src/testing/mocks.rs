//! Scripted command launchers for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::registry::StageDefinition;
use crate::stages::{CommandLauncher, CommandStatus, Executable};

/// One scripted step of a fake command.
#[derive(Debug, Clone)]
enum Action {
    Write { path: String, contents: String },
    Exit(i32),
    TimeOut,
    LaunchError,
}

/// A launcher whose commands follow a per-stage script instead of spawning
/// processes.
///
/// Stages without a script succeed without touching the filesystem. Clones
/// share the script and the launch record.
#[derive(Debug, Clone, Default)]
pub struct ScriptedLauncher {
    scripts: Arc<Mutex<HashMap<String, Vec<Action>>>>,
    launched: Arc<Mutex<Vec<String>>>,
}

impl ScriptedLauncher {
    /// Creates a launcher with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, stage: &str, action: Action) -> Self {
        self.scripts
            .lock()
            .entry(stage.to_string())
            .or_default()
            .push(action);
        self
    }

    /// The stage writes `contents` to `path`, relative to its working directory.
    #[must_use]
    pub fn writes(self, stage: &str, path: &str, contents: &str) -> Self {
        self.push(
            stage,
            Action::Write {
                path: path.to_string(),
                contents: contents.to_string(),
            },
        )
    }

    /// The stage exits with `code`.
    #[must_use]
    pub fn exits(self, stage: &str, code: i32) -> Self {
        self.push(stage, Action::Exit(code))
    }

    /// The stage is killed for exceeding its timeout.
    #[must_use]
    pub fn times_out(self, stage: &str) -> Self {
        self.push(stage, Action::TimeOut)
    }

    /// The stage's command cannot be started.
    #[must_use]
    pub fn fails_to_launch(self, stage: &str) -> Self {
        self.push(stage, Action::LaunchError)
    }

    /// Replaces the script of `stage` with a plain success.
    pub fn reset(&self, stage: &str) {
        self.scripts.lock().remove(stage);
    }

    /// Stages whose commands ran, in order.
    #[must_use]
    pub fn launched(&self) -> Vec<String> {
        self.launched.lock().clone()
    }

    /// Forgets the launch record.
    pub fn clear_launched(&self) {
        self.launched.lock().clear();
    }
}

impl CommandLauncher for ScriptedLauncher {
    fn launch(&self, stage: &StageDefinition) -> Box<dyn Executable> {
        Box::new(ScriptedCommand {
            stage: stage.name.clone(),
            cmd: stage.cmd.clone(),
            actions: self.scripts.lock().get(&stage.name).cloned().unwrap_or_default(),
            launched: Arc::clone(&self.launched),
        })
    }
}

#[derive(Debug)]
struct ScriptedCommand {
    stage: String,
    cmd: String,
    actions: Vec<Action>,
    launched: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Executable for ScriptedCommand {
    fn describe(&self) -> &str {
        &self.cmd
    }

    async fn run(&self, workdir: &Path) -> std::io::Result<CommandStatus> {
        if self.actions.iter().any(|a| matches!(a, Action::LaunchError)) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such command: {}", self.cmd),
            ));
        }
        self.launched.lock().push(self.stage.clone());

        for action in &self.actions {
            match action {
                Action::Write { path, contents } => {
                    let target = workdir.join(path);
                    if let Some(parent) = target.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(target, contents).await?;
                }
                Action::Exit(code) => return Ok(CommandStatus::exited(*code)),
                Action::TimeOut => return Ok(CommandStatus::timed_out()),
                Action::LaunchError => {}
            }
        }
        Ok(CommandStatus::success())
    }
}
