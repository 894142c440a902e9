//! Stage command execution.
//!
//! Stage commands are opaque to the engine. The runner only needs to start
//! one in a working directory and learn how it ended, so commands are
//! modelled as an [`Executable`] capability built from the stage definition
//! by a [`CommandLauncher`].

use crate::registry::StageDefinition;
use async_trait::async_trait;
use std::fmt::Debug;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, warn};

/// How an external command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus {
    /// Exit code, absent when the process was terminated by a signal.
    pub code: Option<i32>,
    /// Whether the process was killed for exceeding its timeout.
    pub timed_out: bool,
}

impl CommandStatus {
    /// A zero exit status.
    #[must_use]
    pub fn success() -> Self {
        Self::exited(0)
    }

    /// A normal exit with `code`.
    #[must_use]
    pub fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            timed_out: false,
        }
    }

    /// A process killed after its timeout.
    #[must_use]
    pub fn timed_out() -> Self {
        Self {
            code: None,
            timed_out: true,
        }
    }

    /// Returns true for a zero exit code.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for CommandStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            timed_out: false,
        }
    }
}

/// Something that can be run to completion in a working directory.
#[async_trait]
pub trait Executable: Send + Sync + Debug {
    /// Returns a human-readable description of what runs.
    fn describe(&self) -> &str;

    /// Runs to completion.
    ///
    /// # Errors
    ///
    /// Returns an error only if the command could not be started or waited on;
    /// a nonzero exit is reported through the returned status.
    async fn run(&self, workdir: &Path) -> std::io::Result<CommandStatus>;
}

/// Builds executables from stage definitions.
pub trait CommandLauncher: Send + Sync + Debug {
    /// Returns the executable for `stage`.
    fn launch(&self, stage: &StageDefinition) -> Box<dyn Executable>;
}

/// A command line run through a shell (`<shell> -c <cmd>`).
#[derive(Debug, Clone)]
pub struct ShellCommand {
    shell: String,
    cmd: String,
    timeout: Option<Duration>,
    stdout_to_stderr: bool,
}

impl ShellCommand {
    /// Creates a shell command.
    #[must_use]
    pub fn new(shell: impl Into<String>, cmd: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            cmd: cmd.into(),
            timeout: None,
            stdout_to_stderr: false,
        }
    }

    /// Kills the command if it runs longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sends the command's stdout to this process's stderr.
    #[must_use]
    pub fn with_stdout_to_stderr(mut self) -> Self {
        self.stdout_to_stderr = true;
        self
    }
}

#[async_trait]
impl Executable for ShellCommand {
    fn describe(&self) -> &str {
        &self.cmd
    }

    async fn run(&self, workdir: &Path) -> std::io::Result<CommandStatus> {
        debug!(shell = %self.shell, cmd = %self.cmd, workdir = %workdir.display(), "spawning");

        let mut command = tokio::process::Command::new(&self.shell);
        command
            .arg("-c")
            .arg(&self.cmd)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if self.stdout_to_stderr {
            command.stdout(std::io::stderr());
        }
        let mut child = command.spawn()?;

        let Some(timeout) = self.timeout else {
            return Ok(child.wait().await?.into());
        };

        let waited = tokio::time::timeout(timeout, child.wait()).await;
        match waited {
            Ok(status) => Ok(status?.into()),
            Err(_) => {
                warn!(cmd = %self.cmd, timeout_secs = timeout.as_secs(), "Command timed out; killing");
                child.kill().await?;
                Ok(CommandStatus::timed_out())
            }
        }
    }
}

/// Launches every stage command through a shell.
#[derive(Debug, Clone)]
pub struct ShellLauncher {
    shell: String,
    stdout_to_stderr: bool,
}

impl ShellLauncher {
    /// Creates a launcher using `shell`.
    #[must_use]
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            stdout_to_stderr: false,
        }
    }

    /// Sends every stage's stdout to stderr, keeping stdout free for
    /// machine-readable output.
    #[must_use]
    pub fn with_stdout_to_stderr(mut self) -> Self {
        self.stdout_to_stderr = true;
        self
    }
}

impl Default for ShellLauncher {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl CommandLauncher for ShellLauncher {
    fn launch(&self, stage: &StageDefinition) -> Box<dyn Executable> {
        let mut command = ShellCommand::new(&self.shell, &stage.cmd);
        if let Some(secs) = stage.timeout_secs {
            command = command.with_timeout(Duration::from_secs(secs));
        }
        if self.stdout_to_stderr {
            command = command.with_stdout_to_stderr();
        }
        Box::new(command)
    }
}
