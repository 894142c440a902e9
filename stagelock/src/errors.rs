//! Error types for the stagelock engine.
//!
//! Every failure the engine can report falls into one of five categories:
//! configuration problems found while loading, dependency cycles found while
//! planning, unresolvable inputs, failing stage commands, and stage commands
//! that exited cleanly without producing their declared outputs. File system
//! failures are reported separately with the offending path attached.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for stagelock operations.
#[derive(Debug, Error)]
pub enum StagelockError {
    /// The pipeline definition or lockfile is malformed.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The dependency graph contains a cycle.
    #[error("{0}")]
    Cycle(#[from] CycleDetectedError),

    /// A declared input cannot be resolved.
    #[error("{0}")]
    MissingInput(#[from] MissingInputError),

    /// A stage command failed.
    #[error("{0}")]
    StageExecution(#[from] StageExecutionError),

    /// A stage command succeeded but did not produce its declared outputs.
    #[error("{0}")]
    ContractViolation(#[from] ContractViolationError),

    /// A file could not be read or written.
    #[error("{0}")]
    Io(#[from] IoError),
}

impl StagelockError {
    /// Returns the stage this error is attributed to, if any.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Config(e) => e.stage.as_deref(),
            Self::Cycle(e) => e.cycle_path.first().map(String::as_str),
            Self::MissingInput(e) => Some(&e.stage),
            Self::StageExecution(e) => Some(&e.stage),
            Self::ContractViolation(e) => Some(&e.stage),
            Self::Io(_) => None,
        }
    }

    /// Returns structured diagnostics for this error.
    #[must_use]
    pub fn error_info(&self) -> ContractErrorInfo {
        match self {
            Self::Config(e) => e.error_info(),
            Self::Cycle(e) => e.error_info.clone(),
            Self::MissingInput(e) => e.error_info(),
            Self::StageExecution(e) => e.error_info(),
            Self::ContractViolation(e) => e.error_info(),
            Self::Io(e) => ContractErrorInfo::new("LOCK-006-IO", e.to_string())
                .with_context_entry("path", e.path.display().to_string()),
        }
    }
}

/// Metadata about an error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "LOCK-002-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a JSON object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Error raised when the pipeline definition or lockfile is malformed.
#[derive(Debug, Clone, Error)]
#[error("Configuration error{}: {message}", stage.as_ref().map(|s| format!(" in stage '{s}'")).unwrap_or_default())]
pub struct ConfigError {
    /// The error message.
    pub message: String,
    /// The stage the error was found in, if any.
    pub stage: Option<String>,
    /// The file the error was found in, if any.
    pub file: Option<PathBuf>,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stage: None,
            file: None,
        }
    }

    /// Attributes the error to a stage.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Attributes the error to a file.
    #[must_use]
    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    fn error_info(&self) -> ContractErrorInfo {
        let mut info = ContractErrorInfo::new("LOCK-001-CONFIG", self.message.clone())
            .with_fix_hint("Fix the pipeline definition; nothing was executed.");
        if let Some(ref stage) = self.stage {
            info = info.with_context_entry("stage", stage.clone());
        }
        if let Some(ref file) = self.file {
            info = info.with_context_entry("file", file.display().to_string());
        }
        info
    }
}

/// Error raised when a cycle is detected in the dependency graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle, first stage repeated at the end.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "LOCK-002-CYCLE",
            format!("Pipeline contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("A stage must not consume, directly or indirectly, its own outputs.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

/// Where a missing input was declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MissingInput {
    /// A dependency file that does not exist and has no producer.
    Dependency {
        /// The dependency path.
        path: String,
    },
    /// A parameter whose source file or key cannot be found.
    Parameter {
        /// The parameter source file.
        source: String,
        /// The dotted key path.
        key: String,
    },
}

impl std::fmt::Display for MissingInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dependency { path } => write!(f, "dependency '{path}' does not exist and no stage produces it"),
            Self::Parameter { source, key } => write!(f, "parameter '{key}' not found in '{source}'"),
        }
    }
}

/// Error raised when a declared input cannot be resolved.
#[derive(Debug, Clone, Error)]
#[error("Missing input for stage '{stage}': {input}")]
pub struct MissingInputError {
    /// The stage that declared the input.
    pub stage: String,
    /// The missing input.
    pub input: MissingInput,
}

impl MissingInputError {
    /// Creates a missing dependency error.
    #[must_use]
    pub fn dependency(stage: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            input: MissingInput::Dependency { path: path.into() },
        }
    }

    /// Creates a missing parameter error.
    #[must_use]
    pub fn parameter(
        stage: impl Into<String>,
        source: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            input: MissingInput::Parameter {
                source: source.into(),
                key: key.into(),
            },
        }
    }

    fn error_info(&self) -> ContractErrorInfo {
        ContractErrorInfo::new("LOCK-003-MISSING_INPUT", self.input.to_string())
            .with_fix_hint("Create the input, or declare a stage that produces it.")
            .with_context_entry("stage", self.stage.clone())
    }
}

/// Error raised when a stage command fails.
#[derive(Debug, Clone, Error)]
#[error("Stage '{stage}' failed: {reason}")]
pub struct StageExecutionError {
    /// The failing stage.
    pub stage: String,
    /// Why it failed.
    pub reason: String,
    /// Exit code of the process, if it exited normally.
    pub exit_code: Option<i32>,
}

impl StageExecutionError {
    /// Creates a new stage execution error.
    #[must_use]
    pub fn new(stage: impl Into<String>, reason: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self {
            stage: stage.into(),
            reason: reason.into(),
            exit_code,
        }
    }

    fn error_info(&self) -> ContractErrorInfo {
        let mut info = ContractErrorInfo::new("LOCK-004-EXEC", self.reason.clone())
            .with_fix_hint("Fix the stage command and run again; completed stages are not rerun.")
            .with_context_entry("stage", self.stage.clone());
        if let Some(code) = self.exit_code {
            info = info.with_context_entry("exit_code", code.to_string());
        }
        info
    }
}

/// Error raised when a stage exits successfully without writing its outputs.
#[derive(Debug, Clone, Error)]
#[error("Stage '{stage}' exited successfully but did not produce: {}", missing_outputs.join(", "))]
pub struct ContractViolationError {
    /// The offending stage.
    pub stage: String,
    /// Declared outputs absent after execution.
    pub missing_outputs: Vec<String>,
}

impl ContractViolationError {
    /// Creates a new contract violation error.
    #[must_use]
    pub fn new(stage: impl Into<String>, missing_outputs: Vec<String>) -> Self {
        Self {
            stage: stage.into(),
            missing_outputs,
        }
    }

    fn error_info(&self) -> ContractErrorInfo {
        ContractErrorInfo::new("LOCK-005-CONTRACT", self.to_string())
            .with_fix_hint("Make the command write every declared output, or remove the declaration.")
            .with_context_entry("stage", self.stage.clone())
    }
}

/// A file system error with the path that caused it.
#[derive(Debug, Error)]
#[error("I/O error on '{}': {source}", path.display())]
pub struct IoError {
    /// The path being accessed.
    pub path: PathBuf,
    /// The underlying error.
    #[source]
    pub source: std::io::Error,
}

impl IoError {
    /// Creates a new I/O error.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }

    /// Returns true if the path does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.source.kind() == std::io::ErrorKind::NotFound
    }
}
