//! Pipeline definition: the declared stages, in declaration order.

use crate::core::ParamRef;
use crate::errors::{ConfigError, IoError, StagelockError};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Component, Path};

/// Static definition of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDefinition {
    /// Unique stage name.
    pub name: String,
    /// Command line, opaque to the engine.
    pub cmd: String,
    /// Working directory for the command, relative to the root.
    pub wdir: Option<String>,
    /// Declared dependency paths.
    pub deps: Vec<String>,
    /// Declared parameters.
    pub params: Vec<ParamRef>,
    /// Declared output paths.
    pub outs: Vec<String>,
    /// Kill the command after this many seconds.
    pub timeout_secs: Option<u64>,
    /// Free-form description.
    pub desc: Option<String>,
}

impl StageDefinition {
    /// Creates a stage with a command and nothing declared.
    #[must_use]
    pub fn new(name: impl Into<String>, cmd: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
            wdir: None,
            deps: Vec::new(),
            params: Vec::new(),
            outs: Vec::new(),
            timeout_secs: None,
            desc: None,
        }
    }

    /// Sets the dependencies.
    #[must_use]
    pub fn with_deps(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.deps = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the outputs.
    #[must_use]
    pub fn with_outs(mut self, outs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.outs = outs.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_param(mut self, source: impl Into<String>, key: impl Into<String>) -> Self {
        self.params.push(ParamRef::new(source, key));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_wdir(mut self, wdir: impl Into<String>) -> Self {
        self.wdir = Some(wdir.into());
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    fn normalize(mut self) -> Result<Self, ConfigError> {
        validate_name(&self.name)?;
        if self.cmd.trim().is_empty() {
            return Err(ConfigError::new("command is empty").with_stage(&self.name));
        }

        let stage = self.name.clone();
        let normalize_all = |paths: Vec<String>, what: &str| -> Result<Vec<String>, ConfigError> {
            let mut seen = HashSet::new();
            let mut result = Vec::with_capacity(paths.len());
            for path in paths {
                let path = normalize_path(&path).map_err(|e| e.with_stage(&stage))?;
                if !seen.insert(path.clone()) {
                    return Err(ConfigError::new(format!("{what} '{path}' is declared twice"))
                        .with_stage(&stage));
                }
                result.push(path);
            }
            Ok(result)
        };

        self.deps = normalize_all(self.deps, "dependency")?;
        self.outs = normalize_all(self.outs, "output")?;
        if let Some(wdir) = self.wdir.take() {
            self.wdir = Some(normalize_path(&wdir).map_err(|e| e.with_stage(&stage))?);
        }

        let mut seen = HashSet::new();
        for param in &mut self.params {
            param.source = normalize_path(&param.source).map_err(|e| e.with_stage(&stage))?;
            if param.key.trim().is_empty() || param.key.split('.').any(str::is_empty) {
                return Err(ConfigError::new(format!("invalid parameter key '{}'", param.key))
                    .with_stage(&stage));
            }
            if !seen.insert(param.clone()) {
                return Err(ConfigError::new(format!("parameter '{param}' is declared twice"))
                    .with_stage(&stage));
            }
        }

        Ok(self)
    }
}

/// All declared stages, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineDefinition {
    stages: Vec<StageDefinition>,
}

impl PipelineDefinition {
    /// Validates and normalises a list of stages.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for duplicate names, empty commands, invalid
    /// paths, or an output claimed by more than one stage.
    pub fn new(stages: Vec<StageDefinition>) -> Result<Self, ConfigError> {
        let stages = stages
            .into_iter()
            .map(StageDefinition::normalize)
            .collect::<Result<Vec<_>, _>>()?;

        let mut names = HashSet::new();
        for stage in &stages {
            if !names.insert(stage.name.as_str()) {
                return Err(ConfigError::new("stage name is declared twice").with_stage(&stage.name));
            }
        }

        let mut producers: Vec<(&str, &str)> = Vec::new();
        for stage in &stages {
            for out in &stage.outs {
                if let Some((other, existing)) = producers
                    .iter()
                    .find(|(_, existing)| path_within(out, existing) || path_within(existing, out))
                {
                    return Err(ConfigError::new(format!(
                        "output '{out}' overlaps output '{existing}' of stage '{other}'; each output needs exactly one producer"
                    ))
                    .with_stage(&stage.name));
                }
            }
            producers.extend(stage.outs.iter().map(|o| (stage.name.as_str(), o.as_str())));
        }

        Ok(Self { stages })
    }

    /// Parses a YAML pipeline definition.
    ///
    /// Bare parameter keys are attributed to `default_params`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the document is malformed.
    pub fn parse(text: &str, default_params: &str) -> Result<Self, ConfigError> {
        let doc: serde_yaml::Value = serde_yaml::from_str(text)
            .map_err(|e| ConfigError::new(format!("invalid YAML: {e}")))?;

        let stages = doc
            .get("stages")
            .ok_or_else(|| ConfigError::new("missing required field 'stages'"))?
            .as_mapping()
            .ok_or_else(|| ConfigError::new("'stages' must be a mapping of stage name to stage"))?;

        let mut result = Vec::with_capacity(stages.len());
        for (key, value) in stages {
            let name = key
                .as_str()
                .ok_or_else(|| ConfigError::new("stage names must be strings"))?;
            let raw: RawStage = serde_yaml::from_value(value.clone())
                .map_err(|e| ConfigError::new(e.to_string()).with_stage(name))?;
            result.push(raw.into_definition(name, default_params)?);
        }

        Self::new(result)
    }

    /// Reads and parses a pipeline definition file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file is absent or malformed, or an
    /// I/O error if it cannot be read.
    pub fn load(path: &Path, default_params: &str) -> Result<Self, StagelockError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::new("pipeline definition not found")
                    .with_file(path)
                    .into())
            }
            Err(e) => return Err(IoError::new(path, e).into()),
        };
        Self::parse(&text, default_params).map_err(|e| e.with_file(path).into())
    }

    /// Returns the stages in declaration order.
    #[must_use]
    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    /// Looks up a stage by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Returns the declaration index of a stage.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if no stage is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStage {
    cmd: Option<RawCommand>,
    #[serde(default)]
    wdir: Option<String>,
    #[serde(default)]
    deps: Vec<String>,
    #[serde(default)]
    params: Vec<RawParam>,
    #[serde(default)]
    outs: Vec<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    desc: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCommand {
    Single(String),
    Sequence(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawParam {
    Key(String),
    Sourced(BTreeMap<String, Vec<String>>),
}

impl RawStage {
    fn into_definition(self, name: &str, default_params: &str) -> Result<StageDefinition, ConfigError> {
        let cmd = match self.cmd {
            Some(RawCommand::Single(cmd)) => cmd,
            Some(RawCommand::Sequence(cmds)) => cmds.join(" && "),
            None => return Err(ConfigError::new("missing required field 'cmd'").with_stage(name)),
        };

        let mut params = Vec::new();
        for raw in self.params {
            match raw {
                RawParam::Key(key) => params.push(ParamRef::new(default_params, key)),
                RawParam::Sourced(sources) => {
                    for (source, keys) in sources {
                        params.extend(keys.into_iter().map(|k| ParamRef::new(source.clone(), k)));
                    }
                }
            }
        }

        Ok(StageDefinition {
            name: name.to_string(),
            cmd,
            wdir: self.wdir,
            deps: self.deps,
            params,
            outs: self.outs,
            timeout_secs: self.timeout_secs,
            desc: self.desc,
        })
    }
}

fn validate_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c == ':') {
        return Err(ConfigError::new(format!(
            "invalid stage name '{name}': must be non-empty without whitespace or ':'"
        )));
    }
    Ok(())
}

/// Normalises a root-relative path to `/`-separated form without `.`/`..`.
///
/// # Errors
///
/// Returns a [`ConfigError`] for empty, absolute, or root-escaping paths.
pub fn normalize_path(path: &str) -> Result<String, ConfigError> {
    let mut parts: Vec<String> = Vec::new();
    for component in Path::new(path.trim()).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(ConfigError::new(format!("path '{path}' escapes the pipeline root")));
                }
            }
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::RootDir | Component::Prefix(_) => {
                return Err(ConfigError::new(format!(
                    "path '{path}' must be relative to the pipeline root"
                )));
            }
        }
    }

    if parts.is_empty() {
        // The root itself is only meaningful as a working directory.
        if path.trim().is_empty() {
            return Err(ConfigError::new("path is empty"));
        }
        return Ok(".".to_string());
    }
    Ok(parts.join("/"))
}

/// Returns true if `path` equals `ancestor` or lies below it.
///
/// The root (`.`) contains every path.
#[must_use]
pub fn path_within(path: &str, ancestor: &str) -> bool {
    ancestor == "."
        || path == ancestor
        || (path.len() > ancestor.len()
            && path.starts_with(ancestor)
            && path.as_bytes()[ancestor.len()] == b'/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const HOUSE_PRICES: &str = r"
stages:
  split:
    cmd: python -m house_prices.split -i data/train_raw.csv
    deps: [data/train_raw.csv]
    params:
      - split.random_state
      - split.test_size
    outs: [data/train.csv, ./data/validation.csv]
  preprocess_train:
    cmd:
      - python -m house_prices.preprocess -i data/train.csv -o data/processed.csv
      - echo done
    deps: [data/train.csv]
    params:
      - model.yaml: [ridge.alpha]
    outs: [data/processed.csv]
";

    #[test]
    fn test_parse_preserves_declaration_order() {
        let def = PipelineDefinition::parse(HOUSE_PRICES, "params.yaml").unwrap();
        let names: Vec<_> = def.stages().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["split", "preprocess_train"]);
        assert_eq!(def.index_of("preprocess_train"), Some(1));
    }

    #[test]
    fn test_parse_fields() {
        let def = PipelineDefinition::parse(HOUSE_PRICES, "params.yaml").unwrap();
        let split = def.get("split").unwrap();
        assert_eq!(split.outs, vec!["data/train.csv", "data/validation.csv"]);
        assert_eq!(
            split.params,
            vec![
                ParamRef::new("params.yaml", "split.random_state"),
                ParamRef::new("params.yaml", "split.test_size"),
            ]
        );

        let pre = def.get("preprocess_train").unwrap();
        assert!(pre.cmd.ends_with("&& echo done"));
        assert_eq!(pre.params, vec![ParamRef::new("model.yaml", "ridge.alpha")]);
    }

    #[test]
    fn test_missing_cmd_is_config_error() {
        let err = PipelineDefinition::parse("stages:\n  a:\n    outs: [x]\n", "params.yaml").unwrap_err();
        assert_eq!(err.stage.as_deref(), Some("a"));
        assert!(err.message.contains("cmd"));
    }

    #[test]
    fn test_missing_stages_is_config_error() {
        assert!(PipelineDefinition::parse("vars: {}\n", "params.yaml").is_err());
        assert!(PipelineDefinition::parse("stages: [a, b]\n", "params.yaml").is_err());
    }

    #[test]
    fn test_unknown_field_is_config_error() {
        let err = PipelineDefinition::parse("stages:\n  a:\n    cmd: x\n    outputs: [y]\n", "params.yaml")
            .unwrap_err();
        assert_eq!(err.stage.as_deref(), Some("a"));
    }

    #[test]
    fn test_duplicate_producer_rejected() {
        let err = PipelineDefinition::new(vec![
            StageDefinition::new("a", "x").with_outs(["data/train.csv"]),
            StageDefinition::new("b", "y").with_outs(["./data/train.csv"]),
        ])
        .unwrap_err();
        assert_eq!(err.stage.as_deref(), Some("b"));
        assert!(err.message.contains("exactly one producer"));
    }

    #[test]
    fn test_nested_output_rejected() {
        let err = PipelineDefinition::new(vec![
            StageDefinition::new("a", "x").with_outs(["models"]),
            StageDefinition::new("b", "y").with_outs(["models/rf.joblib"]),
        ])
        .unwrap_err();
        assert_eq!(err.stage.as_deref(), Some("b"));
    }

    #[test]
    fn test_duplicate_name_and_empty_command() {
        assert!(PipelineDefinition::new(vec![
            StageDefinition::new("a", "x"),
            StageDefinition::new("a", "y"),
        ])
        .is_err());
        assert!(PipelineDefinition::new(vec![StageDefinition::new("a", "  ")]).is_err());
        assert!(PipelineDefinition::new(vec![StageDefinition::new("bad name", "x")]).is_err());
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./data/../data/train.csv").unwrap(), "data/train.csv");
        assert_eq!(normalize_path("models/").unwrap(), "models");
        assert_eq!(normalize_path(".").unwrap(), ".");
        assert!(normalize_path("/etc/passwd").is_err());
        assert!(normalize_path("../outside.csv").is_err());
        assert!(normalize_path("").is_err());
    }

    #[test]
    fn test_path_within() {
        assert!(path_within("models/rf.joblib", "models"));
        assert!(path_within("models", "models"));
        assert!(!path_within("models2/rf.joblib", "models"));
        assert!(!path_within("models", "models/rf.joblib"));
        assert!(path_within("data/train.csv", "."));
    }
}
