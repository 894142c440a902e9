//! Parameter resolution from YAML params files.
//!
//! Scalar floats are resolved to their literal text as written in the
//! source, so a reformatted float (`0.3` to `0.30`) counts as a change.

use crate::core::{float_literal, ParamRef, ParamValue};
use crate::errors::{ConfigError, IoError, StagelockError};
use serde::de::{DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;

/// Reads parameter values, parsing each source file at most once.
#[derive(Debug)]
pub struct ParamsStore {
    root: PathBuf,
    files: HashMap<String, Option<ParamsFile>>,
}

#[derive(Debug)]
struct ParamsFile {
    text: String,
    doc: ParamValue,
}

impl ParamsStore {
    /// Creates a store for params files under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: HashMap::new(),
        }
    }

    /// Returns the current value of `param`, or `None` if the source file or
    /// key does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the source exists but cannot be read or parsed.
    pub fn lookup(&mut self, param: &ParamRef) -> Result<Option<ParamValue>, StagelockError> {
        let Some(file) = self.document(&param.source)? else {
            return Ok(None);
        };
        Ok(lookup_key(&file.doc, &param.key).map(|value| match value {
            ParamValue::Number(n) if n.is_f64() => float_literal(
                scalar_literal(&file.text, &param.key).unwrap_or_else(|| n.to_string()),
            ),
            other => other.clone(),
        }))
    }

    /// Forgets every parsed file.
    pub fn clear(&mut self) {
        self.files.clear();
    }

    fn document(&mut self, source: &str) -> Result<Option<&ParamsFile>, StagelockError> {
        if !self.files.contains_key(source) {
            let path = self.root.join(source);
            let parsed = match fs::read_to_string(&path) {
                Ok(text) => {
                    let doc = serde_yaml::from_str::<ParamValue>(&text).map_err(|e| {
                        ConfigError::new(format!("invalid params file: {e}")).with_file(&path)
                    })?;
                    Some(ParamsFile { text, doc })
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(IoError::new(&path, e).into()),
            };
            self.files.insert(source.to_string(), parsed);
        }
        Ok(self.files.get(source).and_then(Option::as_ref))
    }
}

/// Walks a dot-separated key path through nested mappings and sequences.
#[must_use]
pub fn lookup_key<'a>(doc: &'a ParamValue, key: &str) -> Option<&'a ParamValue> {
    key.split('.').try_fold(doc, |node, segment| match node {
        ParamValue::Mapping(map) => map.get(segment),
        ParamValue::Sequence(seq) => segment.parse::<usize>().ok().and_then(|i| seq.get(i)),
        _ => None,
    })
}

/// Returns the source text of the scalar at `key`, if the path resolves to one.
fn scalar_literal(text: &str, key: &str) -> Option<String> {
    let segments: Vec<&str> = key.split('.').collect();
    KeyPath(&segments)
        .deserialize(serde_yaml::Deserializer::from_str(text))
        .ok()
        .flatten()
}

/// Walks a key path through a YAML document, reading the leaf as a string.
struct KeyPath<'k>(&'k [&'k str]);

impl<'de> DeserializeSeed<'de> for KeyPath<'_> {
    type Value = Option<String>;

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        if self.0.is_empty() {
            String::deserialize(deserializer).map(Some)
        } else {
            deserializer.deserialize_any(self)
        }
    }
}

impl<'de> Visitor<'de> for KeyPath<'_> {
    type Value = Option<String>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a mapping or sequence")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let Some((segment, rest)) = self.0.split_first() else {
            return Ok(None);
        };
        let mut found = None;
        while let Some(key) = map.next_key::<String>()? {
            if found.is_none() && key == *segment {
                found = map.next_value_seed(KeyPath(rest))?;
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(found)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let Some((segment, rest)) = self.0.split_first() else {
            return Ok(None);
        };
        let index = segment.parse::<usize>().ok();
        let mut found = None;
        let mut position = 0usize;
        loop {
            if index == Some(position) {
                match seq.next_element_seed(KeyPath(rest))? {
                    Some(value) => found = value,
                    None => break,
                }
            } else if seq.next_element::<IgnoredAny>()?.is_none() {
                break;
            }
            position += 1;
        }
        Ok(found)
    }
}
