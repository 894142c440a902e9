//! Parameter references.

use serde::{Deserialize, Serialize};
use serde_yaml::value::{Tag, TaggedValue};
use std::fmt;

/// A parameter value as read from a params file.
///
/// Comparison is exact: `42` and `42.0` are different values, and strings
/// never compare equal to numbers. Scalar floats are held as their source
/// literal under the `!float` tag (see [`float_literal`]), so `0.3` and
/// `0.30` are different values too.
pub type ParamValue = serde_yaml::Value;

/// Tag carried by float parameters recorded by literal.
pub const FLOAT_TAG: &str = "float";

/// Builds the value of a float parameter written as `literal` in its source.
#[must_use]
pub fn float_literal(literal: impl Into<String>) -> ParamValue {
    ParamValue::Tagged(Box::new(TaggedValue {
        tag: Tag::new(FLOAT_TAG),
        value: ParamValue::String(literal.into()),
    }))
}

/// A declared parameter: a dotted key inside a source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParamRef {
    /// Params file path relative to the pipeline root.
    pub source: String,
    /// Dot-separated key path (`split.test_size`).
    pub key: String,
}

impl ParamRef {
    /// Creates a new parameter reference.
    #[must_use]
    pub fn new(source: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ParamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.key)
    }
}

/// Renders a parameter value on one line for reports.
#[must_use]
pub fn format_value(value: &ParamValue) -> String {
    match value {
        ParamValue::Null => "null".to_string(),
        ParamValue::Bool(b) => b.to_string(),
        ParamValue::Number(n) => n.to_string(),
        ParamValue::String(s) => format!("{s:?}"),
        ParamValue::Tagged(tagged) if tagged.tag == FLOAT_TAG => match &tagged.value {
            ParamValue::String(literal) => literal.clone(),
            other => format_value(other),
        },
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().replace('\n', " "))
            .unwrap_or_default(),
    }
}
