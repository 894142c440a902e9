//! Core domain model types for stagelock.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Hash algorithms and recorded file references
//! - Parameter references and exact value comparison
//! - Per-stage run outcomes

mod fingerprint;
mod param;
mod status;

pub use fingerprint::{FileRef, HashAlgorithm};
pub use param::{float_literal, format_value, ParamRef, ParamValue, FLOAT_TAG};
pub use status::{FailureReason, StageOutcome};
