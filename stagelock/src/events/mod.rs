//! Event sink system for observability.
//!
//! The runner reports pipeline and stage lifecycle events through an
//! [`EventSink`]:
//!
//! - `pipeline.started`, `pipeline.completed`, `pipeline.failed`
//! - `stage.started`, `stage.completed`, `stage.failed`, `stage.skipped`

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
