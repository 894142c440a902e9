//! Test helpers: scripted launchers and temporary workspaces.

mod fixtures;
mod mocks;

pub use fixtures::Workspace;
pub use mocks::ScriptedLauncher;
