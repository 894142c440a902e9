//! Command-line interface.
//!
//! ```text
//! stagelock [-C DIR] [--pipeline F] [--lock F] [--params F] [--hash ALG]
//!           [-v...] [--json] [--log-format text|json] <plan|status|run|graph>
//! ```

mod commands;
mod logging;

use crate::core::HashAlgorithm;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub use commands::{exit_code_for, execute, run_command, CommandOutcome};
pub use logging::{init_tracing, LOG_ENV};

/// Reproducibility engine for file-based pipelines.
#[derive(Debug, Parser)]
#[command(name = "stagelock")]
#[command(version, about = "Rerun only the pipeline stages whose inputs changed", long_about = None)]
pub struct Cli {
    /// Pipeline root directory
    #[arg(short = 'C', long = "directory", value_name = "DIR", default_value = ".")]
    pub directory: PathBuf,

    /// Pipeline definition file, relative to the root
    #[arg(long, value_name = "FILE")]
    pub pipeline: Option<String>,

    /// Lockfile, relative to the root
    #[arg(long, value_name = "FILE")]
    pub lock: Option<String>,

    /// Default params file, relative to the root
    #[arg(long, value_name = "FILE")]
    pub params: Option<String>,

    /// Hash algorithm (sha256 or md5)
    #[arg(long, value_name = "ALG")]
    pub hash: Option<HashAlgorithm>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show which stages would run, without running them
    Plan {
        /// Only these stages and their upstream producers
        targets: Vec<String>,

        /// Treat every selected stage as stale
        #[arg(short, long)]
        force: bool,
    },

    /// Show every stage as up to date or stale, with reasons
    Status {
        /// Only these stages and their upstream producers
        targets: Vec<String>,
    },

    /// Run the stale stages
    Run {
        /// Only these stages and their upstream producers
        targets: Vec<String>,

        /// Rerun every selected stage
        #[arg(short, long)]
        force: bool,

        /// Decide staleness just before each stage instead of up front
        #[arg(long)]
        interleaved: bool,
    },

    /// Print the execution order and the dependency edges
    Graph,
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}
