// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::Overrides;
use crate::types::BackendKind;

/// Command-line arguments for `progressive`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "progressive",
    version,
    about = "Decompose a guide-tree alignment into subproblems and run them on a batch backend.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the experiment file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Progressive.toml")]
    pub config: PathBuf,

    /// Batch backend (local, cluster); overrides `[backend].kind`.
    #[arg(long, value_name = "KIND", env = "PROGRESSIVE_BACKEND")]
    pub backend: Option<BackendKind>,

    /// Give every subproblem an outgroup from outside its subtree.
    #[arg(long)]
    pub use_outgroup: bool,

    /// Also align each subproblem's input against itself.
    #[arg(long)]
    pub self_alignment: bool,

    /// Maximum number of jobs in flight.
    #[arg(long, value_name = "N")]
    pub max_concurrency: Option<usize>,

    /// Maximum attempts per subproblem.
    #[arg(long, value_name = "N")]
    pub retry_limit: Option<u32>,

    /// Job record store directory; overrides `[store].dir`.
    #[arg(long, value_name = "DIR")]
    pub store_dir: Option<PathBuf>,

    /// Write run statistics as JSON to this path.
    #[arg(long, value_name = "PATH")]
    pub stats: Option<PathBuf>,

    /// Keep the temporary work directory after the run (memory store
    /// without a configured work directory only).
    #[arg(long)]
    pub keep_work_dir: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PROGRESSIVE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the decomposition, but don't execute anything.
    #[arg(long)]
    pub dry_run: bool,
}

impl CliArgs {
    /// Values that take precedence over the experiment file.
    pub fn overrides(&self) -> Overrides {
        Overrides {
            backend: self.backend,
            use_outgroup: self.use_outgroup.then_some(true),
            self_alignment: self.self_alignment.then_some(true),
            max_concurrency: self.max_concurrency,
            retry_limit: self.retry_limit,
            store_dir: self.store_dir.clone(),
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
