// src/logging.rs

//! Logging setup for `progressive` using `tracing` + `tracing-subscriber`.
//!
//! Filter selection:
//! 1. `--log-level` on the command line
//! 2. `PROGRESSIVE_LOG`, a full filter directive (`info`,
//!    `progressive::engine=debug,warn`, ...)
//! 3. `info`
//!
//! Timestamps are relative to process start, which reads better than wall
//! time for runs that last hours. Everything goes to stderr; stdout carries
//! only the root result and `--dry-run` output.

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::fmt::time::uptime;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

/// Environment variable holding the filter directive.
pub const LOG_ENV: &str = "PROGRESSIVE_LOG";

/// Initialise the global logging subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env_value = std::env::var(LOG_ENV).ok();
    let filter = build_filter(cli_level, env_value.as_deref())?;

    fmt()
        .with_env_filter(filter)
        .with_timer(uptime())
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("installing log subscriber: {e}"))
}

/// The filter for a CLI level and the raw `PROGRESSIVE_LOG` value.
pub fn build_filter(cli_level: Option<LogLevel>, env_value: Option<&str>) -> Result<EnvFilter> {
    if let Some(level) = cli_level {
        return Ok(EnvFilter::new(directive(level)));
    }
    match env_value.map(str::trim) {
        Some(directives) if !directives.is_empty() => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid {LOG_ENV} value {directives:?}")),
        _ => Ok(EnvFilter::new("info")),
    }
}

fn directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}
