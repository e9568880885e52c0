// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Only `Configuration` and `StoreUnavailable` end a run early. Failures of
//! individual subproblems are carried as values (see
//! [`crate::exec::ExecutionFailure`]) and drive the abandonment cascade
//! instead of unwinding the orchestrator loop.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProgressiveError {
    /// Malformed guide tree, unresolved genome reference, invalid outgroup
    /// request or an invalid experiment file.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transient execution failure: {0}")]
    TransientExecution(String),

    #[error("Permanent execution failure: {0}")]
    PermanentExecution(String),

    /// A stored non-terminal subproblem had no live backend job at startup.
    #[error("Recovery inconsistency: {0}")]
    RecoveryInconsistency(String),

    #[error("Job record store unavailable: {0}")]
    StoreUnavailable(String),

    /// The backend has no record of the given handle.
    #[error("Unknown backend job: {0}")]
    UnknownJob(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProgressiveError {
    pub fn config(msg: impl Into<String>) -> Self {
        ProgressiveError::Configuration(msg.into())
    }

    /// Whether this error must stop the whole run.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            ProgressiveError::Configuration(_) | ProgressiveError::StoreUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ProgressiveError>;
