// src/exec/mod.rs

//! Batch execution layer.
//!
//! - [`backend`] defines the [`BatchBackend`] capability set
//!   (`submit` / `poll` / `cancel` plus a declared concurrency limit).
//! - [`local`] runs subproblem executors on a bounded in-process worker pool.
//! - [`cluster`] drives an external job-queueing service through shell
//!   command templates.
//! - [`executor`] defines the [`SubproblemExecutor`] seam and the
//!   command-running executor used in production.
//! - [`shell`] runs a single shell command and captures its output.
//!
//! Backends know nothing about dependencies; ordering is owned entirely by
//! the orchestrator.

pub mod backend;
pub mod cluster;
pub mod executor;
pub mod local;
pub mod shell;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dag::{AlignmentTarget, ResultRef, SubproblemId};
use crate::engine::JobOutcome;
use crate::errors::ProgressiveError;

pub use backend::BatchBackend;
pub use cluster::ClusterBackend;
pub use executor::{CommandExecutor, SubproblemExecutor};
pub use local::LocalBackend;

/// Backend-assigned identifier of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendHandle(pub String);

impl fmt::Display for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resources requested for every job of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default = "default_cpus")]
    pub cpus: u32,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,
}

fn default_cpus() -> u32 {
    1
}

fn default_memory_mb() -> u64 {
    2048
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self {
            cpus: default_cpus(),
            memory_mb: default_memory_mb(),
        }
    }
}

/// An input with its data location resolved for the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedInput {
    pub taxon: String,
    /// Genome file path, or the `ResultRef` of an upstream subproblem.
    pub location: String,
    pub branch_length: Option<f64>,
}

/// Everything an executor needs to align one subproblem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub subproblem: SubproblemId,
    pub taxon: String,
    pub attempt: u32,
    pub ingroups: Vec<ResolvedInput>,
    pub outgroups: Vec<ResolvedInput>,
    pub targets: Vec<AlignmentTarget>,
}

/// Dispatch unit wrapping one attempt of one subproblem.
#[derive(Debug, Clone)]
pub struct Job {
    pub subproblem: SubproblemId,
    pub attempt: u32,
    pub request: ExecutionRequest,
    pub resources: ResourceRequirements,
    pub submitted_at_ms: u64,
    /// Set once the backend accepted the job.
    pub handle: Option<BackendHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Presumed recoverable: timeout, worker crash, transient IO.
    Transient,
    /// Not worth retrying, e.g. malformed input data.
    Permanent,
}

/// Why an attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl ExecutionFailure {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            reason: reason.into(),
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            reason: reason.into(),
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
        };
        write!(f, "{kind}: {}", self.reason)
    }
}

impl From<ExecutionFailure> for ProgressiveError {
    fn from(failure: ExecutionFailure) -> Self {
        match failure.kind {
            FailureKind::Transient => ProgressiveError::TransientExecution(failure.reason),
            FailureKind::Permanent => ProgressiveError::PermanentExecution(failure.reason),
        }
    }
}

/// What a backend reports for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Finished(JobOutcome),
}

impl JobStatus {
    pub fn succeeded(result: ResultRef) -> Self {
        JobStatus::Finished(JobOutcome::Succeeded(result))
    }

    pub fn failed(failure: ExecutionFailure) -> Self {
        JobStatus::Finished(JobOutcome::Failed(failure))
    }
}
