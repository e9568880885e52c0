// src/engine/mod.rs

//! Workflow orchestration engine.
//!
//! This module ties together:
//! - the pure subproblem [`Scheduler`](crate::dag::Scheduler)
//! - the job record store (write-ahead of every transition)
//! - a [`BatchBackend`](crate::exec::BatchBackend) that runs the jobs
//! - recovery of a previous run's state on startup
//! - cancellation and run statistics
//!
//! The async shell lives in [`runtime`]; reconciliation with stored records
//! in [`recovery`]; statistics in [`stats`].

use std::time::Duration;

use tokio::sync::watch;

use crate::dag::ResultRef;
use crate::exec::{ExecutionFailure, ResourceRequirements};

pub mod recovery;
pub mod runtime;
pub mod stats;

pub use runtime::{run, Orchestrator};
pub use stats::RunStats;

/// Final outcome of one job attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded(ResultRef),
    Failed(ExecutionFailure),
}

/// Delay before a transiently failed subproblem becomes eligible again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay after the given (1-based) failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(d) => d,
            Backoff::Exponential { base, max } => {
                let shift = attempt.saturating_sub(1).min(20);
                base.saturating_mul(1u32 << shift).min(max)
            }
        }
    }
}

/// How often a subproblem may be attempted, and how long to wait between
/// attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (dispatches) per subproblem; at least 1.
    pub retry_limit: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Whether a transient failure of `attempt` may be retried.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.retry_limit
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            backoff: Backoff::Fixed(Duration::ZERO),
        }
    }
}

/// Options for the orchestrator loop.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorOptions {
    pub retry: RetryPolicy,
    /// Sleep between backend polls when nothing changed.
    pub poll_interval: Duration,
    /// Resources requested for every job.
    pub resources: ResourceRequirements,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_millis(200),
            resources: ResourceRequirements::default(),
        }
    }
}

/// Requests cancellation of a running orchestrator.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }

    pub fn cancel(&self) {
        // No receiver left means the run already ended.
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}
