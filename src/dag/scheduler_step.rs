// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::subproblem::SubproblemId;
use crate::exec::Job;
use crate::store::SubproblemRecord;

/// Structured result of a single scheduler "step".
///
/// `records` must reach the job record store before any job in `dispatched`
/// is submitted to a backend.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Jobs that were marked `Dispatched` in this step.
    pub dispatched: Vec<Job>,
    /// Every subproblem whose state changed, in the order it changed.
    pub records: Vec<SubproblemRecord>,
    /// Subproblems that reached `Failed` in this step.
    pub newly_failed: Vec<SubproblemId>,
    /// Subproblems that reached `Abandoned` in this step.
    pub newly_abandoned: Vec<SubproblemId>,
    /// Whether this step left every subproblem in a terminal state.
    pub run_just_finished: bool,
}

impl SchedulerStep {
    pub fn is_empty(&self) -> bool {
        self.dispatched.is_empty() && self.records.is_empty()
    }
}
