// src/dag/mod.rs

//! Subproblem graph and scheduling.
//!
//! - [`subproblem`] provides subproblem metadata and lifecycle states.
//! - [`graph`] holds the dependency graph between subproblems.
//! - [`scheduler`] contains the per-run state machine that decides which
//!   subproblems are ready, applies outcomes and drives retries.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages transitions touching many subproblems.
//! - [`project`] is the whole run: tree, options and every subproblem.

pub mod graph;
pub mod project;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod subproblem;

pub use graph::SubproblemGraph;
pub use project::{ProjectRun, RunState};
pub use scheduler::{Restored, Scheduler};
pub use scheduler_step::SchedulerStep;
pub use subproblem::{
    now_ms, AlignmentTarget, InputRef, ResultRef, Subproblem, SubproblemId, SubproblemState,
    Timestamps,
};
