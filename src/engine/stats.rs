// src/engine/stats.rs

//! Per-run statistics: counts by terminal state, attempts, duration.

use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::dag::{RunState, Subproblem, SubproblemState};
use crate::errors::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub abandoned: usize,
    /// Subproblems left non-terminal (only after a run-fatal error).
    pub unfinished: usize,
    /// Dispatches across all subproblems, including earlier runs of a
    /// resumed store.
    pub total_attempts: u64,
    /// Dispatches beyond the first, summed over subproblems.
    pub retries: u64,
    /// In-flight subproblems found in the store at startup.
    pub recovered: usize,
    pub wall_clock_ms: u64,
}

impl RunStats {
    pub fn collect(subproblems: &[Subproblem], recovered: usize, wall_clock: Duration) -> Self {
        let mut stats = RunStats {
            total: subproblems.len(),
            recovered,
            wall_clock_ms: wall_clock.as_millis() as u64,
            ..Default::default()
        };

        for sp in subproblems {
            match sp.state {
                SubproblemState::Succeeded => stats.succeeded += 1,
                SubproblemState::Failed => stats.failed += 1,
                SubproblemState::Abandoned => stats.abandoned += 1,
                _ => stats.unfinished += 1,
            }
            stats.total_attempts += u64::from(sp.attempt);
            stats.retries += u64::from(sp.attempt.saturating_sub(1));
        }

        stats
    }

    pub fn log(&self, state: RunState) {
        info!(
            ?state,
            total = self.total,
            succeeded = self.succeeded,
            failed = self.failed,
            abandoned = self.abandoned,
            attempts = self.total_attempts,
            retries = self.retries,
            recovered = self.recovered,
            wall_clock_ms = self.wall_clock_ms,
            "run statistics"
        );
    }

    /// Write the statistics as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}
