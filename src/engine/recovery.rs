// src/engine/recovery.rs

//! Startup reconciliation against the job record store.
//!
//! The store is the authority: the scheduler's in-memory state is rebuilt
//! from it before anything is dispatched.
//!
//! 1. The run manifest is checked (or written, for a fresh store).
//! 2. Every record is restored into the scheduler.
//! 3. Subproblems that were in flight are checked against the backend:
//!    live jobs are adopted, finished ones applied, lost ones re-queued.

use std::time::Instant;

use tracing::{info, warn};

use crate::dag::{now_ms, Restored, Scheduler, SubproblemId};
use crate::errors::{ProgressiveError, Result};
use crate::exec::{BatchBackend, JobStatus};
use crate::store::{JobRecordStore, RunManifest, SubproblemRecord};

/// What reconciliation found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recovery {
    /// Records taken over from the store.
    pub restored: usize,
    /// In-flight jobs that are still running on the backend.
    pub adopted: Vec<SubproblemId>,
    /// In-flight jobs that finished while nobody was watching.
    pub applied: Vec<SubproblemId>,
    /// Subproblems put back to `Pending` (lost jobs and earlier failures).
    pub requeued: Vec<SubproblemId>,
    /// In-flight records with no live backend job.
    pub lost: usize,
    /// Records for subproblems outside this decomposition.
    pub ignored: usize,
}

impl Recovery {
    /// Subproblems that were in flight when the previous run stopped.
    pub fn recovered(&self) -> usize {
        self.adopted.len() + self.applied.len() + self.lost
    }
}

fn persist<S: JobRecordStore + ?Sized>(store: &S, records: &[SubproblemRecord]) -> Result<()> {
    for record in records {
        store.put(record)?;
    }
    Ok(())
}

/// Check or write the run manifest.
pub fn check_manifest<S: JobRecordStore + ?Sized>(
    store: &S,
    fingerprint: &str,
    subproblems: usize,
) -> Result<()> {
    match store.load_manifest()? {
        Some(manifest) if manifest.fingerprint == fingerprint => {
            info!(
                created_at_ms = manifest.created_at_ms,
                "resuming run from existing job records"
            );
            Ok(())
        }
        Some(manifest) => Err(ProgressiveError::config(format!(
            "job record store belongs to a different run (fingerprint {} != {}); \
             use a fresh store directory",
            manifest.fingerprint, fingerprint
        ))),
        None => store.save_manifest(&RunManifest {
            fingerprint: fingerprint.to_string(),
            subproblems,
            created_at_ms: now_ms(),
        }),
    }
}

/// Rebuild `scheduler` from `store`, probing `backend` for in-flight jobs.
pub async fn reconcile<B, S>(scheduler: &mut Scheduler, backend: &B, store: &S) -> Result<Recovery>
where
    B: BatchBackend + ?Sized,
    S: JobRecordStore + ?Sized,
{
    let fingerprint = scheduler.run().fingerprint();
    check_manifest(store, &fingerprint, scheduler.run().subproblems.len())?;

    let mut recovery = Recovery::default();
    let mut in_flight = Vec::new();

    // Restore everything before touching the backend, so outcomes applied
    // below cascade over fully restored state.
    for record in store.scan()? {
        match scheduler.restore(&record) {
            Restored::Ignored => recovery.ignored += 1,
            Restored::Kept => recovery.restored += 1,
            Restored::Requeued(updated) => {
                if record.state.is_in_flight() {
                    let inconsistency = ProgressiveError::RecoveryInconsistency(format!(
                        "'{}' was {:?} without a backend handle",
                        record.id, record.state
                    ));
                    warn!(subproblem = %record.id, attempt = record.attempt, "{inconsistency}; re-queueing");
                    recovery.lost += 1;
                } else {
                    info!(
                        subproblem = %record.id,
                        previous = ?record.state,
                        "resetting subproblem from an earlier run"
                    );
                }
                store.put(&updated)?;
                recovery.restored += 1;
                recovery.requeued.push(record.id.clone());
            }
            Restored::InFlight => {
                recovery.restored += 1;
                in_flight.push(record.id.clone());
            }
        }
    }

    for id in in_flight {
        let Some(job) = scheduler.job_for(&id) else {
            if let Some(record) = scheduler.requeue_lost(&id, "upstream result missing at recovery") {
                store.put(&record)?;
            }
            recovery.lost += 1;
            recovery.requeued.push(id);
            continue;
        };

        match backend.poll(&job).await {
            Ok(JobStatus::Running) => {
                info!(
                    subproblem = %id,
                    attempt = job.attempt,
                    handle = ?job.handle,
                    backend = backend.name(),
                    "adopting job still running on backend"
                );
                recovery.adopted.push(id);
            }
            Ok(JobStatus::Finished(outcome)) => {
                info!(subproblem = %id, attempt = job.attempt, "applying outcome of job finished while offline");
                let step = scheduler.step_completion(&id, job.attempt, outcome, Instant::now());
                persist(store, &step.records)?;
                recovery.applied.push(id);
            }
            Err(err) => {
                let inconsistency = ProgressiveError::RecoveryInconsistency(format!(
                    "'{id}' has no live backend job: {err}"
                ));
                warn!(subproblem = %id, attempt = job.attempt, "{inconsistency}; re-queueing");
                if let Err(cancel_err) = backend.cancel(&job).await {
                    warn!(subproblem = %id, error = %cancel_err, "failed to cancel lost job");
                }
                if let Some(record) = scheduler.requeue_lost(&id, &inconsistency.to_string()) {
                    store.put(&record)?;
                }
                recovery.lost += 1;
                recovery.requeued.push(id);
            }
        }
    }

    info!(
        restored = recovery.restored,
        adopted = recovery.adopted.len(),
        applied = recovery.applied.len(),
        requeued = recovery.requeued.len(),
        lost = recovery.lost,
        ignored = recovery.ignored,
        "reconciled with job record store"
    );
    Ok(recovery)
}
