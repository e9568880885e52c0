// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::dag::{ProjectRun, RunState, Scheduler, SchedulerStep};
use crate::engine::recovery::{self, Recovery};
use crate::engine::{JobOutcome, OrchestratorOptions, RunStats};
use crate::errors::{ProgressiveError, Result};
use crate::exec::{BatchBackend, ExecutionFailure, JobStatus};
use crate::store::{JobRecordStore, SubproblemRecord};

/// Drives the subproblem scheduler to completion against a batch backend.
///
/// This is a pure IO shell around [`Scheduler`], which contains all the
/// scheduling semantics. This struct handles the async side: persisting
/// every transition to the job record store, submitting and polling jobs,
/// sleeping between polls, and reacting to cancellation.
pub struct Orchestrator<B: BatchBackend> {
    backend: B,
    store: Arc<dyn JobRecordStore>,
    options: OrchestratorOptions,
    cancel: Option<watch::Receiver<bool>>,
}

impl<B: BatchBackend> fmt::Debug for Orchestrator<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("backend", &self.backend.name())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Run `project` to a terminal state with `backend` and `store`.
pub async fn run<B: BatchBackend>(
    project: ProjectRun,
    backend: B,
    store: Arc<dyn JobRecordStore>,
    options: OrchestratorOptions,
) -> Result<ProjectRun> {
    Orchestrator::new(backend, store, options).run(project).await
}

impl<B: BatchBackend> Orchestrator<B> {
    pub fn new(backend: B, store: Arc<dyn JobRecordStore>, options: OrchestratorOptions) -> Self {
        Self {
            backend,
            store,
            options,
            cancel: None,
        }
    }

    /// Stop the run when `rx` turns `true` (see
    /// [`CancelHandle`](crate::engine::CancelHandle)).
    pub fn with_cancel(mut self, rx: watch::Receiver<bool>) -> Self {
        self.cancel = Some(rx);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Main loop.
    ///
    /// - Reconciles with the store.
    /// - Polls in-flight jobs and feeds outcomes into the scheduler.
    /// - Dispatches ready subproblems into free backend slots, persisting
    ///   each transition before the job is submitted.
    ///
    /// Returns the run in `Completed` or `Failed`. Only run-fatal errors
    /// (configuration, store unavailable) are returned as `Err`.
    pub async fn run(&self, project: ProjectRun) -> Result<ProjectRun> {
        let started = Instant::now();
        info!(
            backend = self.backend.name(),
            max_concurrency = self.backend.max_concurrency(),
            subproblems = project.subproblems.len(),
            retry_limit = self.options.retry.retry_limit,
            "orchestrator started"
        );

        let mut scheduler = Scheduler::new(project, self.options.retry, self.options.resources)?;
        let recovery = recovery::reconcile(&mut scheduler, &self.backend, &*self.store).await?;

        if let Err(err) = self.drive(&mut scheduler).await {
            error!(error = %err, "run aborted; cancelling in-flight jobs");
            self.cancel_in_flight(&scheduler).await;
            return Err(err);
        }

        Ok(self.finish(scheduler, &recovery, started))
    }

    async fn drive(&self, scheduler: &mut Scheduler) -> Result<()> {
        let max_slots = self.backend.max_concurrency().max(1);
        let mut cancel = self.cancel.clone();

        loop {
            if is_cancelled(&cancel) {
                info!("cancellation requested; stopping run");
                self.cancel_in_flight(scheduler).await;
                let step = scheduler.abandon_unfinished("run cancelled");
                self.persist(&step.records).await?;
                return Ok(());
            }

            if scheduler.is_finished() {
                return Ok(());
            }

            let mut progressed = self.poll_in_flight(scheduler).await?;

            let slots = max_slots.saturating_sub(scheduler.in_flight().len());
            let step = scheduler.step_dispatch(Instant::now(), slots);
            progressed |= !step.dispatched.is_empty();
            self.submit(scheduler, step).await?;

            if scheduler.is_finished() {
                return Ok(());
            }

            if scheduler.in_flight().is_empty() && scheduler.next_eligible_at().is_none() {
                // Nothing running, nothing ready, nothing backing off.
                error!("no runnable subproblem left; abandoning the rest");
                let step = scheduler.abandon_unfinished("no runnable subproblem left");
                self.persist(&step.records).await?;
                return Ok(());
            }

            if !progressed {
                self.wait(scheduler, &mut cancel).await;
            }
        }
    }

    /// Poll every in-flight job once. Returns whether any finished.
    async fn poll_in_flight(&self, scheduler: &mut Scheduler) -> Result<bool> {
        let mut progressed = false;

        for id in scheduler.in_flight() {
            let Some(job) = scheduler.job_for(&id) else {
                continue;
            };
            if job.handle.is_none() {
                continue;
            }

            let outcome = match self.backend.poll(&job).await {
                Ok(JobStatus::Running) => continue,
                Ok(JobStatus::Finished(outcome)) => outcome,
                Err(err) => {
                    warn!(subproblem = %id, attempt = job.attempt, error = %err, "lost track of job");
                    // The job may still be alive; stop it before a new attempt starts.
                    if let Err(cancel_err) = self.backend.cancel(&job).await {
                        warn!(subproblem = %id, error = %cancel_err, "failed to cancel lost job");
                    }
                    JobOutcome::Failed(ExecutionFailure::transient(format!("lost job: {err}")))
                }
            };

            debug!(subproblem = %id, attempt = job.attempt, ?outcome, "job finished");
            let step = scheduler.step_completion(&id, job.attempt, outcome, Instant::now());
            self.apply(&step).await?;
            progressed = true;
        }

        Ok(progressed)
    }

    /// Persist the dispatch transitions, then submit the jobs.
    async fn submit(&self, scheduler: &mut Scheduler, step: SchedulerStep) -> Result<()> {
        // Write-ahead: a crash after this point re-queues on restart.
        self.persist(&step.records).await?;

        for job in step.dispatched {
            match self.backend.submit(&job).await {
                Ok(handle) => {
                    if let Some(record) = scheduler.mark_submitted(&job.subproblem, job.attempt, handle) {
                        self.persist(std::slice::from_ref(&record)).await?;
                    }
                }
                Err(err) => {
                    warn!(
                        subproblem = %job.subproblem,
                        attempt = job.attempt,
                        backend = self.backend.name(),
                        error = %err,
                        "submission failed"
                    );
                    let outcome = JobOutcome::Failed(ExecutionFailure::transient(format!(
                        "submission failed: {err}"
                    )));
                    let step =
                        scheduler.step_completion(&job.subproblem, job.attempt, outcome, Instant::now());
                    self.apply(&step).await?;
                }
            }
        }
        Ok(())
    }

    async fn apply(&self, step: &SchedulerStep) -> Result<()> {
        self.persist(&step.records).await?;
        if !step.newly_abandoned.is_empty() {
            warn!(
                failed = ?step.newly_failed,
                abandoned = ?step.newly_abandoned,
                "abandoned dependents of failed subproblem"
            );
        }
        if step.run_just_finished {
            debug!("every subproblem reached a terminal state");
        }
        Ok(())
    }

    /// Write `records` to the store on the blocking pool; file stores sync
    /// every write.
    async fn persist(&self, records: &[SubproblemRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let store = Arc::clone(&self.store);
        let records = records.to_vec();
        tokio::task::spawn_blocking(move || records.iter().try_for_each(|record| store.put(record)))
            .await
            .map_err(|e| ProgressiveError::StoreUnavailable(format!("store writer stopped: {e}")))?
    }

    async fn cancel_in_flight(&self, scheduler: &Scheduler) {
        for id in scheduler.in_flight() {
            let Some(job) = scheduler.job_for(&id) else {
                continue;
            };
            if let Err(err) = self.backend.cancel(&job).await {
                warn!(subproblem = %id, error = %err, "failed to cancel job");
            }
        }
    }

    /// Sleep until the next poll or backoff deadline, waking early on
    /// cancellation.
    async fn wait(&self, scheduler: &Scheduler, cancel: &mut Option<watch::Receiver<bool>>) {
        let mut delay = self.options.poll_interval;
        if let Some(at) = scheduler.next_eligible_at() {
            delay = delay.min(at.saturating_duration_since(Instant::now()));
        }
        let delay = delay.max(Duration::from_millis(1));

        let mut sender_gone = false;
        match cancel.as_mut() {
            Some(rx) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    changed = rx.changed() => sender_gone = changed.is_err(),
                }
            }
            None => tokio::time::sleep(delay).await,
        }
        if sender_gone {
            // Nobody can cancel any more.
            *cancel = None;
        }
    }

    fn finish(&self, scheduler: Scheduler, recovery: &Recovery, started: Instant) -> ProjectRun {
        let mut run = scheduler.into_run();
        run.settle();
        run.stats = RunStats::collect(&run.subproblems, recovery.recovered(), started.elapsed());
        run.stats.log(run.state);

        match run.state {
            RunState::Completed => info!(root = ?run.root_result(), "run completed"),
            RunState::Failed => warn!(failing = ?run.failing, "run failed"),
            RunState::Running => error!("run stopped with unfinished subproblems"),
        }
        run
    }
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
}
