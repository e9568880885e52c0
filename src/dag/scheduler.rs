use std::cmp::Reverse;
use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::dag::graph::SubproblemGraph;
use crate::dag::project::ProjectRun;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::{ReadOnlyStateManager, StateManager};
use crate::dag::subproblem::{
    now_ms, InputRef, Subproblem, SubproblemId, SubproblemState,
};
use crate::engine::{JobOutcome, RetryPolicy};
use crate::errors::Result;
use crate::exec::{BackendHandle, ExecutionRequest, Job, ResolvedInput, ResourceRequirements};
use crate::store::SubproblemRecord;

/// What restoring one stored record did to the in-memory state.
#[derive(Debug, Clone, PartialEq)]
pub enum Restored {
    /// The record names a subproblem that is not part of this run.
    Ignored,
    /// The stored state was taken over unchanged.
    Kept,
    /// The subproblem was put back to `Pending`; persist the record.
    Requeued(SubproblemRecord),
    /// The record claims a live backend job; the caller must ask the
    /// backend and then either adopt it, apply its outcome, or requeue it.
    InFlight,
}

/// Scheduler holds the immutable dependency graph plus the mutable run.
///
/// It is responsible for:
/// - deciding which subproblems are ready (every dependency succeeded)
/// - choosing which ready subproblems to dispatch into free slots
/// - applying job outcomes, retries with backoff, and the failure cascade
/// - restoring state from stored records on startup
///
/// It performs no IO; every state change is returned as a
/// [`SubproblemRecord`] for the caller to persist.
#[derive(Debug)]
pub struct Scheduler {
    graph: SubproblemGraph,
    run: ProjectRun,
    index: HashMap<SubproblemId, usize>,
    retry: RetryPolicy,
    resources: ResourceRequirements,
    /// Earliest time a subproblem backing off after a failure may run again.
    eligible_at: HashMap<SubproblemId, Instant>,
}

impl Scheduler {
    pub fn new(run: ProjectRun, retry: RetryPolicy, resources: ResourceRequirements) -> Result<Self> {
        let graph = SubproblemGraph::build(&run.subproblems)?;
        let index = run
            .subproblems
            .iter()
            .enumerate()
            .map(|(idx, sp)| (sp.id.clone(), idx))
            .collect();

        Ok(Self {
            graph,
            run,
            index,
            retry,
            resources,
            eligible_at: HashMap::new(),
        })
    }

    pub fn run(&self) -> &ProjectRun {
        &self.run
    }

    pub fn into_run(self) -> ProjectRun {
        self.run
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn subproblem(&self, id: &SubproblemId) -> Option<&Subproblem> {
        self.index.get(id).map(|idx| &self.run.subproblems[*idx])
    }

    pub fn state_of(&self, id: &SubproblemId) -> Option<SubproblemState> {
        self.subproblem(id).map(|sp| sp.state)
    }

    /// Whether every subproblem is `Succeeded`, `Failed` or `Abandoned`.
    pub fn is_finished(&self) -> bool {
        self.run.subproblems.iter().all(|sp| sp.state.is_terminal())
    }

    pub fn in_flight(&self) -> Vec<SubproblemId> {
        self.run
            .subproblems
            .iter()
            .filter(|sp| sp.state.is_in_flight())
            .map(|sp| sp.id.clone())
            .collect()
    }

    /// Earliest backoff deadline among subproblems waiting to be retried.
    pub fn next_eligible_at(&self) -> Option<Instant> {
        self.eligible_at
            .iter()
            .filter(|(id, _)| {
                self.state_of(id)
                    .map(SubproblemState::is_unstarted)
                    .unwrap_or(false)
            })
            .map(|(_, at)| *at)
            .min()
    }

    fn manager(&mut self) -> StateManager<'_> {
        StateManager::new(&self.graph, &mut self.run.subproblems, &self.index)
    }

    fn read_only(&self) -> ReadOnlyStateManager<'_> {
        ReadOnlyStateManager::new(&self.run.subproblems, &self.index)
    }

    /// Number of not-yet-started subproblems that (transitively) wait on `id`.
    fn unstarted_dependents(&self, id: &SubproblemId) -> usize {
        self.graph
            .transitive_dependents(id)
            .iter()
            .filter(|dep| {
                self.state_of(dep)
                    .map(SubproblemState::is_unstarted)
                    .unwrap_or(false)
            })
            .count()
    }

    /// Build the executor request for `sp` at `attempt`.
    ///
    /// Returns `None` if an upstream result is missing.
    fn build_request(&self, sp: &Subproblem, attempt: u32) -> Option<ExecutionRequest> {
        let ro = self.read_only();
        let resolve = |input: &InputRef| -> Option<ResolvedInput> {
            let location = match input {
                InputRef::Genome { path, .. } => path.to_string_lossy().into_owned(),
                InputRef::Subproblem { id, .. } => ro.get(id)?.result.as_ref()?.0.clone(),
            };
            Some(ResolvedInput {
                taxon: input.taxon().to_string(),
                location,
                branch_length: input.branch_length(),
            })
        };

        let ingroups = sp.ingroups.iter().map(&resolve).collect::<Option<Vec<_>>>()?;
        let outgroups = sp.outgroups.iter().map(&resolve).collect::<Option<Vec<_>>>()?;

        Some(ExecutionRequest {
            subproblem: sp.id.clone(),
            taxon: sp.taxon.clone(),
            attempt,
            ingroups,
            outgroups,
            targets: sp.alignment_targets(),
        })
    }

    /// Job describing the current attempt of an in-flight subproblem.
    pub fn job_for(&self, id: &SubproblemId) -> Option<Job> {
        let sp = self.subproblem(id)?;
        let request = self.build_request(sp, sp.attempt)?;
        Some(Job {
            subproblem: sp.id.clone(),
            attempt: sp.attempt,
            request,
            resources: self.resources,
            submitted_at_ms: sp.times.dispatched_at_ms.unwrap_or(sp.times.updated_at_ms),
            handle: sp.handle.clone(),
        })
    }

    /// Promote ready subproblems and dispatch up to `slots` of them.
    ///
    /// Among ready subproblems, the ones unblocking the most not-yet-started
    /// work go first; post-order breaks ties.
    pub fn step_dispatch(&mut self, now: Instant, slots: usize) -> SchedulerStep {
        self.manager().promote_ready();

        let mut step = SchedulerStep::default();
        if slots == 0 {
            return step;
        }

        let mut candidates: Vec<(usize, usize, SubproblemId)> = self
            .run
            .subproblems
            .iter()
            .enumerate()
            .filter(|(_, sp)| sp.state == SubproblemState::Ready)
            .filter(|(_, sp)| {
                self.eligible_at
                    .get(&sp.id)
                    .map(|at| *at <= now)
                    .unwrap_or(true)
            })
            .map(|(idx, sp)| (self.unstarted_dependents(&sp.id), idx, sp.id.clone()))
            .collect();
        candidates.sort_by_key(|(dependents, idx, _)| (Reverse(*dependents), *idx));
        candidates.truncate(slots);

        // Decide first (immutable), then mutate.
        let mut planned = Vec::with_capacity(candidates.len());
        for (_, idx, id) in candidates {
            let sp = &self.run.subproblems[idx];
            match self.build_request(sp, sp.attempt + 1) {
                Some(request) => planned.push((idx, request)),
                None => warn!(
                    subproblem = %id,
                    "ready subproblem has an upstream without a result; not dispatching"
                ),
            }
        }

        let now_wall = now_ms();
        for (idx, request) in planned {
            let sp = &mut self.run.subproblems[idx];
            sp.attempt += 1;
            sp.state = SubproblemState::Dispatched;
            sp.handle = None;
            sp.times.dispatched_at_ms = Some(now_wall);
            sp.times.updated_at_ms = now_wall;
            self.eligible_at.remove(&sp.id);

            if sp.attempt > 1 {
                info!(
                    subproblem = %sp.id,
                    taxon = %sp.taxon,
                    attempt = sp.attempt,
                    "dispatching subproblem for retry"
                );
            } else {
                info!(
                    subproblem = %sp.id,
                    taxon = %sp.taxon,
                    attempt = sp.attempt,
                    "dispatching subproblem"
                );
            }

            step.records.push(SubproblemRecord::of(sp));
            step.dispatched.push(Job {
                subproblem: sp.id.clone(),
                attempt: sp.attempt,
                request,
                resources: self.resources,
                submitted_at_ms: now_wall,
                handle: None,
            });
        }

        step
    }

    /// Record that the backend accepted `id`'s current attempt.
    pub fn mark_submitted(
        &mut self,
        id: &SubproblemId,
        attempt: u32,
        handle: BackendHandle,
    ) -> Option<SubproblemRecord> {
        let idx = *self.index.get(id)?;
        let sp = &mut self.run.subproblems[idx];
        if sp.attempt != attempt || !sp.state.is_in_flight() {
            warn!(subproblem = %id, attempt, "submission for stale attempt; ignoring");
            return None;
        }
        debug!(subproblem = %id, attempt, handle = %handle, "backend accepted job");
        sp.state = SubproblemState::Running;
        sp.handle = Some(handle);
        sp.touch();
        Some(SubproblemRecord::of(sp))
    }

    /// Apply the outcome of `id`'s attempt number `attempt`.
    pub fn step_completion(
        &mut self,
        id: &SubproblemId,
        attempt: u32,
        outcome: JobOutcome,
        now: Instant,
    ) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let Some(&idx) = self.index.get(id) else {
            warn!(subproblem = %id, "completion for unknown subproblem; ignoring");
            return step;
        };

        {
            let sp = &self.run.subproblems[idx];
            if !sp.state.is_in_flight() || sp.attempt != attempt {
                warn!(
                    subproblem = %id,
                    attempt,
                    current_attempt = sp.attempt,
                    state = ?sp.state,
                    "completion for stale attempt; ignoring"
                );
                return step;
            }
        }

        let retry = self.retry;
        let sp = &mut self.run.subproblems[idx];
        let wall = now_ms();
        sp.times.updated_at_ms = wall;

        match outcome {
            JobOutcome::Succeeded(result) => {
                info!(subproblem = %sp.id, attempt, result = %result, "subproblem succeeded");
                sp.state = SubproblemState::Succeeded;
                sp.result = Some(result);
                sp.last_failure = None;
                sp.times.finished_at_ms = Some(wall);
                step.records.push(SubproblemRecord::of(sp));
            }
            JobOutcome::Failed(failure) if failure.is_retriable() && retry.allows_retry(attempt) => {
                let delay = retry.backoff.delay(attempt);
                warn!(
                    subproblem = %sp.id,
                    attempt,
                    retry_limit = retry.retry_limit,
                    delay_ms = delay.as_millis() as u64,
                    reason = %failure.reason,
                    "transient failure; will retry"
                );
                sp.state = SubproblemState::Pending;
                sp.handle = None;
                sp.last_failure = Some(failure.to_string());
                step.records.push(SubproblemRecord::of(sp));
                self.eligible_at.insert(id.clone(), now + delay);
            }
            JobOutcome::Failed(failure) => {
                warn!(
                    subproblem = %sp.id,
                    attempt,
                    reason = %failure,
                    "subproblem failed; abandoning dependents"
                );
                sp.state = SubproblemState::Failed;
                sp.last_failure = Some(failure.to_string());
                sp.times.finished_at_ms = Some(wall);
                step.records.push(SubproblemRecord::of(sp));
                step.newly_failed.push(id.clone());

                let abandoned = self.manager().mark_dependents_abandoned(id);
                for dep in &abandoned {
                    if let Some(sp) = self.subproblem(dep) {
                        step.records.push(SubproblemRecord::of(sp));
                    }
                }
                step.newly_abandoned = abandoned;
            }
        }

        step.run_just_finished = self.is_finished();
        step
    }

    /// Abandon everything that has not finished (cancellation, stall).
    pub fn abandon_unfinished(&mut self, reason: &str) -> SchedulerStep {
        let abandoned = self.manager().abandon_unfinished(reason);
        let mut step = SchedulerStep::default();
        for id in &abandoned {
            if let Some(sp) = self.subproblem(id) {
                step.records.push(SubproblemRecord::of(sp));
            }
        }
        step.newly_abandoned = abandoned;
        step.run_just_finished = self.is_finished();
        step
    }

    /// Take over one stored record at startup.
    pub fn restore(&mut self, record: &SubproblemRecord) -> Restored {
        let Some(&idx) = self.index.get(&record.id) else {
            warn!(subproblem = %record.id, "stored record for unknown subproblem; ignoring");
            return Restored::Ignored;
        };
        let sp = &mut self.run.subproblems[idx];
        sp.attempt = record.attempt;
        sp.times = record.times;

        match record.state {
            SubproblemState::Succeeded if record.result.is_some() => {
                sp.state = SubproblemState::Succeeded;
                sp.result = record.result.clone();
                sp.handle = record.handle.clone();
                sp.last_failure = None;
                Restored::Kept
            }
            SubproblemState::Pending | SubproblemState::Ready => {
                sp.state = SubproblemState::Pending;
                sp.last_failure = record.failure.clone();
                Restored::Kept
            }
            SubproblemState::Dispatched | SubproblemState::Running if record.handle.is_some() => {
                sp.state = SubproblemState::Running;
                sp.handle = record.handle.clone();
                Restored::InFlight
            }
            SubproblemState::Dispatched | SubproblemState::Running | SubproblemState::Succeeded => {
                // Dispatched without a handle, or succeeded without a
                // result: the outcome is unknown, run it again.
                sp.state = SubproblemState::Pending;
                sp.handle = None;
                sp.last_failure = Some(format!(
                    "recovered from stored state {:?} with unknown outcome",
                    record.state
                ));
                sp.touch();
                Restored::Requeued(SubproblemRecord::of(sp))
            }
            SubproblemState::Failed | SubproblemState::Abandoned => {
                // A resumed run gets a fresh retry budget.
                sp.state = SubproblemState::Pending;
                sp.attempt = 0;
                sp.result = None;
                sp.handle = None;
                sp.last_failure = None;
                sp.times.dispatched_at_ms = None;
                sp.times.finished_at_ms = None;
                sp.touch();
                Restored::Requeued(SubproblemRecord::of(sp))
            }
        }
    }

    /// Put an in-flight subproblem whose job was lost back to `Pending`; it
    /// runs again at its next attempt number.
    pub fn requeue_lost(&mut self, id: &SubproblemId, reason: &str) -> Option<SubproblemRecord> {
        let idx = *self.index.get(id)?;
        let sp = &mut self.run.subproblems[idx];
        if !sp.state.is_in_flight() {
            return None;
        }
        sp.state = SubproblemState::Pending;
        sp.handle = None;
        sp.last_failure = Some(reason.to_string());
        sp.touch();
        Some(SubproblemRecord::of(sp))
    }
}
