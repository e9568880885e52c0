// src/dag/state_manager.rs

//! State transitions that touch more than one subproblem: readiness
//! promotion and the failure cascade.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::dag::graph::SubproblemGraph;
use crate::dag::subproblem::{now_ms, Subproblem, SubproblemId, SubproblemState};

/// Mutable view over the subproblems of one run.
pub struct StateManager<'a> {
    graph: &'a SubproblemGraph,
    subproblems: &'a mut [Subproblem],
    index: &'a HashMap<SubproblemId, usize>,
}

impl<'a> StateManager<'a> {
    pub fn new(
        graph: &'a SubproblemGraph,
        subproblems: &'a mut [Subproblem],
        index: &'a HashMap<SubproblemId, usize>,
    ) -> Self {
        Self {
            graph,
            subproblems,
            index,
        }
    }

    fn read_only(&self) -> ReadOnlyStateManager<'_> {
        ReadOnlyStateManager::new(&*self.subproblems, self.index)
    }

    /// Move every `Pending` subproblem whose dependencies have all succeeded
    /// to `Ready`. Returns the promoted ids.
    pub fn promote_ready(&mut self) -> Vec<SubproblemId> {
        // Decide first, then mutate to avoid borrowing issues.
        let candidates: Vec<usize> = {
            let ro = self.read_only();
            self.subproblems
                .iter()
                .enumerate()
                .filter(|(_, sp)| sp.state == SubproblemState::Pending && ro.deps_satisfied(sp))
                .map(|(idx, _)| idx)
                .collect()
        };

        let mut promoted = Vec::with_capacity(candidates.len());
        for idx in candidates {
            let sp = &mut self.subproblems[idx];
            sp.state = SubproblemState::Ready;
            debug!(subproblem = %sp.id, "dependencies satisfied; marking Ready");
            promoted.push(sp.id.clone());
        }
        promoted
    }

    /// Mark every transitive dependent of `failed` that has not started as
    /// `Abandoned`.
    ///
    /// Returns the newly abandoned ids (excluding `failed` itself).
    pub fn mark_dependents_abandoned(&mut self, failed: &SubproblemId) -> Vec<SubproblemId> {
        let mut stack: Vec<SubproblemId> = self.graph.dependents_of(failed).to_vec();
        let mut visited: HashSet<SubproblemId> = HashSet::new();
        let mut abandoned = Vec::new();
        let now = now_ms();

        while let Some(id) = stack.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            let Some(&idx) = self.index.get(&id) else {
                warn!(subproblem = %id, "dependent missing from subproblem index");
                continue;
            };
            let sp = &mut self.subproblems[idx];
            if sp.state.is_terminal() {
                continue;
            }
            if sp.state.is_in_flight() {
                // A dependent cannot be in flight before its dependency
                // succeeded; leave it alone rather than lose a live job.
                warn!(
                    subproblem = %sp.id,
                    upstream = %failed,
                    "in-flight subproblem downstream of a failure"
                );
                continue;
            }

            sp.state = SubproblemState::Abandoned;
            sp.last_failure = Some(format!("upstream subproblem '{failed}' failed"));
            sp.times.updated_at_ms = now;
            sp.times.finished_at_ms = Some(now);
            debug!(
                subproblem = %sp.id,
                upstream = %failed,
                "marking dependent Abandoned due to upstream failure"
            );
            abandoned.push(sp.id.clone());
            stack.extend(self.graph.dependents_of(&id).iter().cloned());
        }

        abandoned
    }

    /// Abandon every subproblem that has not reached a terminal state.
    pub fn abandon_unfinished(&mut self, reason: &str) -> Vec<SubproblemId> {
        let now = now_ms();
        let mut abandoned = Vec::new();
        for sp in self.subproblems.iter_mut() {
            if sp.state.is_terminal() {
                continue;
            }
            sp.state = SubproblemState::Abandoned;
            sp.last_failure = Some(reason.to_string());
            sp.times.updated_at_ms = now;
            sp.times.finished_at_ms = Some(now);
            abandoned.push(sp.id.clone());
        }
        abandoned
    }
}

/// A read-only view used to check dependency satisfaction.
pub struct ReadOnlyStateManager<'a> {
    subproblems: &'a [Subproblem],
    index: &'a HashMap<SubproblemId, usize>,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(subproblems: &'a [Subproblem], index: &'a HashMap<SubproblemId, usize>) -> Self {
        Self { subproblems, index }
    }

    pub fn get(&self, id: &SubproblemId) -> Option<&'a Subproblem> {
        self.index.get(id).map(|idx| &self.subproblems[*idx])
    }

    /// Whether every dependency of `sp` has succeeded.
    pub fn deps_satisfied(&self, sp: &Subproblem) -> bool {
        sp.depends_on.iter().all(|dep_id| match self.get(dep_id) {
            Some(dep) => dep.state == SubproblemState::Succeeded,
            None => {
                warn!(
                    subproblem = %sp.id,
                    dep = %dep_id,
                    "dependency missing from subproblem index"
                );
                false
            }
        })
    }
}
