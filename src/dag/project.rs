// src/dag/project.rs

//! The whole execution: tree, options, every subproblem and the aggregate
//! outcome.

use blake3::Hasher;
use serde::{Deserialize, Serialize};

use crate::dag::subproblem::{Subproblem, SubproblemId, SubproblemState};
use crate::engine::stats::RunStats;
use crate::tree::GuideTree;
use crate::types::{GenomeSet, TopologyOptions};

/// Aggregate state of a [`ProjectRun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    /// Every subproblem succeeded.
    Completed,
    /// At least one subproblem ended `Failed` or `Abandoned`.
    Failed,
}

#[derive(Debug, Clone)]
pub struct ProjectRun {
    pub tree: GuideTree,
    pub options: TopologyOptions,
    pub genomes: GenomeSet,
    /// Subproblems in post-order of their tree nodes.
    pub subproblems: Vec<Subproblem>,
    pub state: RunState,
    /// Subproblems that ended `Failed` or `Abandoned`, in post-order.
    pub failing: Vec<SubproblemId>,
    pub stats: RunStats,
}

impl ProjectRun {
    pub fn subproblem(&self, id: &SubproblemId) -> Option<&Subproblem> {
        self.subproblems.iter().find(|sp| &sp.id == id)
    }

    pub fn state_of(&self, id: &SubproblemId) -> Option<SubproblemState> {
        self.subproblem(id).map(|sp| sp.state)
    }

    pub fn count_in(&self, state: SubproblemState) -> usize {
        self.subproblems.iter().filter(|sp| sp.state == state).count()
    }

    /// A run with nothing to align (a single-genome tree).
    pub fn is_trivial(&self) -> bool {
        self.subproblems.is_empty()
    }

    /// The root subproblem's result: the alignment of the whole tree.
    pub fn root_result(&self) -> Option<&crate::dag::ResultRef> {
        self.subproblems.last().and_then(|sp| sp.result.as_ref())
    }

    /// Content hash of everything that determines the decomposition.
    ///
    /// Stored alongside job records so a store is never resumed against a
    /// different tree, option set or genome map.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Hasher::new();
        hasher.update(self.tree.to_newick().as_bytes());
        hasher.update(b"\0");
        hasher.update(format!("{:?}", self.options).as_bytes());
        for (name, path) in &self.genomes {
            hasher.update(b"\0");
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(path.to_string_lossy().as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Derive the aggregate state from the subproblem states.
    pub(crate) fn settle(&mut self) {
        self.failing = self
            .subproblems
            .iter()
            .filter(|sp| {
                matches!(
                    sp.state,
                    SubproblemState::Failed | SubproblemState::Abandoned
                )
            })
            .map(|sp| sp.id.clone())
            .collect();

        let all_succeeded = self
            .subproblems
            .iter()
            .all(|sp| sp.state == SubproblemState::Succeeded);

        self.state = if all_succeeded {
            RunState::Completed
        } else if self.subproblems.iter().all(|sp| sp.state.is_terminal()) {
            RunState::Failed
        } else {
            RunState::Running
        };
    }
}
