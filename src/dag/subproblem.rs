// src/dag/subproblem.rs

//! Subproblem metadata and lifecycle state.

use std::fmt;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::exec::BackendHandle;
use crate::tree::NodeId;

/// Stable identifier of a subproblem, derived from its node's position in the
/// guide tree (`root`, `root.0`, `root.0.1`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubproblemId(String);

impl SubproblemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubproblemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubproblemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque handle to the output of a succeeded subproblem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultRef(pub String);

impl ResultRef {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a subproblem.
///
/// `Ready` is an in-memory refinement of `Pending` (all dependencies have
/// succeeded) and is never required to be on disk; a stored `Ready` is read
/// back as `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubproblemState {
    Pending,
    Ready,
    Dispatched,
    Running,
    Succeeded,
    Failed,
    Abandoned,
}

impl SubproblemState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubproblemState::Succeeded | SubproblemState::Failed | SubproblemState::Abandoned
        )
    }

    /// Submitted to (or about to be submitted to) a backend.
    pub fn is_in_flight(self) -> bool {
        matches!(self, SubproblemState::Dispatched | SubproblemState::Running)
    }

    /// Not yet started in the current attempt cycle.
    pub fn is_unstarted(self) -> bool {
        matches!(self, SubproblemState::Pending | SubproblemState::Ready)
    }
}

/// One input sequence set of a subproblem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InputRef {
    /// Raw genome of an extant leaf taxon.
    Genome {
        taxon: String,
        path: PathBuf,
        branch_length: Option<f64>,
    },
    /// Output of another subproblem.
    Subproblem {
        taxon: String,
        id: SubproblemId,
        branch_length: Option<f64>,
    },
}

impl InputRef {
    pub fn taxon(&self) -> &str {
        match self {
            InputRef::Genome { taxon, .. } | InputRef::Subproblem { taxon, .. } => taxon,
        }
    }

    pub fn branch_length(&self) -> Option<f64> {
        match self {
            InputRef::Genome { branch_length, .. } | InputRef::Subproblem { branch_length, .. } => {
                *branch_length
            }
        }
    }

    /// The subproblem this input waits on, if it is not a raw genome.
    pub fn dependency(&self) -> Option<&SubproblemId> {
        match self {
            InputRef::Genome { .. } => None,
            InputRef::Subproblem { id, .. } => Some(id),
        }
    }
}

/// What the executor is asked to align for one subproblem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentTarget {
    /// Merge the ingroup inputs (with outgroups as references).
    Progressive,
    /// Compare the merged input set against itself.
    SelfAlignment,
}

/// Wall-clock bookkeeping, in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    pub dispatched_at_ms: Option<u64>,
    pub finished_at_ms: Option<u64>,
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One unit of alignment work, bound to an internal node of the guide tree.
#[derive(Debug, Clone)]
pub struct Subproblem {
    pub id: SubproblemId,
    pub node: NodeId,
    /// Name of the ancestor this subproblem reconstructs.
    pub taxon: String,
    /// Children of the node: the sequence sets being merged.
    pub ingroups: Vec<InputRef>,
    /// Taxa outside the subtree, used as references only.
    pub outgroups: Vec<InputRef>,
    pub self_alignment: bool,
    /// Subproblems whose output this one consumes; children first, then
    /// internal outgroups.
    pub depends_on: Vec<SubproblemId>,

    pub state: SubproblemState,
    /// Number of dispatches so far.
    pub attempt: u32,
    pub result: Option<ResultRef>,
    pub handle: Option<BackendHandle>,
    pub last_failure: Option<String>,
    pub times: Timestamps,
}

impl Subproblem {
    pub fn alignment_targets(&self) -> Vec<AlignmentTarget> {
        let mut targets = vec![AlignmentTarget::Progressive];
        if self.self_alignment {
            targets.push(AlignmentTarget::SelfAlignment);
        }
        targets
    }

    pub(crate) fn touch(&mut self) {
        self.times.updated_at_ms = now_ms();
    }
}
