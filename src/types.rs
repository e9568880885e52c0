// src/types.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Genome name (a leaf taxon of the guide tree) to its sequence data.
pub type GenomeSet = BTreeMap<String, PathBuf>;

/// Per-run topology flags consumed by the decomposer.
///
/// Immutable once a run starts; it is part of the run fingerprint, so
/// changing it invalidates a stored run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyOptions {
    /// Give every subproblem one or more taxa from outside its subtree.
    pub use_outgroup: bool,
    /// Additionally align each subproblem's merged input against itself.
    pub self_alignment: bool,
    /// How many outgroups each subproblem receives when `use_outgroup` is set.
    pub max_outgroups: usize,
    /// If non-empty, only these taxa may be chosen as outgroups.
    pub outgroups: Vec<String>,
}

impl Default for TopologyOptions {
    fn default() -> Self {
        Self {
            use_outgroup: false,
            self_alignment: false,
            max_outgroups: 1,
            outgroups: Vec::new(),
        }
    }
}

/// Which batch backend executes subproblems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Bounded in-process worker pool.
    #[serde(alias = "singlemachine")]
    Local,
    /// External job-queueing service driven through shell commands.
    Cluster,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Local
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "singlemachine" => Ok(BackendKind::Local),
            "cluster" => Ok(BackendKind::Cluster),
            other => Err(format!(
                "invalid backend kind: {other} (expected \"local\" or \"cluster\")"
            )),
        }
    }
}

/// Where job records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// One JSON file per subproblem under the store directory.
    File,
    /// In memory only (lost on restart).
    Memory,
}

impl Default for StoreMode {
    fn default() -> Self {
        StoreMode::File
    }
}

/// Delay policy between attempts of a transiently failing subproblem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

impl Default for BackoffKind {
    fn default() -> Self {
        BackoffKind::Fixed
    }
}
