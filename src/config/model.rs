// src/config/model.rs

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::engine::{Backoff, OrchestratorOptions, RetryPolicy};
use crate::exec::cluster::ClusterSettings;
use crate::exec::ResourceRequirements;
use crate::tree::GuideTree;
use crate::types::{BackendKind, BackoffKind, GenomeSet, StoreMode, TopologyOptions};

/// Experiment file as read from TOML, before validation.
///
/// ```toml
/// [project]
/// tree = "((human,chimp),(mouse,rat));"
/// use_outgroup = true
///
/// [genomes]
/// human = "data/human.fa"
///
/// [backend]
/// kind = "local"
///
/// [backend.local]
/// command = "align_node --request {request} --out {output}"
/// ```
///
/// Everything except `[project].tree` has a default.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    pub project: ProjectSection,

    /// Leaf name to sequence file.
    #[serde(default)]
    pub genomes: GenomeSet,

    #[serde(default)]
    pub orchestrator: OrchestratorSection,

    #[serde(default)]
    pub store: StoreSection,

    #[serde(default)]
    pub backend: BackendSection,

    #[serde(default)]
    pub resources: ResourceRequirements,
}

/// `[project]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectSection {
    /// Guide tree in Newick format.
    pub tree: String,

    #[serde(default)]
    pub use_outgroup: bool,

    #[serde(default)]
    pub self_alignment: bool,

    #[serde(default = "default_max_outgroups")]
    pub max_outgroups: usize,

    /// Restrict outgroup candidates to these taxa.
    #[serde(default)]
    pub outgroups: Vec<String>,

    /// Where requests and results go. When absent, `work` inside a file
    /// store's directory, or a temporary directory with a memory store.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

fn default_max_outgroups() -> usize {
    1
}

/// `[orchestrator]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    /// Maximum attempts per subproblem.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub backoff: BackoffKind,

    /// Fixed delay, or the base delay of exponential backoff.
    #[serde(default)]
    pub backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Per-attempt timeout (local backend only).
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,
}

fn default_retry_limit() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
            poll_interval_ms: default_poll_interval_ms(),
            backoff: BackoffKind::default(),
            backoff_ms: 0,
            max_backoff_ms: default_max_backoff_ms(),
            job_timeout_secs: None,
        }
    }
}

/// `[store]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default)]
    pub mode: StoreMode,

    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(".progressive/jobs")
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            mode: StoreMode::default(),
            dir: default_store_dir(),
        }
    }
}

/// `[backend]` section with its per-kind subsections.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSection {
    #[serde(default)]
    pub kind: BackendKind,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default)]
    pub local: Option<LocalSection>,

    #[serde(default)]
    pub cluster: Option<ClusterSection>,
}

fn default_max_concurrency() -> usize {
    4
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            max_concurrency: default_max_concurrency(),
            local: None,
            cluster: None,
        }
    }
}

/// `[backend.local]`.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalSection {
    /// Executor command template (`{request}`, `{output}`, ...).
    pub command: String,

    /// Exit codes meaning "do not retry".
    #[serde(default)]
    pub permanent_exit_codes: Vec<i32>,
}

/// `[backend.cluster]`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterSection {
    pub submit: String,
    pub status: String,
    pub cancel: String,
    pub command: String,

    #[serde(default = "default_handle_pattern")]
    pub handle_pattern: String,

    #[serde(default = "default_succeeded_states")]
    pub succeeded_states: Vec<String>,

    #[serde(default = "default_failed_states")]
    pub failed_states: Vec<String>,

    #[serde(default = "default_permanent_states")]
    pub permanent_states: Vec<String>,

    /// Status queries in a row that may fail or print no state before a
    /// job counts as lost.
    #[serde(default = "default_status_grace")]
    pub status_grace: u32,
}

fn default_handle_pattern() -> String {
    r"^(\S+)".to_string()
}

fn default_succeeded_states() -> Vec<String> {
    vec!["COMPLETED".to_string()]
}

fn default_failed_states() -> Vec<String> {
    ["FAILED", "TIMEOUT", "NODE_FAIL", "PREEMPTED", "CANCELLED"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_permanent_states() -> Vec<String> {
    vec!["OUT_OF_MEMORY".to_string()]
}

fn default_status_grace() -> u32 {
    5
}

/// Values given on the command line that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub backend: Option<BackendKind>,
    pub use_outgroup: Option<bool>,
    pub self_alignment: Option<bool>,
    pub max_concurrency: Option<usize>,
    pub retry_limit: Option<u32>,
    pub store_dir: Option<PathBuf>,
}

impl RawConfigFile {
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(kind) = overrides.backend {
            self.backend.kind = kind;
        }
        if let Some(v) = overrides.use_outgroup {
            self.project.use_outgroup = v;
        }
        if let Some(v) = overrides.self_alignment {
            self.project.self_alignment = v;
        }
        if let Some(v) = overrides.max_concurrency {
            self.backend.max_concurrency = v;
        }
        if let Some(v) = overrides.retry_limit {
            self.orchestrator.retry_limit = v;
        }
        if let Some(dir) = &overrides.store_dir {
            self.store.dir = dir.clone();
        }
    }

    /// Make relative genome, store and work paths relative to `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        for path in self.genomes.values_mut() {
            resolve(path);
        }
        resolve(&mut self.store.dir);
        if let Some(dir) = self.project.work_dir.as_mut() {
            resolve(dir);
        }
    }
}

/// Validated experiment configuration.
///
/// Built from [`RawConfigFile`] via `TryFrom` (see `validate.rs`).
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub tree: GuideTree,
    pub genomes: GenomeSet,
    pub topology: TopologyOptions,
    pub work_dir: Option<PathBuf>,
    pub orchestrator: OrchestratorSection,
    pub store: StoreSection,
    pub backend: BackendSection,
    pub resources: ResourceRequirements,
    pub(crate) handle_pattern: Option<Regex>,
}

impl ConfigFile {
    pub fn retry_policy(&self) -> RetryPolicy {
        let base = Duration::from_millis(self.orchestrator.backoff_ms);
        let backoff = match self.orchestrator.backoff {
            BackoffKind::Fixed => Backoff::Fixed(base),
            BackoffKind::Exponential => Backoff::Exponential {
                base,
                max: Duration::from_millis(self.orchestrator.max_backoff_ms),
            },
        };
        RetryPolicy {
            retry_limit: self.orchestrator.retry_limit,
            backoff,
        }
    }

    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            retry: self.retry_policy(),
            poll_interval: Duration::from_millis(self.orchestrator.poll_interval_ms),
            resources: self.resources,
        }
    }

    /// Work directory that outlives the process, if the run has one.
    ///
    /// Results recorded in a file store must still exist when the run is
    /// resumed, so a file store without a configured work directory keeps
    /// its results next to its records.
    pub fn durable_work_dir(&self) -> Option<PathBuf> {
        match (&self.work_dir, self.store.mode) {
            (Some(dir), _) => Some(dir.clone()),
            (None, StoreMode::File) => Some(self.store.dir.join("work")),
            (None, StoreMode::Memory) => None,
        }
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.orchestrator.job_timeout_secs.map(Duration::from_secs)
    }

    /// Cluster backend settings with requests and outputs under `work_dir`.
    pub fn cluster_settings(&self, work_dir: &Path) -> Option<ClusterSettings> {
        let section = self.backend.cluster.as_ref()?;
        let handle_pattern = self.handle_pattern.clone()?;
        Some(ClusterSettings {
            submit: section.submit.clone(),
            status: section.status.clone(),
            cancel: section.cancel.clone(),
            command: section.command.clone(),
            handle_pattern,
            succeeded_states: section.succeeded_states.clone(),
            failed_states: section.failed_states.clone(),
            permanent_states: section.permanent_states.clone(),
            status_grace: section.status_grace,
            max_concurrency: self.backend.max_concurrency,
            work_dir: work_dir.to_path_buf(),
        })
    }
}
