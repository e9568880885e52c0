#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use progressive::config::{
    BackendSection, ClusterSection, ConfigFile, LocalSection, OrchestratorSection,
    ProjectSection, RawConfigFile, StoreSection,
};
use progressive::dag::ProjectRun;
use progressive::decompose::decompose;
use progressive::engine::{Backoff, OrchestratorOptions, RetryPolicy};
use progressive::errors::Result;
use progressive::exec::ResourceRequirements;
use progressive::tree::GuideTree;
use progressive::types::{BackendKind, GenomeSet, TopologyOptions};

/// A genome file path for every leaf of `tree`.
pub fn genome_set(tree: &GuideTree) -> GenomeSet {
    tree.leaves()
        .into_iter()
        .filter_map(|id| tree.name(id))
        .map(|name| (name.to_string(), PathBuf::from(format!("genomes/{name}.fa"))))
        .collect()
}

/// Parse and decompose `newick` with generated genome paths.
pub fn project(newick: &str, options: TopologyOptions) -> ProjectRun {
    let tree = GuideTree::parse(newick).expect("test tree should parse");
    let genomes = genome_set(&tree);
    decompose(&tree, &genomes, &options).expect("test tree should decompose")
}

/// Topology flags in one call.
pub fn topology(use_outgroup: bool, self_alignment: bool) -> TopologyOptions {
    TopologyOptions {
        use_outgroup,
        self_alignment,
        ..TopologyOptions::default()
    }
}

/// Orchestrator options that poll fast and never back off.
pub fn fast_options(retry_limit: u32) -> OrchestratorOptions {
    OrchestratorOptions {
        retry: RetryPolicy {
            retry_limit,
            backoff: Backoff::Fixed(Duration::ZERO),
        },
        poll_interval: Duration::from_millis(2),
        resources: ResourceRequirements::default(),
    }
}

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts from a local backend running `true` with genomes for every leaf.
pub struct ConfigBuilder {
    raw: RawConfigFile,
}

impl ConfigBuilder {
    pub fn new(tree: &str) -> Self {
        let genomes = GuideTree::parse(tree)
            .map(|t| genome_set(&t))
            .unwrap_or_default();

        Self {
            raw: RawConfigFile {
                project: ProjectSection {
                    tree: tree.to_string(),
                    use_outgroup: false,
                    self_alignment: false,
                    max_outgroups: 1,
                    outgroups: Vec::new(),
                    work_dir: None,
                },
                genomes,
                orchestrator: OrchestratorSection::default(),
                store: StoreSection::default(),
                backend: BackendSection {
                    local: Some(LocalSection {
                        command: "true".to_string(),
                        permanent_exit_codes: Vec::new(),
                    }),
                    ..BackendSection::default()
                },
                resources: ResourceRequirements::default(),
            },
        }
    }

    pub fn use_outgroup(mut self, val: bool) -> Self {
        self.raw.project.use_outgroup = val;
        self
    }

    pub fn self_alignment(mut self, val: bool) -> Self {
        self.raw.project.self_alignment = val;
        self
    }

    pub fn max_outgroups(mut self, n: usize) -> Self {
        self.raw.project.max_outgroups = n;
        self
    }

    pub fn retry_limit(mut self, n: u32) -> Self {
        self.raw.orchestrator.retry_limit = n;
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.raw.backend.max_concurrency = n;
        self
    }

    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.raw.backend.kind = kind;
        self
    }

    pub fn without_local_section(mut self) -> Self {
        self.raw.backend.local = None;
        self
    }

    pub fn cluster(mut self, section: ClusterSection) -> Self {
        self.raw.backend.cluster = Some(section);
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.raw
    }

    pub fn build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.raw)
    }
}
