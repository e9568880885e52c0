// src/config/validate.rs

use regex::Regex;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{ProgressiveError, Result};
use crate::tree::GuideTree;
use crate::types::{BackendKind, TopologyOptions};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = ProgressiveError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let tree = GuideTree::parse(&raw.project.tree)?;
        validate_orchestrator(&raw)?;
        validate_topology(&raw)?;
        let handle_pattern = validate_backend(&raw)?;

        let topology = TopologyOptions {
            use_outgroup: raw.project.use_outgroup,
            self_alignment: raw.project.self_alignment,
            max_outgroups: raw.project.max_outgroups,
            outgroups: raw.project.outgroups.clone(),
        };

        Ok(ConfigFile {
            tree,
            genomes: raw.genomes,
            topology,
            work_dir: raw.project.work_dir,
            orchestrator: raw.orchestrator,
            store: raw.store,
            backend: raw.backend,
            resources: raw.resources,
            handle_pattern,
        })
    }
}

fn validate_orchestrator(cfg: &RawConfigFile) -> Result<()> {
    if cfg.orchestrator.retry_limit == 0 {
        return Err(ProgressiveError::config(
            "[orchestrator].retry_limit must be >= 1 (got 0)",
        ));
    }
    if cfg.orchestrator.poll_interval_ms == 0 {
        return Err(ProgressiveError::config(
            "[orchestrator].poll_interval_ms must be >= 1 (got 0)",
        ));
    }
    if cfg.orchestrator.job_timeout_secs == Some(0) {
        return Err(ProgressiveError::config(
            "[orchestrator].job_timeout_secs must be >= 1 when set",
        ));
    }
    Ok(())
}

fn validate_topology(cfg: &RawConfigFile) -> Result<()> {
    if cfg.project.use_outgroup && cfg.project.max_outgroups == 0 {
        return Err(ProgressiveError::config(
            "[project].max_outgroups must be >= 1 when use_outgroup is set",
        ));
    }
    Ok(())
}

/// Returns the compiled cluster handle pattern, if a cluster section exists.
fn validate_backend(cfg: &RawConfigFile) -> Result<Option<Regex>> {
    if cfg.backend.max_concurrency == 0 {
        return Err(ProgressiveError::config(
            "[backend].max_concurrency must be >= 1 (got 0)",
        ));
    }

    match cfg.backend.kind {
        BackendKind::Local if cfg.backend.local.is_none() => {
            return Err(ProgressiveError::config(
                "backend kind 'local' requires a [backend.local] section",
            ));
        }
        BackendKind::Cluster if cfg.backend.cluster.is_none() => {
            return Err(ProgressiveError::config(
                "backend kind 'cluster' requires a [backend.cluster] section",
            ));
        }
        _ => {}
    }

    let Some(cluster) = &cfg.backend.cluster else {
        return Ok(None);
    };
    let pattern = Regex::new(&cluster.handle_pattern).map_err(|e| {
        ProgressiveError::config(format!(
            "[backend.cluster].handle_pattern is not a valid regex: {e}"
        ))
    })?;
    Ok(Some(pattern))
}
