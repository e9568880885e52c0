// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod decompose;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod store;
pub mod tree;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::{ProjectRun, RunState};
use crate::engine::{CancelHandle, Orchestrator};
use crate::exec::{BatchBackend, ClusterBackend, CommandExecutor, LocalBackend};
use crate::store::open_store;
use crate::types::BackendKind;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - experiment loading and decomposition
/// - the run-scoped work directory
/// - job record store and batch backend
/// - the orchestrator
/// - Ctrl-C handling
///
/// Returns an error if the run ends `Failed`.
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config, &args.overrides())
        .with_context(|| format!("loading experiment file {:?}", args.config))?;

    let project = decompose::decompose(&cfg.tree, &cfg.genomes, &cfg.topology)?;

    if args.dry_run {
        print_dry_run(&cfg, &project);
        return Ok(());
    }

    // Dropped (and removed) on every exit path unless kept.
    let (work_dir, _temp) = prepare_work_dir(&cfg, args.keep_work_dir)?;
    info!(work_dir = ?work_dir, "using work directory");

    let store = open_store(cfg.store.mode, cfg.store.dir.clone())?;
    let backend = build_backend(&cfg, &work_dir)?;

    // Ctrl-C → cancel the run.
    let (cancel, cancel_rx) = CancelHandle::new();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("failed to listen for Ctrl+C: {e}");
            return;
        }
        cancel.cancel();
    });

    let orchestrator =
        Orchestrator::new(backend, store, cfg.orchestrator_options()).with_cancel(cancel_rx);
    let run = orchestrator.run(project).await?;

    if let Some(path) = &args.stats {
        run.stats
            .write_json(path)
            .with_context(|| format!("writing statistics to {path:?}"))?;
    }

    match run.state {
        RunState::Completed => {
            match run.root_result() {
                Some(result) => println!("{result}"),
                None => println!("nothing to align (single-genome tree)"),
            }
            Ok(())
        }
        _ => {
            let failing: Vec<String> = run.failing.iter().map(|id| id.to_string()).collect();
            bail!(
                "run failed: {} subproblem(s) failed or were abandoned: {}",
                failing.len(),
                failing.join(", ")
            )
        }
    }
}

/// The durable work directory, or a fresh temporary one for runs that
/// cannot be resumed.
fn prepare_work_dir(cfg: &ConfigFile, keep: bool) -> Result<(PathBuf, Option<TempDir>)> {
    if let Some(dir) = cfg.durable_work_dir() {
        std::fs::create_dir_all(&dir).with_context(|| format!("creating work directory {dir:?}"))?;
        return Ok((dir, None));
    }

    let temp = tempfile::Builder::new()
        .prefix("progressive-")
        .tempdir()
        .context("creating temporary work directory")?;
    if keep {
        let path = temp.into_path();
        warn!(work_dir = ?path, "keeping temporary work directory");
        return Ok((path, None));
    }
    Ok((temp.path().to_path_buf(), Some(temp)))
}

fn build_backend(cfg: &ConfigFile, work_dir: &std::path::Path) -> Result<Box<dyn BatchBackend>> {
    match cfg.backend.kind {
        BackendKind::Local => {
            let Some(local) = &cfg.backend.local else {
                bail!("backend kind 'local' requires a [backend.local] section");
            };
            let executor = CommandExecutor::new(local.command.clone(), work_dir)
                .with_permanent_exit_codes(local.permanent_exit_codes.clone());
            let backend = LocalBackend::new(Arc::new(executor), cfg.backend.max_concurrency)
                .with_timeout(cfg.job_timeout());
            Ok(Box::new(backend))
        }
        BackendKind::Cluster => {
            let Some(settings) = cfg.cluster_settings(work_dir) else {
                bail!("backend kind 'cluster' requires a [backend.cluster] section");
            };
            Ok(Box::new(ClusterBackend::new(settings)))
        }
    }
}

/// Simple dry-run output: print the decomposition.
fn print_dry_run(cfg: &ConfigFile, project: &ProjectRun) {
    println!("progressive dry-run");
    println!("  tree = {}", cfg.tree.to_newick());
    println!("  use_outgroup = {}", cfg.topology.use_outgroup);
    println!("  self_alignment = {}", cfg.topology.self_alignment);
    println!("  backend = {:?} (max_concurrency {})", cfg.backend.kind, cfg.backend.max_concurrency);
    println!("  retry_limit = {}", cfg.orchestrator.retry_limit);
    println!();

    println!("subproblems ({}):", project.subproblems.len());
    for sp in &project.subproblems {
        println!("  - {} ({})", sp.id, sp.taxon);
        let ingroups: Vec<&str> = sp.ingroups.iter().map(|i| i.taxon()).collect();
        println!("      ingroups: {ingroups:?}");
        if !sp.outgroups.is_empty() {
            let outgroups: Vec<&str> = sp.outgroups.iter().map(|i| i.taxon()).collect();
            println!("      outgroups: {outgroups:?}");
        }
        if !sp.depends_on.is_empty() {
            let deps: Vec<&str> = sp.depends_on.iter().map(|d| d.as_str()).collect();
            println!("      depends_on: {deps:?}");
        }
        if sp.self_alignment {
            println!("      self_alignment: true");
        }
    }

    debug!("dry-run complete (no execution)");
}
