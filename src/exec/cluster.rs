// src/exec/cluster.rs

//! Batch backend for an external job-queueing service.
//!
//! The service is driven entirely through shell command templates
//! (`sbatch`/`sacct`/`scancel` style). Placeholders:
//!
//! - submit: `{command}`, `{request}`, `{output}`, `{subproblem}`,
//!   `{attempt}`, `{taxon}`, `{cpus}`, `{memory_mb}`
//! - status / cancel: `{handle}`
//! - command (what the queued job runs): `{request}`, `{output}`,
//!   `{subproblem}`, `{attempt}`, `{taxon}`
//!
//! Values are shell-quoted on substitution (see [`render`]).
//!
//! Queueing services are often slow to report a freshly submitted job
//! (`sacct` prints nothing for a while). A status query that fails or
//! reports no state therefore counts as still running, up to
//! `status_grace` consecutive times per handle; only then is the job
//! reported as unknown.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::dag::ResultRef;
use crate::errors::{ProgressiveError, Result};
use crate::exec::backend::{BackendFuture, BatchBackend};
use crate::exec::executor::{attempt_paths, write_request};
use crate::exec::shell::{render, run_shell};
use crate::exec::{BackendHandle, ExecutionFailure, Job, JobStatus};

/// Settings for [`ClusterBackend`].
#[derive(Debug, Clone)]
pub struct ClusterSettings {
    pub submit: String,
    pub status: String,
    pub cancel: String,
    pub command: String,
    /// Extracts the handle from submit's stdout (first capture group, or the
    /// whole match).
    pub handle_pattern: Regex,
    pub succeeded_states: Vec<String>,
    /// Failures worth retrying.
    pub failed_states: Vec<String>,
    /// Failures not worth retrying.
    pub permanent_states: Vec<String>,
    /// Consecutive inconclusive status queries tolerated per handle.
    pub status_grace: u32,
    pub max_concurrency: usize,
    /// Request documents and outputs live here; must be visible to the
    /// cluster's workers.
    pub work_dir: PathBuf,
}

pub struct ClusterBackend {
    settings: ClusterSettings,
    /// Inconclusive status queries in a row, by handle.
    misses: Mutex<HashMap<BackendHandle, u32>>,
}

impl ClusterBackend {
    pub fn new(settings: ClusterSettings) -> Self {
        Self {
            settings,
            misses: Mutex::new(HashMap::new()),
        }
    }

    /// Count an inconclusive status query for `handle`. Returns whether the
    /// job is still within its grace.
    fn note_miss(&self, handle: &BackendHandle) -> bool {
        let mut misses = self.misses.lock().unwrap_or_else(|e| e.into_inner());
        let count = misses.entry(handle.clone()).or_insert(0);
        *count += 1;
        if *count <= self.settings.status_grace {
            true
        } else {
            misses.remove(handle);
            false
        }
    }

    fn clear_misses(&self, handle: &BackendHandle) {
        self.misses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(handle);
    }

    fn extract_handle(&self, stdout: &str) -> Option<BackendHandle> {
        let caps = self.settings.handle_pattern.captures(stdout.trim())?;
        let m = caps.get(1).or_else(|| caps.get(0))?;
        let handle = m.as_str().trim();
        if handle.is_empty() {
            None
        } else {
            Some(BackendHandle(handle.to_string()))
        }
    }

    /// Map the status command's output to a job status.
    ///
    /// The first token of the first non-empty line is the state; a trailing
    /// `+` (as printed for truncated names) is ignored. Unlisted states are
    /// treated as still running.
    pub fn classify(&self, stdout: &str, job: &Job) -> Option<JobStatus> {
        let state = stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())?
            .split_whitespace()
            .next()?
            .trim_end_matches('+')
            .to_uppercase();

        let listed = |states: &[String]| states.iter().any(|s| s.eq_ignore_ascii_case(&state));

        let status = if listed(&self.settings.succeeded_states) {
            let output = attempt_paths(&self.settings.work_dir, &job.subproblem, job.attempt).output;
            JobStatus::succeeded(ResultRef::new(output.to_string_lossy()))
        } else if listed(&self.settings.permanent_states) {
            JobStatus::failed(ExecutionFailure::permanent(format!("cluster job ended {state}")))
        } else if listed(&self.settings.failed_states) {
            JobStatus::failed(ExecutionFailure::transient(format!("cluster job ended {state}")))
        } else {
            JobStatus::Running
        };
        Some(status)
    }

    async fn do_submit(&self, job: &Job) -> Result<BackendHandle> {
        let request = &job.request;
        let paths = attempt_paths(&self.settings.work_dir, &job.subproblem, job.attempt);
        write_request(&paths, request).await.map_err(ProgressiveError::from)?;

        let request_path = paths.request.to_string_lossy().into_owned();
        let output_path = paths.output.to_string_lossy().into_owned();
        let attempt = job.attempt.to_string();
        let cpus = job.resources.cpus.to_string();
        let memory_mb = job.resources.memory_mb.to_string();

        let job_vars = [
            ("request", request_path.as_str()),
            ("output", output_path.as_str()),
            ("subproblem", job.subproblem.as_str()),
            ("attempt", attempt.as_str()),
            ("taxon", request.taxon.as_str()),
        ];
        let command = render(&self.settings.command, &job_vars);

        let mut submit_vars = job_vars.to_vec();
        submit_vars.push(("command", command.as_str()));
        submit_vars.push(("cpus", cpus.as_str()));
        submit_vars.push(("memory_mb", memory_mb.as_str()));
        let submit = render(&self.settings.submit, &submit_vars);

        debug!(subproblem = %job.subproblem, cmd = %submit, "submitting cluster job");
        let out = run_shell(&submit, &[], None)
            .await
            .map_err(|e| ProgressiveError::TransientExecution(format!("{e:#}")))?;
        if !out.success() {
            return Err(ProgressiveError::TransientExecution(format!(
                "submit command exited with {:?}: {}",
                out.code,
                out.stderr.trim()
            )));
        }

        let handle = self.extract_handle(&out.stdout).ok_or_else(|| {
            ProgressiveError::TransientExecution(format!(
                "no job handle in submit output {:?}",
                out.stdout.trim()
            ))
        })?;

        info!(
            backend = "cluster",
            subproblem = %job.subproblem,
            attempt = job.attempt,
            handle = %handle,
            "submitted job"
        );
        Ok(handle)
    }

    async fn do_poll(&self, job: &Job) -> Result<JobStatus> {
        let handle = job
            .handle
            .as_ref()
            .ok_or_else(|| ProgressiveError::UnknownJob(format!("{} (never submitted)", job.subproblem)))?;

        let cmd = render(&self.settings.status, &[("handle", handle.0.as_str())]);
        let status = match run_shell(&cmd, &[], None).await {
            Ok(out) if out.success() => self
                .classify(&out.stdout, job)
                .ok_or_else(|| "no state reported".to_string()),
            Ok(out) => Err(format!("status command exited with {:?}", out.code)),
            Err(e) => Err(format!("{e:#}")),
        };

        match status {
            Ok(status) => {
                self.clear_misses(handle);
                debug!(subproblem = %job.subproblem, handle = %handle, status = ?status, "polled cluster job");
                Ok(status)
            }
            Err(reason) if self.note_miss(handle) => {
                debug!(
                    subproblem = %job.subproblem,
                    handle = %handle,
                    %reason,
                    "status inconclusive; assuming running"
                );
                Ok(JobStatus::Running)
            }
            Err(reason) => {
                warn!(
                    subproblem = %job.subproblem,
                    handle = %handle,
                    grace = self.settings.status_grace,
                    %reason,
                    "no conclusive status within grace"
                );
                Err(ProgressiveError::UnknownJob(format!("{handle}: {reason}")))
            }
        }
    }

    async fn do_cancel(&self, job: &Job) -> Result<()> {
        let Some(handle) = job.handle.as_ref() else {
            return Ok(());
        };
        self.clear_misses(handle);
        let cmd = render(&self.settings.cancel, &[("handle", handle.0.as_str())]);
        match run_shell(&cmd, &[], None).await {
            Ok(out) if out.success() => {
                info!(backend = "cluster", subproblem = %job.subproblem, handle = %handle, "cancelled job");
            }
            Ok(out) => {
                warn!(handle = %handle, exit_code = ?out.code, "cancel command failed");
            }
            Err(e) => {
                warn!(handle = %handle, error = %e, "cancel command could not run");
            }
        }
        Ok(())
    }
}

impl BatchBackend for ClusterBackend {
    fn name(&self) -> &str {
        "cluster"
    }

    fn max_concurrency(&self) -> usize {
        self.settings.max_concurrency.max(1)
    }

    fn submit<'a>(&'a self, job: &'a Job) -> BackendFuture<'a, BackendHandle> {
        Box::pin(self.do_submit(job))
    }

    fn poll<'a>(&'a self, job: &'a Job) -> BackendFuture<'a, JobStatus> {
        Box::pin(self.do_poll(job))
    }

    fn cancel<'a>(&'a self, job: &'a Job) -> BackendFuture<'a, ()> {
        Box::pin(self.do_cancel(job))
    }
}
