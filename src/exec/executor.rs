// src/exec/executor.rs

//! The subproblem executor seam and the command-running executor.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tracing::{info, warn};

use crate::dag::{ResultRef, SubproblemId};
use crate::exec::shell::{render, run_shell};
use crate::exec::{ExecutionFailure, ExecutionRequest};

/// Boxed future returned by [`SubproblemExecutor::execute`].
pub type ExecutorFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ResultRef, ExecutionFailure>> + Send + 'a>>;

/// Performs the alignment for one subproblem.
///
/// Must be safe to invoke again with the same request: after a crash the
/// orchestrator re-executes anything whose outcome was not recorded.
pub trait SubproblemExecutor: Send + Sync {
    fn execute<'a>(&'a self, request: &'a ExecutionRequest) -> ExecutorFuture<'a>;
}

/// Where one attempt keeps its request document and its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptPaths {
    pub request: PathBuf,
    pub output: PathBuf,
}

/// Deterministic per-attempt paths under `work_dir`, so a job found again
/// after a restart resolves to the same output location.
pub fn attempt_paths(work_dir: &Path, id: &SubproblemId, attempt: u32) -> AttemptPaths {
    let stem: String = id
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    AttemptPaths {
        request: work_dir
            .join("requests")
            .join(format!("{stem}.attempt-{attempt}.json")),
        output: work_dir
            .join("results")
            .join(format!("{stem}.attempt-{attempt}")),
    }
}

fn io_failure(what: &str, err: impl std::fmt::Display) -> ExecutionFailure {
    ExecutionFailure::transient(format!("{what}: {err}"))
}

/// Write the request JSON for one attempt, creating directories as needed.
pub(crate) async fn write_request(
    paths: &AttemptPaths,
    request: &ExecutionRequest,
) -> Result<(), ExecutionFailure> {
    for dir in [paths.request.parent(), paths.output.parent()].into_iter().flatten() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| io_failure(&format!("creating {dir:?}"), e))?;
    }
    let bytes = serde_json::to_vec_pretty(request).map_err(|e| io_failure("encoding request", e))?;
    tokio::fs::write(&paths.request, bytes)
        .await
        .map_err(|e| io_failure(&format!("writing {:?}", paths.request), e))?;
    Ok(())
}

/// Runs a shell command per subproblem.
///
/// The request is written as JSON to `{request}`; the command is expected to
/// leave its result at `{output}`. Both placeholders (plus `{subproblem}`,
/// `{attempt}` and `{taxon}`) are substituted into the template as quoted
/// shell words and exported as `PROGRESSIVE_*` environment variables.
///
/// Exit code 0 is success, a code listed in `permanent_exit_codes` is a
/// permanent failure, anything else (including death by signal) is
/// transient.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    template: String,
    work_dir: PathBuf,
    permanent_exit_codes: Vec<i32>,
}

impl CommandExecutor {
    pub fn new(template: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            template: template.into(),
            work_dir: work_dir.into(),
            permanent_exit_codes: Vec::new(),
        }
    }

    pub fn with_permanent_exit_codes(mut self, codes: Vec<i32>) -> Self {
        self.permanent_exit_codes = codes;
        self
    }

    async fn run(&self, request: &ExecutionRequest) -> Result<ResultRef, ExecutionFailure> {
        let paths = attempt_paths(&self.work_dir, &request.subproblem, request.attempt);
        write_request(&paths, request).await?;

        let request_path = paths.request.to_string_lossy().into_owned();
        let output_path = paths.output.to_string_lossy().into_owned();
        let attempt = request.attempt.to_string();
        let cmd = render(
            &self.template,
            &[
                ("request", request_path.as_str()),
                ("output", output_path.as_str()),
                ("subproblem", request.subproblem.as_str()),
                ("attempt", attempt.as_str()),
                ("taxon", request.taxon.as_str()),
            ],
        );
        let envs = [
            ("PROGRESSIVE_SUBPROBLEM", request.subproblem.to_string()),
            ("PROGRESSIVE_ATTEMPT", attempt.clone()),
            ("PROGRESSIVE_TAXON", request.taxon.clone()),
            ("PROGRESSIVE_REQUEST", request_path.clone()),
            ("PROGRESSIVE_OUTPUT", output_path.clone()),
        ];

        info!(
            subproblem = %request.subproblem,
            attempt = request.attempt,
            cmd = %cmd,
            "starting executor command"
        );

        let output = run_shell(&cmd, &envs, None)
            .await
            .map_err(|e| ExecutionFailure::transient(format!("{e:#}")))?;

        match output.code {
            Some(0) => {
                info!(
                    subproblem = %request.subproblem,
                    attempt = request.attempt,
                    "executor command succeeded"
                );
                Ok(ResultRef::new(output_path))
            }
            Some(code) if self.permanent_exit_codes.contains(&code) => {
                warn!(subproblem = %request.subproblem, exit_code = code, "executor reported permanent failure");
                Err(ExecutionFailure::permanent(describe_exit(Some(code), &output.stderr)))
            }
            code => {
                warn!(subproblem = %request.subproblem, exit_code = ?code, "executor command failed");
                Err(ExecutionFailure::transient(describe_exit(code, &output.stderr)))
            }
        }
    }
}

fn describe_exit(code: Option<i32>, stderr: &str) -> String {
    let head = match code {
        Some(code) => format!("exit code {code}"),
        None => "killed by signal".to_string(),
    };
    match stderr.lines().rev().find(|l| !l.trim().is_empty()) {
        Some(last) => format!("{head}: {}", last.trim()),
        None => head,
    }
}

impl SubproblemExecutor for CommandExecutor {
    fn execute<'a>(&'a self, request: &'a ExecutionRequest) -> ExecutorFuture<'a> {
        Box::pin(self.run(request))
    }
}
