// tests/exec_backends.rs

mod common;

use std::sync::Arc;
use std::time::Duration;

use progressive::dag::{AlignmentTarget, SubproblemId};
use progressive::engine::JobOutcome;
use progressive::errors::ProgressiveError;
use progressive::exec::backend::BatchBackend;
use progressive::exec::executor::attempt_paths;
use progressive::exec::{
    BackendHandle, ExecutionRequest, FailureKind, Job, JobStatus, LocalBackend, ResolvedInput,
    ResourceRequirements,
};

use crate::common::{init_tracing, with_timeout, ScriptedExecutor, Step};

fn request(id: &str, attempt: u32) -> ExecutionRequest {
    ExecutionRequest {
        subproblem: SubproblemId::from(id),
        taxon: "anc0".to_string(),
        attempt,
        ingroups: vec![
            ResolvedInput {
                taxon: "A".to_string(),
                location: "genomes/A.fa".to_string(),
                branch_length: Some(0.1),
            },
            ResolvedInput {
                taxon: "B".to_string(),
                location: "genomes/B.fa".to_string(),
                branch_length: None,
            },
        ],
        outgroups: Vec::new(),
        targets: vec![AlignmentTarget::Progressive],
    }
}

fn job(id: &str, attempt: u32) -> Job {
    Job {
        subproblem: SubproblemId::from(id),
        attempt,
        request: request(id, attempt),
        resources: ResourceRequirements::default(),
        submitted_at_ms: 0,
        handle: None,
    }
}

async fn submit<B: BatchBackend>(backend: &B, mut job: Job) -> Job {
    let handle = backend.submit(&job).await.expect("submit");
    job.handle = Some(handle);
    job
}

async fn wait_finished<B: BatchBackend>(backend: &B, job: &Job) -> JobOutcome {
    loop {
        match backend.poll(job).await.expect("poll") {
            JobStatus::Running => tokio::time::sleep(Duration::from_millis(2)).await,
            JobStatus::Finished(outcome) => return outcome,
        }
    }
}

fn failure_kind(outcome: &JobOutcome) -> Option<FailureKind> {
    match outcome {
        JobOutcome::Failed(failure) => Some(failure.kind),
        JobOutcome::Succeeded(_) => None,
    }
}

// ---------------------------------------------------------------------------
// Local backend
// ---------------------------------------------------------------------------

#[tokio::test]
async fn local_backend_reports_executor_outcomes() {
    init_tracing();

    let executor = Arc::new(ScriptedExecutor::new().script("root.1", &[Step::Permanent]));
    let backend = LocalBackend::new(executor.clone(), 2);

    let ok = submit(&backend, job("root.0", 1)).await;
    let bad = submit(&backend, job("root.1", 1)).await;

    let ok_outcome = with_timeout(wait_finished(&backend, &ok)).await;
    assert_eq!(
        ok_outcome,
        JobOutcome::Succeeded(ScriptedExecutor::result_for(&SubproblemId::from("root.0")))
    );
    let bad_outcome = with_timeout(wait_finished(&backend, &bad)).await;
    assert_eq!(failure_kind(&bad_outcome), Some(FailureKind::Permanent));

    // A finished job is reported once; the handle is then forgotten.
    assert!(matches!(
        backend.poll(&ok).await,
        Err(ProgressiveError::UnknownJob(_))
    ));
}

#[tokio::test]
async fn local_backend_handles_are_unique() {
    let backend = LocalBackend::new(Arc::new(ScriptedExecutor::new()), 2);
    let a = submit(&backend, job("root.0", 1)).await;
    let b = submit(&backend, job("root.0", 2)).await;
    assert_ne!(a.handle, b.handle);
}

#[tokio::test]
async fn local_backend_rejects_unknown_handles() {
    let backend = LocalBackend::new(Arc::new(ScriptedExecutor::new()), 1);

    let never_submitted = job("root", 1);
    assert!(matches!(
        backend.poll(&never_submitted).await,
        Err(ProgressiveError::UnknownJob(_))
    ));

    let mut foreign = job("root", 1);
    foreign.handle = Some(BackendHandle("local-999".to_string()));
    assert!(matches!(
        backend.poll(&foreign).await,
        Err(ProgressiveError::UnknownJob(_))
    ));
}

#[tokio::test]
async fn local_backend_limits_running_executors() {
    init_tracing();

    let executor = Arc::new(ScriptedExecutor::new().with_delay(Duration::from_millis(5)));
    let backend = LocalBackend::new(executor.clone(), 2);
    assert_eq!(backend.max_concurrency(), 2);

    let mut jobs = Vec::new();
    for i in 0..6 {
        jobs.push(submit(&backend, job(&format!("root.{i}"), 1)).await);
    }
    for job in &jobs {
        let outcome = with_timeout(wait_finished(&backend, job)).await;
        assert!(matches!(outcome, JobOutcome::Succeeded(_)));
    }
    assert!(executor.peak_concurrency() <= 2);
}

#[tokio::test]
async fn local_backend_cancel_stops_the_job() {
    init_tracing();

    let executor = Arc::new(ScriptedExecutor::new().always("root", Step::Hang));
    let backend = LocalBackend::new(executor.clone(), 1);
    let hanging = submit(&backend, job("root", 1)).await;

    with_timeout(executor.wait_for("root")).await;
    assert_eq!(backend.poll(&hanging).await.unwrap(), JobStatus::Running);

    backend.cancel(&hanging).await.unwrap();
    assert!(matches!(
        backend.poll(&hanging).await,
        Err(ProgressiveError::UnknownJob(_))
    ));
    // Cancelling twice is harmless.
    backend.cancel(&hanging).await.unwrap();
}

#[tokio::test]
async fn local_backend_timeout_is_transient() {
    init_tracing();

    let executor = Arc::new(ScriptedExecutor::new().always("root", Step::Hang));
    let backend =
        LocalBackend::new(executor, 1).with_timeout(Some(Duration::from_millis(10)));
    let hanging = submit(&backend, job("root", 1)).await;

    let outcome = with_timeout(wait_finished(&backend, &hanging)).await;
    match outcome {
        JobOutcome::Failed(failure) => {
            assert_eq!(failure.kind, FailureKind::Transient);
            assert!(failure.reason.contains("timed out"), "{}", failure.reason);
        }
        other => panic!("expected timeout failure, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Command executor
// ---------------------------------------------------------------------------

#[cfg(unix)]
mod command_executor {
    use super::*;
    use progressive::exec::executor::SubproblemExecutor;
    use progressive::exec::CommandExecutor;

    #[tokio::test]
    async fn success_returns_output_path_and_writes_request() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let executor = CommandExecutor::new(
            r#"printf '%s %s %s' "$PROGRESSIVE_SUBPROBLEM" {attempt} {taxon} > {output}"#,
            dir.path(),
        );

        let req = request("root.0", 2);
        let result = executor.execute(&req).await.expect("command should succeed");

        let paths = attempt_paths(dir.path(), &req.subproblem, 2);
        assert_eq!(result.as_str(), paths.output.to_string_lossy());
        assert_eq!(std::fs::read_to_string(&paths.output).unwrap(), "root.0 2 anc0");

        let written: ExecutionRequest =
            serde_json::from_str(&std::fs::read_to_string(&paths.request).unwrap()).unwrap();
        assert_eq!(written, req);
    }

    #[tokio::test]
    async fn request_path_is_exported() {
        let dir = tempfile::tempdir().unwrap();
        let executor = CommandExecutor::new(
            r#"test "$PROGRESSIVE_REQUEST" = {request} && test -s "$PROGRESSIVE_REQUEST" && test "$PROGRESSIVE_OUTPUT" = {output}"#,
            dir.path(),
        );
        executor.execute(&request("root", 1)).await.unwrap();
    }

    #[tokio::test]
    async fn placeholder_values_are_single_shell_words() {
        let dir = tempfile::tempdir().unwrap();
        let executor = CommandExecutor::new("printf %s {taxon} > {output}", dir.path());

        let mut req = request("root", 1);
        req.taxon = "it's; touch injected $(touch injected)".to_string();
        executor.execute(&req).await.expect("command should succeed");

        let output = attempt_paths(dir.path(), &req.subproblem, 1).output;
        assert_eq!(std::fs::read_to_string(output).unwrap(), req.taxon);
        assert!(!dir.path().join("injected").exists());
        assert!(!std::path::Path::new("injected").exists());
    }

    #[test]
    fn render_quotes_only_when_needed() {
        use progressive::exec::shell::render;
        assert_eq!(render("run {a} {b}", &[("a", "root.0"), ("b", "x y")]), "run root.0 'x y'");
        assert_eq!(render("echo {v}", &[("v", "")]), "echo ''");
    }

    #[tokio::test]
    async fn nonzero_exit_is_transient_with_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let executor = CommandExecutor::new("echo boom >&2; exit 1", dir.path());

        let failure = executor.execute(&request("root", 1)).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Transient);
        assert_eq!(failure.reason, "exit code 1: boom");
    }

    #[tokio::test]
    async fn listed_exit_code_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let executor = CommandExecutor::new("exit 3", dir.path()).with_permanent_exit_codes(vec![3]);

        let failure = executor.execute(&request("root", 1)).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Permanent);
        assert_eq!(failure.reason, "exit code 3");
    }

    #[tokio::test]
    async fn attempts_do_not_share_paths() {
        let dir = tempfile::tempdir().unwrap();
        let id = SubproblemId::from("root.1");
        let first = attempt_paths(dir.path(), &id, 1);
        let second = attempt_paths(dir.path(), &id, 2);
        assert_ne!(first.output, second.output);
        assert_ne!(first.request, second.request);
        assert!(first.request.starts_with(dir.path().join("requests")));
        assert!(first.output.starts_with(dir.path().join("results")));
    }
}

// ---------------------------------------------------------------------------
// Cluster backend
// ---------------------------------------------------------------------------

mod cluster {
    use super::*;
    use progressive::exec::cluster::{ClusterBackend, ClusterSettings};
    use regex::Regex;

    fn settings(work_dir: &std::path::Path, submit: &str, status: &str) -> ClusterSettings {
        ClusterSettings {
            submit: submit.to_string(),
            status: status.to_string(),
            cancel: "true".to_string(),
            command: "align {request} {output}".to_string(),
            handle_pattern: Regex::new(r"^(\S+)").unwrap(),
            succeeded_states: vec!["COMPLETED".to_string()],
            failed_states: vec!["FAILED".to_string(), "TIMEOUT".to_string()],
            permanent_states: vec!["OUT_OF_MEMORY".to_string()],
            status_grace: 0,
            max_concurrency: 8,
            work_dir: work_dir.to_path_buf(),
        }
    }

    #[test]
    fn classify_maps_queue_states() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ClusterBackend::new(settings(dir.path(), "true", "true"));
        let j = job("root.0", 2);

        let expected_output = attempt_paths(dir.path(), &j.subproblem, 2).output;
        match backend.classify("COMPLETED\n", &j) {
            Some(JobStatus::Finished(JobOutcome::Succeeded(result))) => {
                assert_eq!(result.as_str(), expected_output.to_string_lossy())
            }
            other => panic!("unexpected {other:?}"),
        }

        let kind = |out: &str| match backend.classify(out, &j) {
            Some(JobStatus::Finished(outcome)) => failure_kind(&outcome),
            _ => None,
        };
        assert_eq!(kind("FAILED 1:0"), Some(FailureKind::Transient));
        assert_eq!(kind("  timeout\n"), Some(FailureKind::Transient));
        assert_eq!(kind("OUT_OF_MEMORY+"), Some(FailureKind::Permanent));

        assert_eq!(backend.classify("PENDING", &j), Some(JobStatus::Running));
        assert_eq!(backend.classify("RUNNING\nCOMPLETED", &j), Some(JobStatus::Running));
        assert_eq!(backend.classify("\n  \n", &j), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn submit_extracts_handle_and_writes_request() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let backend = ClusterBackend::new(settings(
            dir.path(),
            "echo job-{subproblem}-{attempt} cpus={cpus} mem={memory_mb}",
            "echo COMPLETED",
        ));

        let submitted = submit(&backend, job("root.0", 1)).await;
        assert_eq!(submitted.handle, Some(BackendHandle("job-root.0-1".to_string())));

        let paths = attempt_paths(dir.path(), &submitted.subproblem, 1);
        assert!(paths.request.is_file());

        let outcome = with_timeout(wait_finished(&backend, &submitted)).await;
        assert!(matches!(outcome, JobOutcome::Succeeded(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn submit_renders_the_job_command_and_resources() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path(), "echo {command} > {output}.cmd; echo {cpus}x{memory_mb}", "true");
        s.handle_pattern = Regex::new(r"^\S+$").unwrap();
        let backend = ClusterBackend::new(s);

        let submitted = submit(&backend, job("root", 1)).await;
        assert_eq!(submitted.handle, Some(BackendHandle("1x2048".to_string())));

        let paths = attempt_paths(dir.path(), &submitted.subproblem, 1);
        let cmd_file = format!("{}.cmd", paths.output.display());
        let rendered = std::fs::read_to_string(cmd_file).unwrap();
        assert_eq!(
            rendered.trim(),
            format!("align {} {}", paths.request.display(), paths.output.display())
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_or_unparsable_submit_is_transient() {
        let dir = tempfile::tempdir().unwrap();

        let failing = ClusterBackend::new(settings(dir.path(), "exit 2", "true"));
        assert!(matches!(
            failing.submit(&job("root", 1)).await,
            Err(ProgressiveError::TransientExecution(_))
        ));

        let mut s = settings(dir.path(), "echo queue is full", "true");
        s.handle_pattern = Regex::new(r"Submitted batch job (\d+)").unwrap();
        let unparsable = ClusterBackend::new(s);
        assert!(matches!(
            unparsable.submit(&job("root", 1)).await,
            Err(ProgressiveError::TransientExecution(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn status_failures_mean_unknown_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut j = job("root", 1);
        j.handle = Some(BackendHandle("42".to_string()));

        let erroring = ClusterBackend::new(settings(dir.path(), "true", "exit 1"));
        assert!(matches!(erroring.poll(&j).await, Err(ProgressiveError::UnknownJob(_))));

        let silent = ClusterBackend::new(settings(dir.path(), "true", "true"));
        assert!(matches!(silent.poll(&j).await, Err(ProgressiveError::UnknownJob(_))));

        let pending = ClusterBackend::new(settings(dir.path(), "true", "echo PENDING {handle}"));
        assert_eq!(pending.poll(&j).await.unwrap(), JobStatus::Running);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_status_is_running_within_grace() {
        let dir = tempfile::tempdir().unwrap();
        let mut j = job("root", 1);
        j.handle = Some(BackendHandle("42".to_string()));

        let mut s = settings(dir.path(), "true", "true");
        s.status_grace = 2;
        let backend = ClusterBackend::new(s);

        assert_eq!(backend.poll(&j).await.unwrap(), JobStatus::Running);
        assert_eq!(backend.poll(&j).await.unwrap(), JobStatus::Running);
        assert!(matches!(backend.poll(&j).await, Err(ProgressiveError::UnknownJob(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn conclusive_status_resets_the_grace() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("reported");
        let mut j = job("root", 1);
        j.handle = Some(BackendHandle("42".to_string()));

        // Silent, then PENDING once, then silent again.
        let status = format!(
            "if test -e {m}.done; then :; elif test -e {m}; then touch {m}.done; echo PENDING; else touch {m}; fi",
            m = marker.display()
        );
        let mut s = settings(dir.path(), "true", &status);
        s.status_grace = 1;
        let backend = ClusterBackend::new(s);

        assert_eq!(backend.poll(&j).await.unwrap(), JobStatus::Running);
        assert_eq!(backend.poll(&j).await.unwrap(), JobStatus::Running);
        assert_eq!(backend.poll(&j).await.unwrap(), JobStatus::Running);
        assert!(matches!(backend.poll(&j).await, Err(ProgressiveError::UnknownJob(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_failure_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path(), "true", "true");
        s.cancel = "exit 1".to_string();
        let backend = ClusterBackend::new(s);

        let mut j = job("root", 1);
        j.handle = Some(BackendHandle("42".to_string()));
        backend.cancel(&j).await.unwrap();
    }
}
