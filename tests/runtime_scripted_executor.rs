// tests/runtime_scripted_executor.rs

mod common;

use std::sync::Arc;
use std::time::Duration;

use progressive::dag::{RunState, SubproblemId, SubproblemState};
use progressive::engine::run;
use progressive::store::JobRecordStore;

use crate::common::{
    fast_options, init_tracing, memory_store, project, recording, topology, with_timeout,
    ScriptedExecutor, Step, BALANCED_4,
};

fn id(s: &str) -> SubproblemId {
    SubproblemId::from(s)
}

#[tokio::test]
async fn balanced_tree_completes_with_root_result() {
    init_tracing();

    let executor = Arc::new(ScriptedExecutor::new());
    let backend = recording(executor.clone(), 2);
    let store = memory_store();

    let run = with_timeout(run(
        project(BALANCED_4, topology(false, false)),
        backend,
        store.clone(),
        fast_options(3),
    ))
    .await
    .expect("run should not hit a fatal error");

    assert_eq!(run.state, RunState::Completed);
    assert!(run.failing.is_empty());
    assert_eq!(run.root_result().map(|r| r.as_str()), Some("aln://root"));
    for sp in &run.subproblems {
        assert_eq!(sp.state, SubproblemState::Succeeded, "{}", sp.id);
        assert_eq!(sp.attempt, 1, "{}", sp.id);
    }

    assert_eq!(run.count_in(SubproblemState::Succeeded), 3);
    assert_eq!(run.stats.total, 3);
    assert_eq!(run.stats.succeeded, 3);
    assert_eq!(run.stats.total_attempts, 3);
    assert_eq!(run.stats.retries, 0);
    assert_eq!(run.stats.recovered, 0);

    // The root consumed its children's results.
    let root_call = executor
        .invocations()
        .into_iter()
        .find(|c| c.subproblem == id("root"))
        .expect("root should run");
    assert_eq!(root_call.inputs, ["aln://root.0", "aln://root.1"]);

    // Every record reached the store.
    let stored = store.get(&id("root")).unwrap().expect("root record");
    assert_eq!(stored.state, SubproblemState::Succeeded);
    assert_eq!(store.scan().unwrap().len(), 3);
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    init_tracing();

    let executor =
        Arc::new(ScriptedExecutor::new().script("root.0", &[Step::Transient, Step::Transient]));
    let run = with_timeout(run(
        project(BALANCED_4, topology(false, false)),
        recording(executor.clone(), 2),
        memory_store(),
        fast_options(3),
    ))
    .await
    .unwrap();

    assert_eq!(run.state, RunState::Completed);
    let left = run.subproblem(&id("root.0")).unwrap();
    assert_eq!(left.attempt, 3);
    assert!(left.last_failure.is_none());
    assert_eq!(executor.calls_for("root.0"), 3);
    assert_eq!(run.stats.retries, 2);

    let attempts: Vec<u32> = executor
        .invocations()
        .iter()
        .filter(|c| c.subproblem == id("root.0"))
        .map(|c| c.attempt)
        .collect();
    assert_eq!(attempts, [1, 2, 3]);
}

#[tokio::test]
async fn retry_limit_bounds_attempts_and_abandons_dependents() {
    init_tracing();

    let executor = Arc::new(ScriptedExecutor::new().always("root.0", Step::Transient));
    let run = with_timeout(run(
        project(BALANCED_4, topology(false, false)),
        recording(executor.clone(), 2),
        memory_store(),
        fast_options(3),
    ))
    .await
    .unwrap();

    assert_eq!(run.state, RunState::Failed);
    assert_eq!(executor.calls_for("root.0"), 3);
    assert_eq!(run.state_of(&id("root.0")), Some(SubproblemState::Failed));
    assert_eq!(run.state_of(&id("root.1")), Some(SubproblemState::Succeeded));
    assert_eq!(run.state_of(&id("root")), Some(SubproblemState::Abandoned));
    assert_eq!(executor.calls_for("root"), 0);

    assert_eq!(run.failing, [id("root.0"), id("root")]);
    assert_eq!(run.stats.failed, 1);
    assert_eq!(run.stats.abandoned, 1);
    assert!(run
        .subproblem(&id("root.0"))
        .and_then(|sp| sp.last_failure.as_deref())
        .is_some_and(|reason| reason.contains("transient")));
}

#[tokio::test]
async fn retry_limit_of_one_means_a_single_attempt() {
    init_tracing();

    let executor = Arc::new(ScriptedExecutor::new().script("root.1", &[Step::Transient]));
    let run = with_timeout(run(
        project(BALANCED_4, topology(false, false)),
        recording(executor.clone(), 2),
        memory_store(),
        fast_options(1),
    ))
    .await
    .unwrap();

    assert_eq!(run.state, RunState::Failed);
    assert_eq!(executor.calls_for("root.1"), 1);
    assert_eq!(run.state_of(&id("root.1")), Some(SubproblemState::Failed));
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    init_tracing();

    let executor = Arc::new(ScriptedExecutor::new().script("root.1", &[Step::Permanent]));
    let run = with_timeout(run(
        project(BALANCED_4, topology(false, false)),
        recording(executor.clone(), 2),
        memory_store(),
        fast_options(5),
    ))
    .await
    .unwrap();

    assert_eq!(run.state, RunState::Failed);
    assert_eq!(executor.calls_for("root.1"), 1);
    assert_eq!(run.state_of(&id("root.1")), Some(SubproblemState::Failed));
    assert_eq!(run.state_of(&id("root")), Some(SubproblemState::Abandoned));
    assert_eq!(run.state_of(&id("root.0")), Some(SubproblemState::Succeeded));
}

#[tokio::test]
async fn executor_panic_counts_as_transient() {
    init_tracing();

    let executor = Arc::new(ScriptedExecutor::new().script("root", &[Step::Panic]));
    let run = with_timeout(run(
        project(BALANCED_4, topology(false, false)),
        recording(executor.clone(), 2),
        memory_store(),
        fast_options(3),
    ))
    .await
    .unwrap();

    assert_eq!(run.state, RunState::Completed);
    assert_eq!(executor.calls_for("root"), 2);
    assert_eq!(run.subproblem(&id("root")).unwrap().attempt, 2);
}

#[tokio::test]
async fn failure_deep_in_the_tree_cascades_to_all_ancestors() {
    init_tracing();

    let newick = "(((A,B),C),((D,E),F));";
    let executor = Arc::new(ScriptedExecutor::new().script("root.0.0", &[Step::Permanent]));
    let run = with_timeout(run(
        project(newick, topology(false, false)),
        recording(executor.clone(), 4),
        memory_store(),
        fast_options(3),
    ))
    .await
    .unwrap();

    assert_eq!(run.state, RunState::Failed);
    assert_eq!(run.state_of(&id("root.0.0")), Some(SubproblemState::Failed));
    assert_eq!(run.state_of(&id("root.0")), Some(SubproblemState::Abandoned));
    assert_eq!(run.state_of(&id("root")), Some(SubproblemState::Abandoned));
    // The independent clade still finishes.
    assert_eq!(run.state_of(&id("root.1.0")), Some(SubproblemState::Succeeded));
    assert_eq!(run.state_of(&id("root.1")), Some(SubproblemState::Succeeded));

    assert_eq!(executor.calls_for("root.0"), 0);
    assert_eq!(executor.calls_for("root"), 0);
}

#[tokio::test]
async fn concurrency_never_exceeds_backend_limit() {
    init_tracing();

    // 16 leaves: 8 independent cherries at the bottom.
    let newick = progressive_test_utils::scenarios::balanced(16);
    let executor = Arc::new(ScriptedExecutor::new().with_delay(Duration::from_millis(5)));
    let run = with_timeout(run(
        project(&newick, topology(false, false)),
        recording(executor.clone(), 3),
        memory_store(),
        fast_options(3),
    ))
    .await
    .unwrap();

    assert_eq!(run.state, RunState::Completed);
    assert_eq!(run.subproblems.len(), 15);
    assert!(
        executor.peak_concurrency() <= 3,
        "peak concurrency {} exceeds limit",
        executor.peak_concurrency()
    );
    assert!(executor.peak_concurrency() >= 2, "independent work should overlap");
}

#[tokio::test]
async fn refused_submissions_are_retried() {
    init_tracing();

    let executor = Arc::new(ScriptedExecutor::new());
    let backend = recording(executor.clone(), 2).refuse_submissions("root", 2);
    let orchestrator =
        progressive::engine::Orchestrator::new(backend, memory_store(), fast_options(3));

    let run = with_timeout(orchestrator.run(project(BALANCED_4, topology(false, false))))
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Completed);
    let root_submissions: Vec<u32> = orchestrator
        .backend()
        .submissions()
        .iter()
        .filter(|s| s.subproblem == id("root"))
        .map(|s| s.attempt)
        .collect();
    assert_eq!(root_submissions, [1, 2, 3]);
    assert_eq!(executor.calls_for("root"), 1);
}

#[tokio::test]
async fn refusals_beyond_the_retry_limit_fail_the_subproblem() {
    init_tracing();

    let executor = Arc::new(ScriptedExecutor::new());
    let backend = recording(executor.clone(), 2).refuse_submissions("root.0", 10);
    let run = with_timeout(run(
        project(BALANCED_4, topology(false, false)),
        backend,
        memory_store(),
        fast_options(2),
    ))
    .await
    .unwrap();

    assert_eq!(run.state, RunState::Failed);
    assert_eq!(run.state_of(&id("root.0")), Some(SubproblemState::Failed));
    assert_eq!(executor.calls_for("root.0"), 0);
}

#[tokio::test]
async fn dependents_are_submitted_only_after_dependencies_succeed() {
    init_tracing();

    let newick = "(((A,B),(C,D)),((E,F),G));";
    let executor = Arc::new(
        ScriptedExecutor::new()
            .with_delay(Duration::from_millis(2))
            .script("root.0.1", &[Step::Transient]),
    );
    let project = project(newick, topology(true, false));
    let orchestrator =
        progressive::engine::Orchestrator::new(recording(executor.clone(), 4), memory_store(), fast_options(3));

    let run = with_timeout(orchestrator.run(project)).await.unwrap();
    assert_eq!(run.state, RunState::Completed);

    let backend = orchestrator.backend();
    for submission in backend.submissions() {
        let sp = run.subproblem(&submission.subproblem).unwrap();
        for dep in &sp.depends_on {
            let done = backend
                .succeeded_at(dep)
                .unwrap_or_else(|| panic!("{dep} never succeeded"));
            assert!(
                done <= submission.at,
                "{} submitted before its dependency {dep} succeeded",
                submission.subproblem
            );
        }
    }
}

#[tokio::test]
async fn work_unblocking_the_most_subproblems_goes_first() {
    init_tracing();

    // root.1.0 blocks two subproblems, root.0 only one.
    let newick = "((A,B),((C,D),E));";
    let executor = Arc::new(ScriptedExecutor::new());
    let orchestrator = progressive::engine::Orchestrator::new(
        recording(executor.clone(), 1),
        memory_store(),
        fast_options(3),
    );

    let run = with_timeout(orchestrator.run(project(newick, topology(false, false))))
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Completed);
    assert_eq!(
        orchestrator.backend().dispatch_order(),
        ["root.1.0", "root.0", "root.1", "root"]
    );
}

#[tokio::test]
async fn single_leaf_tree_runs_nothing() {
    init_tracing();

    let executor = Arc::new(ScriptedExecutor::new());
    let run = with_timeout(run(
        project("A;", topology(false, false)),
        recording(executor.clone(), 2),
        memory_store(),
        fast_options(3),
    ))
    .await
    .unwrap();

    assert_eq!(run.state, RunState::Completed);
    assert!(run.root_result().is_none());
    assert!(executor.invocations().is_empty());
}

#[tokio::test]
async fn outgroup_results_feed_later_subproblems() {
    init_tracing();

    let executor = Arc::new(ScriptedExecutor::new());
    let orchestrator = progressive::engine::Orchestrator::new(
        recording(executor.clone(), 2),
        memory_store(),
        fast_options(3),
    );
    let run = with_timeout(orchestrator.run(project(BALANCED_4, topology(true, true))))
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Completed);
    // root.1 takes the left clade's result as its outgroup.
    let right = executor
        .invocations()
        .into_iter()
        .find(|c| c.subproblem == id("root.1"))
        .unwrap();
    assert!(right.inputs.contains(&"aln://root.0".to_string()));
}
