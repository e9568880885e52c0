use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use progressive::dag::{ResultRef, SubproblemId};
use progressive::exec::executor::{ExecutorFuture, SubproblemExecutor};
use progressive::exec::{ExecutionFailure, ExecutionRequest};

/// What one invocation of a [`ScriptedExecutor`] does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Succeed,
    Transient,
    Permanent,
    Panic,
    /// Never returns (until the task is aborted).
    Hang,
}

/// One recorded call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub subproblem: SubproblemId,
    pub attempt: u32,
    pub started: Instant,
    pub inputs: Vec<String>,
}

/// A deterministic executor for tests:
/// - records every invocation and the peak number running at once
/// - follows a per-subproblem script of steps, then a fallback step
/// - succeeds with `aln://<subproblem id>` so results match across runs
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<SubproblemId, VecDeque<Step>>>,
    always: Mutex<HashMap<SubproblemId, Step>>,
    delay: Duration,
    calls: Mutex<Vec<Invocation>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            always: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Every invocation sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Steps for the next invocations of `id`, in order.
    pub fn script(self, id: &str, steps: &[Step]) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(SubproblemId::from(id), steps.iter().copied().collect());
        self
    }

    /// Step for every invocation of `id` once its script is used up.
    pub fn always(self, id: &str, step: Step) -> Self {
        self.always.lock().unwrap().insert(SubproblemId::from(id), step);
        self
    }

    pub fn result_for(id: &SubproblemId) -> ResultRef {
        ResultRef::new(format!("aln://{id}"))
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of times `id` was executed.
    pub fn calls_for(&self, id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.subproblem.as_str() == id)
            .count()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Wait until `id` has been invoked at least once.
    pub async fn wait_for(&self, id: &str) {
        while self.calls_for(id) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn next_step(&self, id: &SubproblemId) -> Step {
        if let Some(step) = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(id)
            .and_then(|q| q.pop_front())
        {
            return step;
        }
        self.always
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .unwrap_or(Step::Succeed)
    }

    async fn run(&self, request: &ExecutionRequest) -> Result<ResultRef, ExecutionFailure> {
        self.calls.lock().unwrap().push(Invocation {
            subproblem: request.subproblem.clone(),
            attempt: request.attempt,
            started: Instant::now(),
            inputs: request
                .ingroups
                .iter()
                .chain(request.outgroups.iter())
                .map(|i| i.location.clone())
                .collect(),
        });
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_running, Ordering::SeqCst);

        let step = self.next_step(&request.subproblem);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        match step {
            Step::Succeed => Ok(Self::result_for(&request.subproblem)),
            Step::Transient => Err(ExecutionFailure::transient("scripted transient failure")),
            Step::Permanent => Err(ExecutionFailure::permanent("scripted permanent failure")),
            Step::Panic => panic!("scripted panic in {}", request.subproblem),
            Step::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

impl SubproblemExecutor for ScriptedExecutor {
    fn execute<'a>(&'a self, request: &'a ExecutionRequest) -> ExecutorFuture<'a> {
        Box::pin(self.run(request))
    }
}
