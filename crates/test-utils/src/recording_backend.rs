use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use progressive::dag::SubproblemId;
use progressive::engine::JobOutcome;
use progressive::errors::ProgressiveError;
use progressive::exec::backend::{BackendFuture, BatchBackend};
use progressive::exec::{BackendHandle, Job, JobStatus};

/// A submission seen by a [`RecordingBackend`].
#[derive(Debug, Clone)]
pub struct Submission {
    pub subproblem: SubproblemId,
    pub attempt: u32,
    pub at: Instant,
}

/// A finished job seen by a [`RecordingBackend`].
#[derive(Debug, Clone)]
pub struct Completion {
    pub subproblem: SubproblemId,
    pub attempt: u32,
    pub at: Instant,
    pub succeeded: bool,
}

/// Wraps another backend and logs dispatch order and observed outcomes.
///
/// Can also refuse the first N submissions of a subproblem.
pub struct RecordingBackend<B> {
    inner: B,
    submissions: Mutex<Vec<Submission>>,
    completions: Mutex<Vec<Completion>>,
    refuse: Mutex<HashMap<SubproblemId, usize>>,
}

impl<B: BatchBackend> RecordingBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            submissions: Mutex::new(Vec::new()),
            completions: Mutex::new(Vec::new()),
            refuse: Mutex::new(HashMap::new()),
        }
    }

    /// Fail the next `times` submissions of `id`.
    pub fn refuse_submissions(self, id: &str, times: usize) -> Self {
        self.refuse.lock().unwrap().insert(SubproblemId::from(id), times);
        self
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn completions(&self) -> Vec<Completion> {
        self.completions.lock().unwrap().clone()
    }

    /// Subproblem ids in dispatch order.
    pub fn dispatch_order(&self) -> Vec<String> {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.subproblem.to_string())
            .collect()
    }

    /// When `id` was first observed succeeding.
    pub fn succeeded_at(&self, id: &SubproblemId) -> Option<Instant> {
        self.completions
            .lock()
            .unwrap()
            .iter()
            .find(|c| &c.subproblem == id && c.succeeded)
            .map(|c| c.at)
    }

    fn should_refuse(&self, id: &SubproblemId) -> bool {
        let mut refuse = self.refuse.lock().unwrap();
        match refuse.get_mut(id) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

impl<B: BatchBackend> BatchBackend for RecordingBackend<B> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn max_concurrency(&self) -> usize {
        self.inner.max_concurrency()
    }

    fn submit<'a>(&'a self, job: &'a Job) -> BackendFuture<'a, BackendHandle> {
        Box::pin(async move {
            self.submissions.lock().unwrap().push(Submission {
                subproblem: job.subproblem.clone(),
                attempt: job.attempt,
                at: Instant::now(),
            });
            if self.should_refuse(&job.subproblem) {
                return Err(ProgressiveError::TransientExecution(
                    "submission refused by test backend".to_string(),
                ));
            }
            self.inner.submit(job).await
        })
    }

    fn poll<'a>(&'a self, job: &'a Job) -> BackendFuture<'a, JobStatus> {
        Box::pin(async move {
            let status = self.inner.poll(job).await?;
            if let JobStatus::Finished(outcome) = &status {
                self.completions.lock().unwrap().push(Completion {
                    subproblem: job.subproblem.clone(),
                    attempt: job.attempt,
                    at: Instant::now(),
                    succeeded: matches!(outcome, JobOutcome::Succeeded(_)),
                });
            }
            Ok(status)
        })
    }

    fn cancel<'a>(&'a self, job: &'a Job) -> BackendFuture<'a, ()> {
        self.inner.cancel(job)
    }
}
