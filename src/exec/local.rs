// src/exec/local.rs

//! In-process batch backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::JobOutcome;
use crate::errors::ProgressiveError;
use crate::exec::backend::{BackendFuture, BatchBackend};
use crate::exec::executor::SubproblemExecutor;
use crate::exec::{BackendHandle, ExecutionFailure, Job, JobStatus};

/// Runs subproblem executors as tokio tasks on a bounded pool.
///
/// At most `max_concurrency` executors run at once; further submissions
/// queue on a semaphore. Handles are only meaningful to the instance that
/// issued them, so a restarted process sees every old handle as unknown.
pub struct LocalBackend {
    executor: Arc<dyn SubproblemExecutor>,
    max_concurrency: usize,
    permits: Arc<Semaphore>,
    timeout: Option<Duration>,
    jobs: Mutex<HashMap<BackendHandle, JoinHandle<JobOutcome>>>,
    next_id: AtomicU64,
}

impl LocalBackend {
    pub fn new(executor: Arc<dyn SubproblemExecutor>, max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            executor,
            max_concurrency,
            permits: Arc::new(Semaphore::new(max_concurrency)),
            timeout: None,
            jobs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Fail (transiently) any attempt running longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn jobs(&self) -> Result<std::sync::MutexGuard<'_, HashMap<BackendHandle, JoinHandle<JobOutcome>>>, ProgressiveError> {
        self.jobs
            .lock()
            .map_err(|_| ProgressiveError::Other(anyhow::anyhow!("local backend job table poisoned")))
    }

    fn spawn(&self, job: &Job) -> JoinHandle<JobOutcome> {
        let executor = Arc::clone(&self.executor);
        let permits = Arc::clone(&self.permits);
        let timeout = self.timeout;
        let request = job.request.clone();

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    return JobOutcome::Failed(ExecutionFailure::transient("worker pool closed"));
                }
            };
            debug!(subproblem = %request.subproblem, attempt = request.attempt, "worker started");

            let run = executor.execute(&request);
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, run).await {
                    Ok(result) => result,
                    Err(_) => Err(ExecutionFailure::transient(format!(
                        "timed out after {}s",
                        limit.as_secs_f64()
                    ))),
                },
                None => run.await,
            };

            match result {
                Ok(result) => JobOutcome::Succeeded(result),
                Err(failure) => JobOutcome::Failed(failure),
            }
        })
    }
}

impl BatchBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    fn submit<'a>(&'a self, job: &'a Job) -> BackendFuture<'a, BackendHandle> {
        Box::pin(async move {
            let handle = BackendHandle(format!(
                "local-{}",
                self.next_id.fetch_add(1, Ordering::Relaxed)
            ));
            let task = self.spawn(job);
            self.jobs()?.insert(handle.clone(), task);
            info!(
                backend = "local",
                subproblem = %job.subproblem,
                attempt = job.attempt,
                handle = %handle,
                "submitted job"
            );
            Ok(handle)
        })
    }

    fn poll<'a>(&'a self, job: &'a Job) -> BackendFuture<'a, JobStatus> {
        Box::pin(async move {
            let handle = job
                .handle
                .clone()
                .ok_or_else(|| ProgressiveError::UnknownJob(format!("{} (never submitted)", job.subproblem)))?;

            // Decide under the lock, await outside it.
            let finished = {
                let mut jobs = self.jobs()?;
                match jobs.get(&handle) {
                    None => return Err(ProgressiveError::UnknownJob(handle.0)),
                    Some(task) if !task.is_finished() => return Ok(JobStatus::Running),
                    Some(_) => jobs.remove(&handle),
                }
            };
            let Some(task) = finished else {
                return Err(ProgressiveError::UnknownJob(handle.0));
            };

            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(err) if err.is_panic() => {
                    warn!(subproblem = %job.subproblem, handle = %handle, "worker panicked");
                    JobOutcome::Failed(ExecutionFailure::transient("worker panicked"))
                }
                Err(_) => JobOutcome::Failed(ExecutionFailure::transient("worker task cancelled")),
            };
            Ok(JobStatus::Finished(outcome))
        })
    }

    fn cancel<'a>(&'a self, job: &'a Job) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let Some(handle) = job.handle.as_ref() else {
                return Ok(());
            };
            if let Some(task) = self.jobs()?.remove(handle) {
                task.abort();
                info!(backend = "local", subproblem = %job.subproblem, handle = %handle, "cancelled job");
            }
            Ok(())
        })
    }
}
