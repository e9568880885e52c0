// src/exec/backend.rs

//! Pluggable batch backend abstraction.
//!
//! The orchestrator talks to a `BatchBackend` instead of a concrete job
//! runner. This makes it easy to swap the in-process pool for a cluster
//! queue, or for a recording wrapper in tests.
//!
//! - [`LocalBackend`](super::LocalBackend) runs executors on a bounded
//!   in-process pool.
//! - [`ClusterBackend`](super::ClusterBackend) submits to an external queue.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::errors::Result;
use crate::exec::{BackendHandle, Job, JobStatus};

/// Boxed future returned by backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Capability set every batch backend provides.
///
/// Backends know nothing about dependencies between jobs; the orchestrator
/// only submits a job once everything it consumes has succeeded.
pub trait BatchBackend: Send + Sync {
    /// Short name for logs (`local`, `cluster`, ...).
    fn name(&self) -> &str;

    /// Maximum number of jobs the orchestrator keeps in flight.
    fn max_concurrency(&self) -> usize;

    /// Submit one attempt; returns the backend's handle for it.
    fn submit<'a>(&'a self, job: &'a Job) -> BackendFuture<'a, BackendHandle>;

    /// Current status of a submitted job (`job.handle` is set).
    ///
    /// A handle the backend does not know yields
    /// [`ProgressiveError::UnknownJob`](crate::errors::ProgressiveError::UnknownJob).
    fn poll<'a>(&'a self, job: &'a Job) -> BackendFuture<'a, JobStatus>;

    /// Best-effort cancellation of a submitted job.
    fn cancel<'a>(&'a self, job: &'a Job) -> BackendFuture<'a, ()>;
}

impl<B: BatchBackend + ?Sized> BatchBackend for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn max_concurrency(&self) -> usize {
        (**self).max_concurrency()
    }

    fn submit<'a>(&'a self, job: &'a Job) -> BackendFuture<'a, BackendHandle> {
        (**self).submit(job)
    }

    fn poll<'a>(&'a self, job: &'a Job) -> BackendFuture<'a, JobStatus> {
        (**self).poll(job)
    }

    fn cancel<'a>(&'a self, job: &'a Job) -> BackendFuture<'a, ()> {
        (**self).cancel(job)
    }
}

impl<B: BatchBackend + ?Sized> BatchBackend for Arc<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn max_concurrency(&self) -> usize {
        (**self).max_concurrency()
    }

    fn submit<'a>(&'a self, job: &'a Job) -> BackendFuture<'a, BackendHandle> {
        (**self).submit(job)
    }

    fn poll<'a>(&'a self, job: &'a Job) -> BackendFuture<'a, JobStatus> {
        (**self).poll(job)
    }

    fn cancel<'a>(&'a self, job: &'a Job) -> BackendFuture<'a, ()> {
        (**self).cancel(job)
    }
}
