//! Bounded background worker pool
//!
//! Sampling callbacks, model fetches and model evaluations hand their I/O
//! off to this pool so the caller never waits on it. Submission is
//! synchronous and non-blocking (it works from a sensor driver thread
//! outside the runtime); at most `max_concurrent` jobs run at once and the
//! rest queue on the semaphore. Every submission returns a [`Completion`].

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{oneshot, Semaphore};
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker pool must be created inside a tokio runtime")]
    NoRuntime,
    #[error("Worker pool needs at least one concurrent slot")]
    ZeroCapacity,
}

/// Completion signal for one submitted job.
#[derive(Debug)]
pub struct Completion {
    done: oneshot::Receiver<()>,
}

impl Completion {
    /// Wait for the job to finish. Returns `false` if the job was dropped
    /// before running (pool shut down or the job panicked).
    pub async fn wait(self) -> bool {
        self.done.await.is_ok()
    }
}

/// Counters exposed for status output.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    pub submitted: u64,
    pub completed: u64,
}

/// Cloneable handle to a bounded pool of tokio tasks.
#[derive(Clone)]
pub struct WorkerPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    submitted: Arc<AtomicU64>,
    completed: Arc<AtomicU64>,
}

impl WorkerPool {
    /// Create a pool bound to the current tokio runtime.
    pub fn new(max_concurrent: usize) -> Result<Self, WorkerError> {
        let handle = Handle::try_current().map_err(|_| WorkerError::NoRuntime)?;
        Self::with_handle(handle, max_concurrent)
    }

    pub fn with_handle(handle: Handle, max_concurrent: usize) -> Result<Self, WorkerError> {
        if max_concurrent == 0 {
            return Err(WorkerError::ZeroCapacity);
        }
        Ok(Self {
            handle,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            tracker: TaskTracker::new(),
            submitted: Arc::new(AtomicU64::new(0)),
            completed: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Queue a job. Never blocks the caller.
    pub fn submit<F>(&self, label: &'static str, job: F) -> Completion
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let permits = Arc::clone(&self.permits);
        let completed = Arc::clone(&self.completed);
        self.submitted.fetch_add(1, Ordering::Relaxed);

        self.tracker.spawn_on(
            async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    warn!(job = label, "Worker pool closed before job could run");
                    return;
                };
                job.await;
                completed.fetch_add(1, Ordering::Relaxed);
                debug!(job = label, "Background job finished");
                let _ = done_tx.send(());
            },
            &self.handle,
        );

        Completion { done: done_rx }
    }

    /// Runtime the pool spawns onto, for long-lived tasks that should not
    /// occupy a job slot.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Wait until every job submitted so far has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
        }
    }
}
