//! Worker pool for task execution
//!
//! Runs submitted tasks on a fixed number of slots with graceful shutdown.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::reliability::duration_millis;
use crate::task::{Completion, Outcome, Task, TaskError, TaskHandle};

/// Default number of execution slots
pub const DEFAULT_POOL_SIZE: usize = 5;

tokio::task_local! {
    /// Id of the pool whose worker is running the current future
    static CURRENT_POOL: Uuid;
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerPoolConfig {
    /// Pool name used in log fields
    pub name: String,

    /// Number of tasks that may execute at the same time
    pub pool_size: usize,

    /// Graceful shutdown timeout
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            name: format!("pool-{}", Uuid::now_v7()),
            pool_size: DEFAULT_POOL_SIZE,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    /// Create a configuration with `pool_size` slots
    pub fn new(pool_size: usize) -> Self {
        Self::default().with_pool_size(pool_size)
    }

    /// Set the pool name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the number of slots (at least 1)
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    /// Set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Worker pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolStatus {
    /// Accepting and running tasks
    Running,
    /// Closed to new tasks, finishing in-flight ones
    Draining,
    /// All work finished after shutdown
    Stopped,
}

/// Worker pool errors
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum WorkerPoolError {
    /// Submission after `close` or `shutdown`
    #[error("worker pool {0} is closed to new tasks")]
    Closed(String),

    /// Shutdown timeout
    #[error("graceful shutdown timed out with {remaining} tasks in flight")]
    ShutdownTimeout { remaining: usize },
}

/// Counters over the lifetime of a pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerPoolStats {
    /// Tasks accepted by `submit`
    pub submitted: u64,
    /// Tasks that finished with a success
    pub succeeded: u64,
    /// Tasks that finished with an error, panics included
    pub failed: u64,
    /// Tasks that panicked
    pub panicked: u64,
}

struct PoolInner {
    id: Uuid,
    config: WorkerPoolConfig,
    slots: Arc<Semaphore>,
    tracker: TaskTracker,
    status: RwLock<WorkerPoolStatus>,
    running: AtomicUsize,
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

/// Fixed-size pool of execution slots
///
/// Submitted tasks queue for a slot and run on the tokio runtime. A failing or
/// panicking task produces [`Outcome::Failure`]; nothing is propagated to the
/// submitter. Cloning yields another handle to the same pool.
///
/// # Example
///
/// ```ignore
/// use replay_executor::{TaskError, WorkerPool, WorkerPoolConfig};
///
/// let pool = WorkerPool::new(WorkerPoolConfig::new(5));
///
/// let handle = pool.submit(|| async { Ok::<_, TaskError>(42) })?;
/// handle.on_complete(|outcome| println!("finished: {:?}", outcome));
/// assert_eq!(handle.wait().await.into_result()?, 42);
///
/// // Graceful shutdown
/// pool.shutdown().await?;
/// ```
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.inner.config.name)
            .field("pool_size", &self.inner.config.pool_size)
            .field("status", &self.status())
            .finish()
    }
}

impl WorkerPool {
    /// Create a new worker pool
    pub fn new(config: WorkerPoolConfig) -> Self {
        let pool_size = config.pool_size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                id: Uuid::now_v7(),
                config: WorkerPoolConfig { pool_size, ..config },
                slots: Arc::new(Semaphore::new(pool_size)),
                tracker: TaskTracker::new(),
                status: RwLock::new(WorkerPoolStatus::Running),
                running: AtomicUsize::new(0),
                submitted: AtomicU64::new(0),
                succeeded: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                panicked: AtomicU64::new(0),
            }),
        }
    }

    /// Submit a task
    pub fn submit<R, T>(&self, task: T) -> Result<TaskHandle<R>, WorkerPoolError>
    where
        R: Clone + Send + 'static,
        T: Task<R>,
    {
        self.submit_shared(Arc::new(task))
    }

    /// Submit a task that is shared with other submissions
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit_shared<R>(&self, task: Arc<dyn Task<R>>) -> Result<TaskHandle<R>, WorkerPoolError>
    where
        R: Clone + Send + 'static,
    {
        if !self.is_accepting() {
            return Err(WorkerPoolError::Closed(self.inner.config.name.clone()));
        }

        let completion = Completion::new();
        let handle = TaskHandle::new(Arc::clone(&completion));
        let inner = Arc::clone(&self.inner);
        inner.submitted.fetch_add(1, Ordering::Relaxed);

        let worker = async move {
            let outcome = match Arc::clone(&inner.slots).acquire_owned().await {
                Ok(_permit) => {
                    inner.running.fetch_add(1, Ordering::AcqRel);
                    let result = AssertUnwindSafe(task.call()).catch_unwind().await;
                    inner.running.fetch_sub(1, Ordering::AcqRel);

                    match result {
                        Ok(result) => Outcome::from(result),
                        Err(payload) => {
                            inner.panicked.fetch_add(1, Ordering::Relaxed);
                            let error = TaskError::panicked(payload);
                            warn!(pool = %inner.config.name, error = %error, "Task panicked");
                            Outcome::Failure(error)
                        }
                    }
                }
                // The semaphore is never closed while the pool is alive.
                Err(_) => Outcome::Failure(TaskError::non_retryable("worker pool slots closed")),
            };

            match &outcome {
                Outcome::Success(_) => inner.succeeded.fetch_add(1, Ordering::Relaxed),
                Outcome::Failure(_) => inner.failed.fetch_add(1, Ordering::Relaxed),
            };
            completion.complete(outcome);
        };

        self.inner
            .tracker
            .spawn(CURRENT_POOL.scope(self.inner.id, worker));
        Ok(handle)
    }

    /// Stop accepting tasks without waiting for in-flight ones
    ///
    /// Safe to call from completion callbacks and from tasks running on this
    /// pool.
    pub fn close(&self) {
        {
            let mut status = self.inner.status.write();
            if *status == WorkerPoolStatus::Running {
                *status = WorkerPoolStatus::Draining;
                info!(pool = %self.inner.config.name, in_flight = self.inner.tracker.len(), "Worker pool closed");
            }
        }
        self.inner.tracker.close();
    }

    /// Shutdown the worker pool gracefully
    ///
    /// Idempotent. When called from a task running on this pool the pool is
    /// only closed, since waiting on its own slot would never finish.
    #[instrument(skip(self), fields(pool = %self.inner.config.name))]
    pub async fn shutdown(&self) -> Result<(), WorkerPoolError> {
        self.close();

        if self.is_current() {
            debug!("Shutdown requested from inside the pool, not waiting for in-flight tasks");
            return Ok(());
        }

        if self.status() == WorkerPoolStatus::Stopped {
            return Ok(());
        }

        if tokio::time::timeout(self.inner.config.shutdown_timeout, self.inner.tracker.wait())
            .await
            .is_err()
        {
            let remaining = self.inner.tracker.len();
            warn!(remaining_tasks = remaining, "Shutdown timeout reached");
            return Err(WorkerPoolError::ShutdownTimeout { remaining });
        }

        *self.inner.status.write() = WorkerPoolStatus::Stopped;
        info!(stats = ?self.stats(), "Worker pool stopped");
        Ok(())
    }

    /// Close now and finish shutdown on a detached task
    pub fn shutdown_in_background(&self) -> JoinHandle<Result<(), WorkerPoolError>> {
        self.close();
        let pool = self.clone();
        tokio::spawn(async move { pool.shutdown().await })
    }

    /// Get current status
    pub fn status(&self) -> WorkerPoolStatus {
        *self.inner.status.read()
    }

    /// Check if accepting tasks
    pub fn is_accepting(&self) -> bool {
        self.status() == WorkerPoolStatus::Running
    }

    /// Number of tasks executing right now
    pub fn running(&self) -> usize {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Number of submitted tasks not yet finished, queued ones included
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Number of execution slots
    pub fn pool_size(&self) -> usize {
        self.inner.config.pool_size
    }

    /// Get the pool name
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Snapshot of the pool counters
    pub fn stats(&self) -> WorkerPoolStats {
        WorkerPoolStats {
            submitted: self.inner.submitted.load(Ordering::Relaxed),
            succeeded: self.inner.succeeded.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            panicked: self.inner.panicked.load(Ordering::Relaxed),
        }
    }

    /// Whether the current future is running on one of this pool's workers
    fn is_current(&self) -> bool {
        CURRENT_POOL
            .try_with(|id| *id == self.inner.id)
            .unwrap_or(false)
    }
}
