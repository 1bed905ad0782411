//! Retrying executor
//!
//! The `RetryingExecutor` is responsible for:
//! - Submitting a batch of tasks to a fresh worker pool
//! - Replaying failed tasks until each one has succeeded once
//! - Collecting exactly one result per task
//! - Shutting the pool down when the batch ends

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn, Span};
use uuid::Uuid;

use super::batch::{BatchReport, BatchState};
use crate::reliability::{duration_millis, RetryPolicy};
use crate::task::{Task, TaskError, TaskHandle};
use crate::worker::{WorkerPool, WorkerPoolConfig, WorkerPoolError, DEFAULT_POOL_SIZE};

/// Default bounded wait on the replay queue
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default grace period for in-flight tasks at the end of a batch
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a failed task gets its next attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// The failure goes back through the replay queue and waits for a free slot
    #[default]
    Requeue,
    /// The slot keeps re-invoking the task until it succeeds or the policy is spent
    InPlace,
}

impl fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryStrategy::Requeue => write!(f, "requeue"),
            RetryStrategy::InPlace => write!(f, "in_place"),
        }
    }
}

impl FromStr for RetryStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "requeue" => Ok(RetryStrategy::Requeue),
            "in_place" | "in-place" | "inplace" => Ok(RetryStrategy::InPlace),
            other => Err(format!("unknown retry strategy: {}", other)),
        }
    }
}

/// Configuration for the retrying executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Execution slots per batch
    pub pool_size: usize,

    /// Longest wait on the replay queue before the drive loop re-checks
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// Retry strategy
    #[serde(default)]
    pub strategy: RetryStrategy,

    /// Retry policy applied to every task
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Grace period for in-flight tasks when the batch ends
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            strategy: RetryStrategy::default(),
            retry: RetryPolicy::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl ExecutorConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `REPLAY_POOL_SIZE`: execution slots (default: 5)
    /// - `REPLAY_POLL_INTERVAL_MS`: replay queue wait in milliseconds (default: 100)
    /// - `REPLAY_MAX_ATTEMPTS`: attempt ceiling per task (default: unbounded)
    /// - `REPLAY_RETRY_STRATEGY`: `requeue` or `in_place` (default: requeue)
    ///
    /// Values that do not parse are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ExecutorConfig::from_env`] with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: FromStr>(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(key, value = %raw, "Ignoring unparseable setting");
                    None
                }
            }
        }

        let defaults = Self::default();

        let pool_size = parsed::<usize>(&lookup, "REPLAY_POOL_SIZE")
            .filter(|&size| size > 0)
            .unwrap_or(defaults.pool_size);

        let poll_interval = parsed::<u64>(&lookup, "REPLAY_POLL_INTERVAL_MS")
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);

        let retry = match parsed::<u32>(&lookup, "REPLAY_MAX_ATTEMPTS").filter(|&n| n > 0) {
            Some(max_attempts) => defaults.retry.clone().with_max_attempts(max_attempts),
            None => defaults.retry.clone(),
        };

        let strategy = parsed::<RetryStrategy>(&lookup, "REPLAY_RETRY_STRATEGY")
            .unwrap_or(defaults.strategy);

        Self {
            pool_size,
            poll_interval,
            strategy,
            retry,
            ..defaults
        }
    }

    /// Set the number of execution slots
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Set the replay queue wait
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the retry strategy
    pub fn with_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the shutdown grace period
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Reject values the executor cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::InvalidPoolSize);
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidPollInterval);
        }
        self.retry.validate().map_err(ConfigError::InvalidRetryPolicy)
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("pool_size must be at least 1")]
    InvalidPoolSize,

    #[error("poll_interval must be greater than zero")]
    InvalidPollInterval,

    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),
}

/// Errors from executor operations
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The batch was cancelled before every task succeeded
    #[error("batch interrupted with {remaining} task(s) outstanding")]
    Interrupted { remaining: usize },

    /// A task failed in a way the retry policy does not allow to retry
    #[error("task {index} gave up after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        index: usize,
        attempts: u32,
        #[source]
        source: TaskError,
    },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Worker pool error
    #[error("worker pool error: {0}")]
    Pool(#[from] WorkerPoolError),

    /// The background driver stopped without a report
    #[error("batch driver failed: {0}")]
    Driver(String),
}

/// Runs a batch of tasks until each one has succeeded once
///
/// Every batch gets its own [`WorkerPool`] of `pool_size` slots, which is
/// shut down when the batch ends. Failures are retried according to the
/// configured [`RetryStrategy`] and [`RetryPolicy`]; with the defaults every
/// failure is replayed immediately and without limit.
///
/// All entry points must be called from within a Tokio runtime.
///
/// # Example
///
/// ```
/// use replay_executor::{RetryingExecutor, Task, TaskError};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), replay_executor::ExecutorError> {
/// let executor = RetryingExecutor::default();
///
/// let tasks = (0..4u32).map(|n| move || async move { Ok::<_, TaskError>(n * n) });
/// let mut squares = executor.run(tasks).await?;
/// squares.sort();
///
/// assert_eq!(squares, vec![0, 1, 4, 9]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct RetryingExecutor {
    config: ExecutorConfig,
}

impl RetryingExecutor {
    /// Create an executor, validating `config`
    pub fn new(config: ExecutorConfig) -> Result<Self, ExecutorError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Create an executor from environment variables
    pub fn from_env() -> Result<Self, ExecutorError> {
        Self::new(ExecutorConfig::from_env())
    }

    /// Get the executor configuration
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `tasks` to completion and return their values in completion order
    pub async fn run<R, T, I>(&self, tasks: I) -> Result<Vec<R>, ExecutorError>
    where
        R: Clone + Send + Sync + 'static,
        T: Task<R>,
        I: IntoIterator<Item = T>,
    {
        Ok(self.run_report(tasks).await?.into_values())
    }

    /// Run `tasks` to completion and return the full report
    pub async fn run_report<R, T, I>(&self, tasks: I) -> Result<BatchReport<R>, ExecutorError>
    where
        R: Clone + Send + Sync + 'static,
        T: Task<R>,
        I: IntoIterator<Item = T>,
    {
        self.run_until_cancelled(tasks, CancellationToken::new())
            .await
    }

    /// Run `tasks` until they all succeed or `cancel` fires
    ///
    /// Cancellation stops new submissions; tasks already running are given
    /// the shutdown grace period and the call returns
    /// [`ExecutorError::Interrupted`].
    #[instrument(skip_all, fields(batch_id, tasks))]
    pub async fn run_until_cancelled<R, T, I>(
        &self,
        tasks: I,
        cancel: CancellationToken,
    ) -> Result<BatchReport<R>, ExecutorError>
    where
        R: Clone + Send + Sync + 'static,
        T: Task<R>,
        I: IntoIterator<Item = T>,
    {
        let state = self.prepare(tasks, false);
        let pending = state.initial_attempts();
        state.drive(pending, self.config.poll_interval, cancel).await
    }

    /// Submit `tasks` and keep retrying them in the background
    ///
    /// Returns once every task has been submitted. The handles observe the
    /// first attempt of each task, in submission order. When the last task
    /// succeeds the pool stops accepting work and the background driver
    /// finishes the shutdown.
    #[instrument(skip_all, fields(batch_id, tasks))]
    pub fn spawn<R, T, I>(&self, tasks: I) -> Result<BackgroundBatch<R>, ExecutorError>
    where
        R: Clone + Send + Sync + 'static,
        T: Task<R>,
        I: IntoIterator<Item = T>,
    {
        let state = self.prepare(tasks, true);

        let mut handles = Vec::new();
        for attempt in state.initial_attempts() {
            handles.push(state.dispatch(attempt)?);
        }

        let cancel = CancellationToken::new();
        let driver = tokio::spawn(Arc::clone(&state).drive(
            VecDeque::new(),
            self.config.poll_interval,
            cancel.clone(),
        ));

        Ok(BackgroundBatch {
            batch_id: state.id(),
            handles,
            cancel,
            driver,
        })
    }

    fn prepare<R, T, I>(&self, tasks: I, close_on_release: bool) -> Arc<BatchState<R>>
    where
        R: Clone + Send + Sync + 'static,
        T: Task<R>,
        I: IntoIterator<Item = T>,
    {
        let tasks: Vec<Arc<dyn Task<R>>> = tasks
            .into_iter()
            .map(|task| Arc::new(task) as Arc<dyn Task<R>>)
            .collect();

        let batch_id = Uuid::now_v7();
        let span = Span::current();
        span.record("batch_id", tracing::field::display(batch_id));
        span.record("tasks", tasks.len());

        let pool = WorkerPool::new(
            WorkerPoolConfig::new(self.config.pool_size)
                .with_name(format!("batch-{}", batch_id))
                .with_shutdown_timeout(self.config.shutdown_timeout),
        );

        info!(
            batch_id = %batch_id,
            tasks = tasks.len(),
            pool_size = self.config.pool_size,
            strategy = %self.config.strategy,
            "Starting batch"
        );

        BatchState::new(
            batch_id,
            pool,
            self.config.retry.clone(),
            self.config.strategy,
            tasks,
            close_on_release,
        )
    }
}

/// A batch that keeps running after [`RetryingExecutor::spawn`] returned
pub struct BackgroundBatch<R> {
    batch_id: Uuid,
    handles: Vec<TaskHandle<R>>,
    cancel: CancellationToken,
    driver: JoinHandle<Result<BatchReport<R>, ExecutorError>>,
}

impl<R> BackgroundBatch<R> {
    /// Batch id
    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// One handle per task, in submission order
    pub fn handles(&self) -> &[TaskHandle<R>] {
        &self.handles
    }

    /// Stop retrying; `wait` then returns [`ExecutorError::Interrupted`]
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the background driver has finished
    pub fn is_finished(&self) -> bool {
        self.driver.is_finished()
    }

    /// Wait for every task to succeed and the pool to shut down
    pub async fn wait(self) -> Result<BatchReport<R>, ExecutorError> {
        self.driver
            .await
            .map_err(|e| ExecutorError::Driver(e.to_string()))?
    }
}
