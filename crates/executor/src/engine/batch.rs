//! Per-batch state shared by the drive loop and completion handlers

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::executor::{ExecutorError, RetryStrategy};
use super::in_place::InPlaceRetry;
use crate::coordination::{CompletionBarrier, ReplayQueue, ResultSink};
use crate::reliability::RetryPolicy;
use crate::task::{Outcome, Task, TaskError, TaskHandle};
use crate::worker::{WorkerPool, WorkerPoolError};

/// One scheduled run of a task
pub(crate) struct Attempt<R> {
    index: usize,
    number: u32,
    task: Arc<dyn Task<R>>,
}

impl<R> Attempt<R> {
    pub(crate) fn first(index: usize, task: Arc<dyn Task<R>>) -> Self {
        Self {
            index,
            number: 1,
            task,
        }
    }

    fn next(self) -> Self {
        Self {
            number: self.number + 1,
            ..self
        }
    }
}

/// A successful task and the attempt that produced it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResult<R> {
    /// Position of the task in the submitted batch
    pub index: usize,
    /// Number of executions the task needed, the successful one included
    pub attempts: u32,
    /// Value returned by the task
    pub value: R,
}

/// Summary of a finished batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport<R> {
    /// Batch id used in log fields
    pub batch_id: Uuid,
    /// Results in completion order
    pub results: Vec<TaskResult<R>>,
    /// Executions per task, indexed by batch position
    pub attempts: Vec<u32>,
    /// Total task executions
    pub executions: u64,
    /// Total failed executions
    pub failures: u64,
    /// When the batch started
    pub started_at: DateTime<Utc>,
    /// When the last task succeeded and the pool was released
    pub finished_at: DateTime<Utc>,
}

impl<R> BatchReport<R> {
    /// Number of successful tasks
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether the batch was empty
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Executions beyond the first attempt of each task
    pub fn retries(&self) -> u64 {
        self.executions.saturating_sub(self.attempts.len() as u64)
    }

    /// Values in completion order
    pub fn into_values(self) -> Vec<R> {
        self.results.into_iter().map(|r| r.value).collect()
    }

    /// Values in submission order
    pub fn into_ordered_values(mut self) -> Vec<R> {
        self.results.sort_by_key(|r| r.index);
        self.into_values()
    }
}

/// Execution counters, bumped once per task invocation
struct BatchCounters {
    attempts: Vec<AtomicU32>,
    executions: AtomicU64,
    failures: AtomicU64,
}

impl BatchCounters {
    fn new(tasks: usize) -> Self {
        Self {
            attempts: (0..tasks).map(|_| AtomicU32::new(0)).collect(),
            executions: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    fn attempts_of(&self, index: usize) -> u32 {
        self.attempts[index].load(Ordering::Acquire)
    }
}

/// Counts every invocation of the wrapped task; panics become errors
struct Counted<R> {
    inner: Arc<dyn Task<R>>,
    index: usize,
    counters: Arc<BatchCounters>,
}

#[async_trait]
impl<R: Send + 'static> Task<R> for Counted<R> {
    async fn call(&self) -> Result<R, TaskError> {
        self.counters.attempts[self.index].fetch_add(1, Ordering::AcqRel);
        self.counters.executions.fetch_add(1, Ordering::Relaxed);

        let result = match AssertUnwindSafe(self.inner.call()).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(TaskError::panicked(payload)),
        };
        if result.is_err() {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }
}

/// Everything one batch shares between its drive loop and its handlers
pub(crate) struct BatchState<R> {
    id: Uuid,
    pool: WorkerPool,
    policy: RetryPolicy,
    strategy: RetryStrategy,
    tasks: Vec<Arc<dyn Task<R>>>,
    barrier: CompletionBarrier,
    sink: ResultSink<TaskResult<R>>,
    replay: ReplayQueue<Attempt<R>>,
    counters: Arc<BatchCounters>,
    failure: Mutex<Option<ExecutorError>>,
    failed: CancellationToken,
    close_on_release: bool,
    started_at: DateTime<Utc>,
}

impl<R: Clone + Send + Sync + 'static> BatchState<R> {
    pub(crate) fn new(
        id: Uuid,
        pool: WorkerPool,
        policy: RetryPolicy,
        strategy: RetryStrategy,
        tasks: Vec<Arc<dyn Task<R>>>,
        close_on_release: bool,
    ) -> Arc<Self> {
        let counters = Arc::new(BatchCounters::new(tasks.len()));
        let tasks = tasks
            .into_iter()
            .enumerate()
            .map(|(index, task)| -> Arc<dyn Task<R>> {
                let counted = Counted {
                    inner: task,
                    index,
                    counters: Arc::clone(&counters),
                };
                match strategy {
                    RetryStrategy::Requeue => Arc::new(counted),
                    RetryStrategy::InPlace => {
                        Arc::new(InPlaceRetry::new(counted, policy.clone()))
                    }
                }
            })
            .collect::<Vec<_>>();

        Arc::new(Self {
            id,
            pool,
            barrier: CompletionBarrier::new(tasks.len()),
            sink: ResultSink::with_capacity(tasks.len()),
            replay: ReplayQueue::new(),
            policy,
            strategy,
            tasks,
            counters,
            failure: Mutex::new(None),
            failed: CancellationToken::new(),
            close_on_release,
            started_at: Utc::now(),
        })
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    /// First attempt of every task, in submission order
    pub(crate) fn initial_attempts(&self) -> VecDeque<Attempt<R>> {
        self.tasks
            .iter()
            .enumerate()
            .map(|(index, task)| Attempt::first(index, Arc::clone(task)))
            .collect()
    }

    /// Submit one attempt and route its outcome
    pub(crate) fn dispatch(
        self: &Arc<Self>,
        attempt: Attempt<R>,
    ) -> Result<TaskHandle<R>, WorkerPoolError> {
        let handle = self.pool.submit_shared(Arc::clone(&attempt.task))?;
        let state = Arc::clone(self);
        handle.on_complete(move |outcome| state.handle_outcome(attempt, outcome));
        Ok(handle)
    }

    fn handle_outcome(self: &Arc<Self>, attempt: Attempt<R>, outcome: &Outcome<R>) {
        match outcome {
            Outcome::Success(value) => {
                self.sink.add(TaskResult {
                    index: attempt.index,
                    attempts: self.counters.attempts_of(attempt.index),
                    value: value.clone(),
                });
                if self.barrier.decrement() {
                    debug!(batch_id = %self.id, "All tasks succeeded");
                    if self.close_on_release {
                        self.pool.close();
                    }
                }
            }
            Outcome::Failure(error) => match self.strategy {
                // The in-place loop already spent the policy.
                RetryStrategy::InPlace => {
                    let attempts = self.counters.attempts_of(attempt.index);
                    self.give_up(attempt.index, attempts, error.clone());
                }
                RetryStrategy::Requeue => self.requeue(attempt, error),
            },
        }
    }

    fn requeue(self: &Arc<Self>, attempt: Attempt<R>, error: &TaskError) {
        if !self.policy.allows_retry(error, attempt.number) {
            self.give_up(attempt.index, attempt.number, error.clone());
            return;
        }

        let next = attempt.next();
        let delay = self.policy.delay_for_attempt(next.number);
        debug!(
            batch_id = %self.id,
            task = next.index,
            attempt = next.number,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Replaying failed task"
        );

        if delay.is_zero() {
            self.replay.push(next);
        } else {
            let state = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                state.replay.push(next);
            });
        }
    }

    fn give_up(&self, index: usize, attempts: u32, source: TaskError) {
        warn!(batch_id = %self.id, task = index, attempts, error = %source, "Task gave up");
        self.failure
            .lock()
            .get_or_insert(ExecutorError::RetriesExhausted {
                index,
                attempts,
                source,
            });
        self.failed.cancel();
    }

    fn take_failure(&self) -> ExecutorError {
        self.failure
            .lock()
            .take()
            .unwrap_or_else(|| ExecutorError::Driver("batch failed without a recorded cause".into()))
    }

    /// Submit pending work until every task has succeeded
    ///
    /// Prefers `pending`, then the replay queue. When both are empty the loop
    /// waits on the replay queue for at most `poll_interval`, and wakes early
    /// when the barrier releases, a task gives up, or `cancel` fires.
    pub(crate) async fn drive(
        self: Arc<Self>,
        mut pending: VecDeque<Attempt<R>>,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Result<BatchReport<R>, ExecutorError> {
        let result = loop {
            if self.barrier.is_done() {
                break Ok(());
            }
            if self.failed.is_cancelled() {
                break Err(self.take_failure());
            }
            if cancel.is_cancelled() {
                break Err(ExecutorError::Interrupted {
                    remaining: self.barrier.remaining(),
                });
            }

            if let Some(attempt) = pending.pop_front().or_else(|| self.replay.poll()) {
                if let Err(e) = self.dispatch(attempt) {
                    break Err(e.into());
                }
                continue;
            }

            tokio::select! {
                biased;
                _ = self.barrier.wait() => {}
                _ = self.failed.cancelled() => {}
                _ = cancel.cancelled() => {}
                attempt = self.replay.poll_timeout(poll_interval) => {
                    if let Some(attempt) = attempt {
                        pending.push_back(attempt);
                    }
                }
            }
        };

        let shutdown = self.pool.shutdown().await;
        result?;
        shutdown?;

        let report = self.report();
        info!(
            batch_id = %self.id,
            tasks = report.attempts.len(),
            executions = report.executions,
            retries = report.retries(),
            "Batch completed"
        );
        Ok(report)
    }

    fn report(&self) -> BatchReport<R> {
        BatchReport {
            batch_id: self.id,
            results: self.sink.snapshot(),
            attempts: (0..self.tasks.len())
                .map(|index| self.counters.attempts_of(index))
                .collect(),
            executions: self.counters.executions.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}
