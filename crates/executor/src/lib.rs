//! # Retrying Task Executor
//!
//! Runs a batch of fallible async tasks on a bounded worker pool and keeps
//! replaying failures until every task has succeeded exactly once.
//!
//! ## Features
//!
//! - **Bounded concurrency**: at most `pool_size` tasks execute at any moment
//! - **Replay on failure**: failed tasks are resubmitted through a replay queue, or retried inside their slot
//! - **Retry policies**: unbounded immediate retry by default, with opt-in attempt ceilings, backoff and jitter
//! - **Panic isolation**: a panicking task is recorded as a failed attempt
//! - **Graceful shutdown**: the pool drains in-flight work before the batch returns
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     RetryingExecutor                         │
//! │  (drive loop: pending tasks first, then the replay queue)   │
//! └─────────────────────────────────────────────────────────────┘
//!           │ submit                          ▲ failure: push
//!           ▼                                 │
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │        WorkerPool        │   │         ReplayQueue          │
//! │  (pool_size slots)       │   │  (attempts to resubmit)      │
//! └──────────────────────────┘   └──────────────────────────────┘
//!           │ success
//!           ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │        ResultSink        │   │      CompletionBarrier       │
//! │  (one value per task)    │   │  (releases at zero)          │
//! └──────────────────────────┘   └──────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::sync::Arc;
//!
//! use replay_executor::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), ExecutorError> {
//! let executor = RetryingExecutor::new(ExecutorConfig::default().with_pool_size(2))?;
//!
//! let tasks = (0..3u32).map(|n| {
//!     let failed_once = Arc::new(AtomicBool::new(false));
//!     move || {
//!         let failed_once = Arc::clone(&failed_once);
//!         async move {
//!             if !failed_once.swap(true, Ordering::SeqCst) {
//!                 return Err(TaskError::retryable("transient"));
//!             }
//!             Ok(n)
//!         }
//!     }
//! });
//!
//! let report = executor.run_report(tasks).await?;
//! assert_eq!(report.len(), 3);
//! assert_eq!(report.executions, 6);
//! # Ok(())
//! # }
//! ```

pub mod coordination;
pub mod engine;
pub mod reliability;
pub mod task;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::engine::{
        BackgroundBatch, BatchReport, ExecutorConfig, ExecutorError, RetryStrategy,
        RetryingExecutor, TaskResult,
    };
    pub use crate::reliability::RetryPolicy;
    pub use crate::task::{Outcome, SharedTask, Task, TaskError, TaskHandle};
    pub use crate::worker::{WorkerPool, WorkerPoolConfig, WorkerPoolError};
}

// Re-export key types at crate root
pub use coordination::{CompletionBarrier, ReplayQueue, ResultSink};
pub use engine::{
    BackgroundBatch, BatchReport, ConfigError, ExecutorConfig, ExecutorError, InPlaceRetry,
    RetryStrategy, RetryingExecutor, TaskResult,
};
pub use reliability::RetryPolicy;
pub use task::{Outcome, SharedTask, Task, TaskError, TaskHandle};
pub use worker::{WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStats, WorkerPoolStatus};
