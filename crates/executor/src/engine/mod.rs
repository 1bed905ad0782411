//! Batch execution engine
//!
//! The engine module provides the `RetryingExecutor`, which drives a batch of
//! tasks through a worker pool and replays failures until every task has
//! succeeded once.

mod batch;
mod executor;
mod in_place;

pub use batch::{BatchReport, TaskResult};
pub use executor::{
    BackgroundBatch, ConfigError, ExecutorConfig, ExecutorError, RetryStrategy, RetryingExecutor,
    DEFAULT_POLL_INTERVAL, DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use in_place::InPlaceRetry;
