//! Worker pool for task execution
//!
//! This module provides:
//! - [`WorkerPool`] - Fixed number of concurrent execution slots
//! - [`WorkerPoolConfig`] - Pool size, name and shutdown timeout
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                             │
//! │                                                              │
//! │   submit() ──► TaskTracker (in-flight accounting, drain)     │
//! │                     │                                        │
//! │                     ▼                                        │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │         Task Executor (Semaphore-limited)           │    │
//! │  │  [Slot 1] [Slot 2] [Slot 3] ... [Slot N]            │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │                     │                                        │
//! │                     ▼                                        │
//! │      Outcome ──► TaskHandle (await / block / callback)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use replay_executor::worker::{WorkerPool, WorkerPoolConfig};
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::new(5).with_name("io"));
//!
//! let handle = pool.submit(|| async { Ok::<_, TaskError>("pong") })?;
//! let outcome = handle.wait().await;
//!
//! // Graceful shutdown
//! pool.shutdown().await?;
//! ```

mod pool;

pub use pool::{
    WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStats, WorkerPoolStatus,
    DEFAULT_POOL_SIZE,
};
