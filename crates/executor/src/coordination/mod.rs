//! Shared state for one batch
//!
//! This module provides:
//! - [`CompletionBarrier`] - Lock-free countdown released by the last success
//! - [`ReplayQueue`] - Failed attempts waiting to be resubmitted
//! - [`ResultSink`] - Append-only result collection
//!
//! Each type carries its own synchronization; nothing here shares a lock.

mod barrier;
mod replay;
mod sink;

pub use barrier::CompletionBarrier;
pub use replay::ReplayQueue;
pub use sink::ResultSink;
