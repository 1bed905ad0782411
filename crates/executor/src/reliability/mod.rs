//! Reliability patterns for batch execution
//!
//! This module provides:
//! - [`RetryPolicy`] - Attempt ceiling with optional exponential backoff

mod retry;

pub(crate) use retry::duration_millis;
pub use retry::RetryPolicy;
