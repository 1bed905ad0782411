//! Task trait definition

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Error type recorded when a single task attempt fails
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskError {
    /// Error message
    pub message: String,

    /// Error type/code for programmatic handling
    pub error_type: Option<String>,

    /// Whether this error is retryable
    ///
    /// Non-retryable errors fail the batch without further attempts.
    pub retryable: bool,
}

impl TaskError {
    /// Error type assigned to attempts that panicked
    pub const PANIC: &'static str = "PANIC";

    /// Create a new retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: true,
        }
    }

    /// Create a non-retryable error
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: false,
        }
    }

    /// Build the error recorded for a task that panicked
    pub(crate) fn panicked(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "task panicked".to_string()
        };
        Self::retryable(message).with_type(Self::PANIC)
    }

    /// Set the error type
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_type {
            Some(error_type) => write!(f, "{}: {}", error_type, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for TaskError {}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(err.to_string())
    }
}

/// A task is a unit of work that may fail and be run again
///
/// Tasks are invoked through `&self`, so the same value can be called once per
/// attempt. The executor gives no idempotency guarantee: a retry simply calls
/// the task again.
///
/// Any `Fn() -> impl Future<Output = Result<R, TaskError>>` closure is a task.
///
/// # Example
///
/// ```ignore
/// use replay_executor::prelude::*;
///
/// struct FetchQuote {
///     symbol: String,
/// }
///
/// #[async_trait]
/// impl Task<f64> for FetchQuote {
///     async fn call(&self) -> Result<f64, TaskError> {
///         quote_service::fetch(&self.symbol)
///             .await
///             .map_err(|e| TaskError::retryable(e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait Task<R>: Send + Sync + 'static {
    /// Run one attempt of the task
    ///
    /// # Errors
    ///
    /// Return `TaskError::retryable()` for transient failures.
    /// Return `TaskError::non_retryable()` for failures that a retry cannot fix.
    async fn call(&self) -> Result<R, TaskError>;
}

#[async_trait]
impl<R, F, Fut> Task<R> for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, TaskError>> + Send + 'static,
    R: Send + 'static,
{
    async fn call(&self) -> Result<R, TaskError> {
        (self)().await
    }
}

/// Type-erased, cheaply clonable task
///
/// Lets one batch mix tasks of different concrete types.
pub struct SharedTask<R> {
    inner: Arc<dyn Task<R>>,
}

impl<R: Send + 'static> SharedTask<R> {
    /// Erase the concrete type of `task`
    pub fn new<T: Task<R>>(task: T) -> Self {
        Self {
            inner: Arc::new(task),
        }
    }
}

impl<R> Clone for SharedTask<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl<R: Send + 'static> Task<R> for SharedTask<R> {
    async fn call(&self) -> Result<R, TaskError> {
        self.inner.call().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_retryable() {
        let error = TaskError::retryable("timeout");
        assert!(error.retryable);
        assert_eq!(error.to_string(), "timeout");
    }

    #[test]
    fn test_task_error_non_retryable() {
        let error = TaskError::non_retryable("invalid input");
        assert!(!error.retryable);
    }

    #[test]
    fn test_task_error_with_type() {
        let error = TaskError::retryable("connection failed").with_type("CONNECTION_ERROR");

        assert_eq!(error.error_type, Some("CONNECTION_ERROR".to_string()));
        assert_eq!(error.to_string(), "CONNECTION_ERROR: connection failed");
    }

    #[test]
    fn test_panic_payloads() {
        let from_str = TaskError::panicked(Box::new("boom"));
        assert_eq!(from_str.message, "boom");
        assert_eq!(from_str.error_type.as_deref(), Some(TaskError::PANIC));
        assert!(from_str.retryable);

        let from_string = TaskError::panicked(Box::new(String::from("kaboom")));
        assert_eq!(from_string.message, "kaboom");

        let opaque = TaskError::panicked(Box::new(42_u8));
        assert_eq!(opaque.message, "task panicked");
    }

    #[test]
    fn test_from_anyhow() {
        let error: TaskError = anyhow::anyhow!("disk full").into();
        assert!(error.retryable);
        assert_eq!(error.message, "disk full");
    }

    #[tokio::test]
    async fn test_closure_is_task() {
        let task = || async { Ok::<_, TaskError>(7_u32) };
        assert_eq!(Task::<u32>::call(&task).await, Ok(7));
    }

    #[tokio::test]
    async fn test_shared_task_mixes_types() {
        struct Constant(u32);

        #[async_trait]
        impl Task<u32> for Constant {
            async fn call(&self) -> Result<u32, TaskError> {
                Ok(self.0)
            }
        }

        let tasks = vec![
            SharedTask::new(Constant(1)),
            SharedTask::new(|| async { Ok::<_, TaskError>(2) }),
        ];

        let mut results = Vec::new();
        for task in &tasks {
            results.push(task.call().await.unwrap());
        }
        assert_eq!(results, vec![1, 2]);
    }

    #[test]
    fn test_task_error_serialization() {
        let error = TaskError::retryable("test error").with_type("TEST");

        let json = serde_json::to_string(&error).unwrap();
        let parsed: TaskError = serde_json::from_str(&json).unwrap();

        assert_eq!(error, parsed);
    }
}
