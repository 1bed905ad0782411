//! Outcome delivery for submitted tasks

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use super::TaskError;

/// Result of one task attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<R> {
    /// The attempt produced a value
    Success(R),
    /// The attempt failed or panicked
    Failure(TaskError),
}

impl<R> Outcome<R> {
    /// Whether the attempt succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Convert into a standard `Result`
    pub fn into_result(self) -> Result<R, TaskError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(error) => Err(error),
        }
    }
}

impl<R> From<Result<R, TaskError>> for Outcome<R> {
    fn from(result: Result<R, TaskError>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(error) => Self::Failure(error),
        }
    }
}

type Callback<R> = Box<dyn FnOnce(&Outcome<R>) + Send>;

enum CompletionState<R> {
    Pending(Vec<Callback<R>>),
    Complete(Outcome<R>),
}

/// Shared slot written once by the worker and read by any number of observers
pub(crate) struct Completion<R> {
    state: Mutex<CompletionState<R>>,
    blocking: Condvar,
    notify: Notify,
}

impl<R: Clone> Completion<R> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CompletionState::Pending(Vec::new())),
            blocking: Condvar::new(),
            notify: Notify::new(),
        })
    }

    /// Store the outcome, then run callbacks and wake waiters
    ///
    /// Callbacks run outside the lock so they may register further callbacks
    /// or inspect the handle. A second completion is ignored.
    pub(crate) fn complete(&self, outcome: Outcome<R>) {
        let callbacks = {
            let mut state = self.state.lock();
            match &mut *state {
                CompletionState::Complete(_) => return,
                CompletionState::Pending(callbacks) => {
                    let callbacks = std::mem::take(callbacks);
                    *state = CompletionState::Complete(outcome.clone());
                    callbacks
                }
            }
        };

        for callback in callbacks {
            callback(&outcome);
        }

        // Lock pairs with the check in `blocking_wait` so no wakeup is lost.
        let _guard = self.state.lock();
        self.blocking.notify_all();
        self.notify.notify_waiters();
    }

    fn outcome(&self) -> Option<Outcome<R>> {
        match &*self.state.lock() {
            CompletionState::Complete(outcome) => Some(outcome.clone()),
            CompletionState::Pending(_) => None,
        }
    }
}

/// Handle to a task submitted to a [`WorkerPool`](crate::WorkerPool)
///
/// The outcome can be observed by awaiting, by blocking the current thread,
/// or by registering a callback. All observers see the same outcome.
pub struct TaskHandle<R> {
    completion: Arc<Completion<R>>,
}

impl<R> Clone for TaskHandle<R> {
    fn clone(&self) -> Self {
        Self {
            completion: Arc::clone(&self.completion),
        }
    }
}

impl<R> std::fmt::Debug for TaskHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let done = matches!(&*self.completion.state.lock(), CompletionState::Complete(_));
        f.debug_struct("TaskHandle").field("done", &done).finish()
    }
}

impl<R: Clone + Send + 'static> TaskHandle<R> {
    pub(crate) fn new(completion: Arc<Completion<R>>) -> Self {
        Self { completion }
    }

    /// Whether the outcome is available
    pub fn is_done(&self) -> bool {
        self.try_outcome().is_some()
    }

    /// Get the outcome without waiting
    pub fn try_outcome(&self) -> Option<Outcome<R>> {
        self.completion.outcome()
    }

    /// Wait for the outcome
    pub async fn wait(&self) -> Outcome<R> {
        loop {
            let notified = self.completion.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.completion.outcome() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Block the current thread until the outcome is available
    ///
    /// Must not be called from within an async context.
    pub fn blocking_wait(&self) -> Outcome<R> {
        let mut state = self.completion.state.lock();
        loop {
            if let CompletionState::Complete(outcome) = &*state {
                return outcome.clone();
            }
            self.completion.blocking.wait(&mut state);
        }
    }

    /// Register a callback invoked exactly once with the outcome
    ///
    /// Runs immediately on the calling thread if the outcome is already known,
    /// otherwise on the worker that completes the task.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&Outcome<R>) + Send + 'static,
    {
        let ready = {
            let mut state = self.completion.state.lock();
            match &mut *state {
                CompletionState::Pending(callbacks) => {
                    callbacks.push(Box::new(callback));
                    return;
                }
                CompletionState::Complete(outcome) => outcome.clone(),
            }
        };
        callback(&ready);
    }
}
