//! Replay queue for failed attempts

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Thread-safe queue of work waiting to be resubmitted
///
/// Items come back out roughly in insertion order, but callers must not rely
/// on it. An empty queue is signalled by `None`, never by an error.
#[derive(Debug)]
pub struct ReplayQueue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
    pushed: AtomicU64,
}

impl<T> Default for ReplayQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReplayQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            pushed: AtomicU64::new(0),
        }
    }

    /// Enqueue an item and wake one waiting poller
    pub fn push(&self, item: T) {
        self.items.lock().push_back(item);
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
    }

    /// Take an item if one is present
    pub fn poll(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Take an item, waiting up to `timeout` for one to arrive
    pub async fn poll_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = self.poll() {
                return Some(item);
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return self.poll();
            }
        }
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Total number of pushes over the queue's lifetime
    pub fn total_pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }
}
