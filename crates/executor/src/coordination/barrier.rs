//! Countdown barrier released by the final success of a batch

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

/// Countdown that releases waiters once a target number of successes is seen
///
/// The counter is a lock-free atomic and never goes below zero: decrementing
/// an already released barrier is a no-op. The mutex only guards the
/// blocking-waiter handoff.
///
/// # Example
///
/// ```
/// use replay_executor::CompletionBarrier;
///
/// let barrier = CompletionBarrier::new(2);
/// assert!(!barrier.decrement());
/// assert!(barrier.decrement());
/// assert!(barrier.is_done());
/// assert!(!barrier.decrement());
/// assert_eq!(barrier.remaining(), 0);
/// ```
#[derive(Debug)]
pub struct CompletionBarrier {
    target: usize,
    remaining: AtomicUsize,
    notify: Notify,
    lock: Mutex<()>,
    released: Condvar,
}

impl CompletionBarrier {
    /// Create a barrier expecting `target` successes
    pub fn new(target: usize) -> Self {
        Self {
            target,
            remaining: AtomicUsize::new(target),
            notify: Notify::new(),
            lock: Mutex::new(()),
            released: Condvar::new(),
        }
    }

    /// Record one success
    ///
    /// Returns `true` only for the call that brought the count to zero.
    pub fn decrement(&self) -> bool {
        let mut current = self.remaining.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return false;
            }
            match self.remaining.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        if current == 1 {
            self.release();
            true
        } else {
            false
        }
    }

    /// Whether every expected success has been recorded
    pub fn is_done(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }

    /// Number of successes still outstanding
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Number of successes the barrier was created with
    pub fn target(&self) -> usize {
        self.target
    }

    /// Wait until the count reaches zero
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_done() {
                return;
            }
            notified.await;
        }
    }

    /// Block the current thread until the count reaches zero
    ///
    /// Must not be called from within an async context.
    pub fn blocking_wait(&self) {
        let mut guard = self.lock.lock();
        while !self.is_done() {
            self.released.wait(&mut guard);
        }
    }

    fn release(&self) {
        let _guard = self.lock.lock();
        self.released.notify_all();
        self.notify.notify_waiters();
    }
}
