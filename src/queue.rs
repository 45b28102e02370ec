//! Thread-safe queue
//!
//! The hand-off point between the I/O thread and the application thread.
//!
//! ## Design
//! - One `parking_lot::Mutex` guards the deque; every operation takes it.
//! - A `Condvar` is signalled on every push so `wait()` can park the owner
//!   thread until something arrives. Waits re-check emptiness in a loop, so
//!   spurious wakeups are harmless.
//! - Unbounded: a slow consumer lets the queue grow without limit.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Concurrent double-ended queue with a blocking wait
pub struct TsQueue<T> {
    deque: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> TsQueue<T> {
    pub fn new() -> Self {
        Self {
            deque: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    pub fn push_back(&self, item: T) {
        self.deque.lock().push_back(item);
        self.available.notify_one();
    }

    pub fn push_front(&self, item: T) {
        self.deque.lock().push_front(item);
        self.available.notify_one();
    }

    pub fn pop_front(&self) -> Option<T> {
        self.deque.lock().pop_front()
    }

    pub fn pop_back(&self) -> Option<T> {
        self.deque.lock().pop_back()
    }

    pub fn size(&self) -> usize {
        self.deque.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.deque.lock().is_empty()
    }

    pub fn clear(&self) {
        self.deque.lock().clear();
    }

    /// Block the calling thread until the queue is non-empty
    pub fn wait(&self) {
        let mut deque = self.deque.lock();
        while deque.is_empty() {
            self.available.wait(&mut deque);
        }
    }

    /// Like `wait`, but gives up after `timeout`
    ///
    /// Returns whether the queue is non-empty.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut deque = self.deque.lock();
        while deque.is_empty() {
            if self.available.wait_until(&mut deque, deadline).timed_out() {
                return !deque.is_empty();
            }
        }
        true
    }
}

impl<T: Clone> TsQueue<T> {
    /// Copy of the front item
    pub fn front(&self) -> Option<T> {
        self.deque.lock().front().cloned()
    }

    /// Copy of the back item
    pub fn back(&self) -> Option<T> {
        self.deque.lock().back().cloned()
    }
}

impl<T> Default for TsQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TsQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TsQueue").field("len", &self.size()).finish()
    }
}
