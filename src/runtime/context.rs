//! Caller execution context
//!
//! Completions happen on worker threads, but user callbacks must run where
//! the operation was requested. A [`CallerContext`] is a queue owned by the
//! requesting thread: workers post closures into it and the owner drains it
//! with [`CallerContext::run_pending`] (or blocks in
//! [`CallerContext::run_until_idle`]), similar to a single-threaded event loop
//! turn.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Queue of callbacks to be run on the owning thread
#[derive(Clone)]
pub struct CallerContext {
    sender: Sender<Callback>,
    receiver: Receiver<Callback>,
}

impl CallerContext {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Queue a callback for the owner thread
    pub fn post<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // Both ends live in self, so the channel cannot be disconnected here
        let _ = self.sender.send(Box::new(callback));
    }

    /// Number of callbacks waiting to run
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Run every queued callback without blocking
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(callback) = self.receiver.try_recv() {
            callback();
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for a callback, then drain the queue.
    pub fn run_until_idle(&self, timeout: Duration) -> usize {
        match self.receiver.recv_timeout(timeout) {
            Ok(callback) => {
                callback();
                1 + self.run_pending()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Keep draining until `count` callbacks ran or `timeout` elapsed.
    /// Returns the number that ran.
    pub fn run_until(&self, count: usize, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut ran = 0;
        while ran < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            ran += self.run_until_idle(remaining);
        }
        ran
    }
}

impl Default for CallerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CallerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallerContext")
            .field("pending", &self.pending())
            .finish()
    }
}
