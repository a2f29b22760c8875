//! Cancellation tokens for queued work
//!
//! A token is shared between the party that may cancel a task and the queue
//! thread running it. The cancellation flag and the reference to the running
//! thread sit behind one lock, so a cancel request either happens before the
//! task starts (and the task never runs) or wakes the running thread if it is
//! parked in an interruptible wait.

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

#[derive(Default)]
struct CancelState {
    cancelled: bool,
    running: Option<Thread>,
}

/// Cancellation token for cooperative task cancellation
///
/// # Example
///
/// ```
/// use imgloader_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// assert!(worker_token.enter().is_none());
/// ```
#[derive(Clone, Default)]
pub struct CancellationToken {
    state: Arc<Mutex<CancelState>>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel this token and wake the thread currently running under it.
    ///
    /// Idempotent.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        if let Some(thread) = &state.running {
            thread.unpark();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// Register the current thread as the one executing the task.
    ///
    /// Returns `None` if the token was already cancelled. The registration
    /// lasts as long as the returned guard.
    pub fn enter(&self) -> Option<RunGuard<'_>> {
        let mut state = self.state.lock();
        if state.cancelled {
            return None;
        }
        state.running = Some(thread::current());
        Some(RunGuard { token: self })
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `true` if the full duration elapsed without cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::park_timeout(deadline - now);
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Clears the running-thread registration when dropped
pub struct RunGuard<'a> {
    token: &'a CancellationToken,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.token.state.lock().running = None;
    }
}
