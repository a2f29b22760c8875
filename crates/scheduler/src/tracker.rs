//! Outstanding-work tracking across a group of queues
//!
//! Every task posted to a queue in the group is counted until it has run.
//! Because a running task posts its follow-up work before its own count is
//! released, the counter only reaches zero once the whole group is quiet.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct TrackerState {
    outstanding: Mutex<usize>,
    idle: Condvar,
}

/// Shared counter of tasks that were posted but have not finished
#[derive(Clone, Default)]
pub struct IdleTracker {
    state: Arc<TrackerState>,
}

impl IdleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn begin(&self) {
        *self.state.outstanding.lock() += 1;
    }

    pub(crate) fn end(&self) {
        let mut outstanding = self.state.outstanding.lock();
        *outstanding = outstanding.saturating_sub(1);
        if *outstanding == 0 {
            self.state.idle.notify_all();
        }
    }

    /// Number of tasks posted but not yet finished
    pub fn outstanding(&self) -> usize {
        *self.state.outstanding.lock()
    }

    /// Block until no task is outstanding.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut outstanding = self.state.outstanding.lock();
        while *outstanding > 0 {
            if self.state.idle.wait_until(&mut outstanding, deadline).timed_out() {
                return *outstanding == 0;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_idle_when_empty() {
        let tracker = IdleTracker::new();
        assert!(tracker.wait_idle(Duration::from_millis(1)));
    }

    #[test]
    fn test_wait_times_out() {
        let tracker = IdleTracker::new();
        tracker.begin();
        assert!(!tracker.wait_idle(Duration::from_millis(10)));
        assert_eq!(tracker.outstanding(), 1);
    }

    #[test]
    fn test_wait_wakes_on_last_end() {
        let tracker = IdleTracker::new();
        tracker.begin();
        tracker.begin();

        let worker = tracker.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            worker.end();
            worker.end();
        });

        assert!(tracker.wait_idle(Duration::from_secs(5)));
        handle.join().unwrap();
    }
}
