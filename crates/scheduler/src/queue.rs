//! Named serial work queues.
//!
//! Each queue owns exactly one worker thread and runs its tasks strictly in
//! post order. Queues never share workers, so a slow task on one queue cannot
//! delay another. A `StateQueue` additionally owns a value that only its own
//! tasks can touch, which lets bookkeeping live on one thread without locks.

use crate::tracker::IdleTracker;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle, ThreadId};

type StateTask<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

enum Message<S> {
    Run(StateTask<S>),
    Shutdown,
}

/// Cloneable sender side of a [`StateQueue`]
pub struct QueueHandle<S> {
    name: String,
    sender: Sender<Message<S>>,
    tracker: IdleTracker,
}

impl<S> Clone for QueueHandle<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            sender: self.sender.clone(),
            tracker: self.tracker.clone(),
        }
    }
}

impl<S: 'static> QueueHandle<S> {
    /// Queue a task. Returns `false` if the queue has shut down.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.tracker.begin();
        if self.sender.send(Message::Run(Box::new(task))).is_err() {
            self.tracker.end();
            log::debug!("dropped task posted to stopped queue {}", self.name);
            return false;
        }
        true
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of messages waiting to be picked up
    pub fn pending(&self) -> usize {
        self.sender.len()
    }
}

/// Serial queue whose tasks share exclusive access to a state value
///
/// # Example
///
/// ```
/// use imgloader_scheduler::{IdleTracker, StateQueue};
///
/// let queue = StateQueue::new("counter", IdleTracker::new(), 0u32);
/// queue.post(|count| *count += 1);
/// queue.post(|count| assert_eq!(*count, 1));
/// queue.sync();
/// queue.shutdown();
/// ```
pub struct StateQueue<S: Send + 'static> {
    handle: QueueHandle<S>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl<S: Send + 'static> StateQueue<S> {
    /// Spawn the worker thread for a new queue.
    ///
    /// # Panics
    ///
    /// Panics if the operating system refuses to spawn a thread.
    pub fn new(name: &str, tracker: IdleTracker, state: S) -> Self {
        let (sender, receiver) = unbounded();
        let worker_tracker = tracker.clone();
        let queue_name = name.to_string();

        let thread = thread::Builder::new()
            .name(format!("imgloader-{}", name))
            .spawn(move || Self::run(queue_name, receiver, worker_tracker, state))
            .expect("Failed to spawn queue thread");

        Self {
            thread_id: thread.thread().id(),
            handle: QueueHandle {
                name: name.to_string(),
                sender,
                tracker,
            },
            thread: Mutex::new(Some(thread)),
        }
    }

    fn run(name: String, receiver: Receiver<Message<S>>, tracker: IdleTracker, mut state: S) {
        log::trace!("queue {} started", name);
        while let Ok(message) = receiver.recv() {
            match message {
                Message::Run(task) => {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| task(&mut state)));
                    if result.is_err() {
                        log::error!("task on queue {} panicked", name);
                    }
                    tracker.end();
                }
                Message::Shutdown => break,
            }
        }

        // Release the counts of anything still queued behind the shutdown
        while let Ok(message) = receiver.try_recv() {
            if let Message::Run(_) = message {
                tracker.end();
            }
        }
        log::trace!("queue {} stopped", name);
    }

    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.handle.post(task)
    }

    pub fn handle(&self) -> QueueHandle<S> {
        self.handle.clone()
    }

    pub fn name(&self) -> &str {
        &self.handle.name
    }

    pub fn pending(&self) -> usize {
        self.handle.pending()
    }

    /// True when called from this queue's worker thread
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Block until every task posted before this call has run.
    ///
    /// Returns immediately when called from the queue's own thread.
    pub fn sync(&self) {
        if self.is_current() {
            return;
        }
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        if self.post(move |_| {
            let _ = done_tx.send(());
        }) {
            let _ = done_rx.recv();
        }
    }

    /// Stop the worker after the tasks already queued and wait for it to exit
    pub fn shutdown(&self) {
        let _ = self.handle.sender.send(Message::Shutdown);
        if self.is_current() {
            return;
        }
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                log::error!("queue {} worker panicked", self.name());
            }
        }
    }
}

impl<S: Send + 'static> Drop for StateQueue<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Serial queue for stateless tasks
pub struct DispatchQueue {
    inner: StateQueue<()>,
}

impl DispatchQueue {
    pub fn new(name: &str, tracker: IdleTracker) -> Self {
        Self {
            inner: StateQueue::new(name, tracker, ()),
        }
    }

    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.post(move |_| task())
    }

    pub fn handle(&self) -> DispatchHandle {
        DispatchHandle {
            inner: self.inner.handle(),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Number of tasks waiting behind the one currently running
    pub fn pending(&self) -> usize {
        self.inner.pending()
    }

    pub fn is_current(&self) -> bool {
        self.inner.is_current()
    }

    pub fn sync(&self) {
        self.inner.sync();
    }

    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

/// Cloneable sender side of a [`DispatchQueue`]
#[derive(Clone)]
pub struct DispatchHandle {
    inner: QueueHandle<()>,
}

impl DispatchHandle {
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.post(move |_| task())
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn pending(&self) -> usize {
        self.inner.pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let queue = DispatchQueue::new("fifo", IdleTracker::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20 {
            let order = order.clone();
            queue.post(move || order.lock().push(i));
        }
        queue.sync();

        assert_eq!(*order.lock(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_state_queue_owns_state() {
        let queue = StateQueue::new("state", IdleTracker::new(), Vec::<u32>::new());
        let handle = queue.handle();

        queue.post(|v| v.push(1));
        handle.post(|v| v.push(2));

        let (tx, rx) = crossbeam_channel::bounded(1);
        queue.post(move |v| tx.send(v.clone()).unwrap());
        assert_eq!(rx.recv().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_tracker_spans_queues() {
        let tracker = IdleTracker::new();
        let first = DispatchQueue::new("first", tracker.clone());
        let second = DispatchQueue::new("second", tracker.clone());
        let ran = Arc::new(AtomicUsize::new(0));

        let second_handle = second.handle();
        let counter = ran.clone();
        first.post(move || {
            thread::sleep(Duration::from_millis(10));
            second_handle.post(move || {
                thread::sleep(Duration::from_millis(10));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        assert!(tracker.wait_idle(Duration::from_secs(5)));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_task_does_not_stop_queue() {
        let tracker = IdleTracker::new();
        let queue = DispatchQueue::new("panics", tracker.clone());
        let ran = Arc::new(AtomicUsize::new(0));

        queue.post(|| panic!("boom"));
        let counter = ran.clone();
        queue.post(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(tracker.wait_idle(Duration::from_secs(5)));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_post_after_shutdown() {
        let tracker = IdleTracker::new();
        let queue = DispatchQueue::new("stopped", tracker.clone());
        let handle = queue.handle();
        queue.shutdown();

        assert!(!handle.post(|| {}));
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn test_pending_counts_queued_tasks() {
        let queue = DispatchQueue::new("pending", IdleTracker::new());
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);

        queue.post(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        });
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        queue.post(|| {});
        queue.post(|| {});
        assert_eq!(queue.pending(), 2);
        assert_eq!(queue.handle().pending(), 2);

        drop(release_tx);
        queue.sync();
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_sync_from_own_thread_returns() {
        let queue = Arc::new(DispatchQueue::new("reentrant", IdleTracker::new()));
        let inner = queue.clone();
        let (tx, rx) = crossbeam_channel::bounded(1);

        queue.post(move || {
            inner.sync();
            tx.send(inner.is_current()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }
}
