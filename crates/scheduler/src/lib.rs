//! Image Loader Scheduler Library
//!
//! Named single-worker queues, cooperative cancellation tokens and a shared
//! idle tracker.
//!
//! The loader runs one queue per concern: full-image decode, thumbnail
//! decode, thumbnail generation, and a coordination queue that owns all
//! request bookkeeping. Tasks on one queue run in post order; there is no
//! ordering between queues.
//!
//! # Example
//!
//! ```
//! use imgloader_scheduler::{CancellationToken, DispatchQueue, IdleTracker};
//! use std::time::Duration;
//!
//! let tracker = IdleTracker::new();
//! let decode = DispatchQueue::new("cache-out", tracker.clone());
//!
//! let token = CancellationToken::new();
//! let task_token = token.clone();
//! decode.post(move || {
//!     let Some(_running) = task_token.enter() else {
//!         return; // cancelled before it started
//!     };
//!     // ... decode ...
//! });
//!
//! assert!(tracker.wait_idle(Duration::from_secs(1)));
//! ```

mod cancel;
mod queue;
mod tracker;

pub use cancel::{CancellationToken, RunGuard};
pub use queue::{DispatchHandle, DispatchQueue, QueueHandle, StateQueue};
pub use tracker::IdleTracker;
