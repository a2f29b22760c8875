//! Presentation-thread dispatch

use imgloader_scheduler::DispatchHandle;

pub type UiTask = Box<dyn FnOnce() + Send + 'static>;

/// Runs closures on the thread that owns the consumers.
///
/// Cache publication and consumer callbacks always go through here.
pub trait UiDispatcher: Send + Sync {
    fn dispatch(&self, task: UiTask);
}

impl UiDispatcher for DispatchHandle {
    fn dispatch(&self, task: UiTask) {
        if !self.post(task) {
            log::debug!("ui queue {} stopped, dropping callback", self.name());
        }
    }
}
