//! Publish/subscribe hub for loader events

use imgloader_cache::Bitmap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Events broadcast by the loader
#[derive(Debug, Clone)]
pub enum Notification {
    /// A quality thumbnail was written to disk and published under `key`
    ThumbGenerated { key: String, bitmap: Bitmap },
    /// A cached raster moved from `old_key` to `new_key`
    PhotoReplaced { old_key: String, new_key: String },
}

impl Notification {
    pub fn key(&self) -> &str {
        match self {
            Notification::ThumbGenerated { key, .. } => key,
            Notification::PhotoReplaced { old_key, .. } => old_key,
        }
    }
}

/// Handle returned by [`NotificationCenter::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Observer = Arc<dyn Fn(&Notification) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    key: Option<String>,
    observer: Observer,
}

#[derive(Default)]
pub struct NotificationCenter {
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe every notification
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.add(None, Arc::new(observer))
    }

    /// Observe only notifications for `key`
    pub fn subscribe_key<F>(&self, key: &str, observer: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.add(Some(key.to_string()), Arc::new(observer))
    }

    fn add(&self, key: Option<String>, observer: Observer) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.lock().push(Subscription { id, key, observer });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Deliver `notification` to matching observers on the calling thread
    pub fn post(&self, notification: &Notification) {
        // Observers run outside the lock so they may subscribe or unsubscribe
        let observers: Vec<Observer> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|s| s.key.as_deref().map_or(true, |k| k == notification.key()))
            .map(|s| s.observer.clone())
            .collect();

        log::trace!(
            "posting notification for {} to {} observers",
            notification.key(),
            observers.len()
        );
        for observer in observers {
            observer(notification);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.subscriptions.lock().len()
    }
}
