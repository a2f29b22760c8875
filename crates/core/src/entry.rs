//! In-flight load entries

use crate::request::{ConsumerId, ImageConsumer, Slot};
use imgloader_scheduler::CancellationToken;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

pub(crate) type EntryId = u64;

/// One pending "decode this key for these consumers" unit.
///
/// Lives in the coordination state only; decode tasks see a snapshot of it.
pub(crate) struct CacheEntry {
    pub(crate) key: String,
    /// Download name while the entry waits for its file
    pub(crate) url: Option<String>,
    pub(crate) filter: Option<String>,
    pub(crate) http_url: Option<String>,
    pub(crate) final_path: Option<PathBuf>,
    /// The file belongs to someone else and is never deleted on failure
    pub(crate) external_file: bool,
    pub(crate) slot: Slot,
    pub(crate) animated: bool,
    pub(crate) task: Option<CancellationToken>,
    consumers: Vec<Arc<dyn ImageConsumer>>,
}

impl CacheEntry {
    pub(crate) fn new(key: String, slot: Slot) -> Self {
        Self {
            key,
            url: None,
            filter: None,
            http_url: None,
            final_path: None,
            external_file: false,
            slot,
            animated: false,
            task: None,
            consumers: Vec::new(),
        }
    }

    /// Attach a consumer once. Returns `false` if it was already attached.
    pub(crate) fn add_consumer(&mut self, consumer: Arc<dyn ImageConsumer>) -> bool {
        let id = consumer.consumer_id();
        if self.has_consumer(id) {
            return false;
        }
        self.consumers.push(consumer);
        true
    }

    pub(crate) fn remove_consumer(&mut self, id: ConsumerId) -> bool {
        let before = self.consumers.len();
        self.consumers.retain(|c| c.consumer_id() != id);
        self.consumers.len() != before
    }

    pub(crate) fn has_consumer(&self, id: ConsumerId) -> bool {
        self.consumers.iter().any(|c| c.consumer_id() == id)
    }

    pub(crate) fn consumer_ids(&self) -> impl Iterator<Item = ConsumerId> + '_ {
        self.consumers.iter().map(|c| c.consumer_id())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    pub(crate) fn take_consumers(&mut self) -> Vec<Arc<dyn ImageConsumer>> {
        std::mem::take(&mut self.consumers)
    }

    /// Cancel the running decode, if any
    pub(crate) fn cancel_task(&mut self) {
        if let Some(token) = self.task.take() {
            token.cancel();
        }
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("url", &self.url)
            .field("slot", &self.slot)
            .field("consumers", &self.consumers.len())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drawable::Drawable;
    use crate::request::ImageRequest;

    struct Dummy(ConsumerId);

    impl ImageConsumer for Dummy {
        fn consumer_id(&self) -> ConsumerId {
            self.0
        }

        fn request(&self) -> ImageRequest {
            ImageRequest::default()
        }

        fn set_image_by_key(&self, _: &Drawable, _: &str, _: Slot, _: bool) -> bool {
            true
        }
    }

    #[test]
    fn test_consumers_attach_once() {
        let mut entry = CacheEntry::new("1_2".into(), Slot::Full);
        let consumer: Arc<dyn ImageConsumer> = Arc::new(Dummy(ConsumerId::next()));

        assert!(entry.add_consumer(consumer.clone()));
        assert!(!entry.add_consumer(consumer.clone()));
        assert_eq!(entry.consumer_ids().count(), 1);

        assert!(entry.remove_consumer(consumer.consumer_id()));
        assert!(entry.is_empty());
        assert!(!entry.remove_consumer(consumer.consumer_id()));
    }

    #[test]
    fn test_cancel_task_fires_token() {
        let mut entry = CacheEntry::new("1_2".into(), Slot::Thumb);
        let token = CancellationToken::new();
        entry.task = Some(token.clone());

        entry.cancel_task();
        assert!(token.is_cancelled());
        assert!(entry.task.is_none());
    }
}
