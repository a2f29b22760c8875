//! State shared by every loader queue

use crate::codec::{DecodeOptions, RasterCodec};
use crate::coordinator::LoaderState;
use crate::error::DecodeError;
use crate::media::MediaProvider;
use crate::notify::NotificationCenter;
use crate::ui::{UiDispatcher, UiTask};
use image::DynamicImage;
use imgloader_cache::{BitmapCache, CacheConfig, ColorDepth, MediaDirs};
use imgloader_scheduler::{DispatchHandle, QueueHandle};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Minimum spacing between decode starts in legacy purgeable mode
pub(crate) const DECODE_THROTTLE: Duration = Duration::from_millis(20);

/// First local id handed out for locally generated photo sizes
const INITIAL_LOCAL_ID: i32 = -210_000;

/// Collaborators and queue handles captured by every task.
///
/// Holds only sender handles; the queues themselves belong to the loader.
pub(crate) struct LoaderContext {
    pub(crate) config: CacheConfig,
    pub(crate) dirs: MediaDirs,
    pub(crate) cache: BitmapCache,
    pub(crate) codec: Arc<dyn RasterCodec>,
    pub(crate) media: Arc<dyn MediaProvider>,
    pub(crate) ui: Arc<dyn UiDispatcher>,
    pub(crate) notifications: Arc<NotificationCenter>,
    pub(crate) coordinator: QueueHandle<LoaderState>,
    pub(crate) cache_out: DispatchHandle,
    pub(crate) thumb_out: DispatchHandle,
    pub(crate) thumb_generating: DispatchHandle,
    last_decode: Mutex<Option<Instant>>,
    last_local_id: AtomicI32,
}

pub(crate) struct Queues {
    pub(crate) coordinator: QueueHandle<LoaderState>,
    pub(crate) cache_out: DispatchHandle,
    pub(crate) thumb_out: DispatchHandle,
    pub(crate) thumb_generating: DispatchHandle,
}

pub(crate) struct Collaborators {
    pub(crate) codec: Arc<dyn RasterCodec>,
    pub(crate) media: Arc<dyn MediaProvider>,
    pub(crate) ui: Arc<dyn UiDispatcher>,
}

impl LoaderContext {
    pub(crate) fn new(config: CacheConfig, collaborators: Collaborators, queues: Queues) -> Self {
        Self {
            dirs: MediaDirs::new(&config.cache_dir),
            cache: BitmapCache::new(config.memory_cache_size),
            codec: collaborators.codec,
            media: collaborators.media,
            ui: collaborators.ui,
            notifications: Arc::new(NotificationCenter::new()),
            coordinator: queues.coordinator,
            cache_out: queues.cache_out,
            thumb_out: queues.thumb_out,
            thumb_generating: queues.thumb_generating,
            last_decode: Mutex::new(None),
            last_local_id: AtomicI32::new(INITIAL_LOCAL_ID),
            config,
        }
    }

    pub(crate) fn on_ui<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let task: UiTask = Box::new(task);
        self.ui.dispatch(task);
    }

    pub(crate) fn decode_options(&self, sample_size: u32, depth: ColorDepth) -> DecodeOptions {
        DecodeOptions {
            sample_size: sample_size.max(1),
            depth,
            alloc_limit: self.config.decode_alloc_limit,
            apply_orientation: false,
        }
    }

    /// Decode, and on an allocation failure empty the bitmap cache and try
    /// exactly once more.
    pub(crate) fn decode_with_retry(
        &self,
        bytes: &[u8],
        options: &DecodeOptions,
    ) -> Result<DynamicImage, DecodeError> {
        match self.codec.decode(bytes, options) {
            Err(err) if err.is_out_of_memory() => {
                log::warn!("decode ran out of memory, clearing bitmap cache and retrying");
                self.cache.evict_all();
                self.codec.decode(bytes, options)
            }
            result => result,
        }
    }

    /// How long to wait before the next decode may start, if at all.
    ///
    /// Only legacy purgeable mode spaces decodes out.
    pub(crate) fn throttle_delay(&self) -> Option<Duration> {
        if !self.config.legacy_purgeable {
            return None;
        }
        let last = (*self.last_decode.lock())?;
        (last.elapsed() < DECODE_THROTTLE).then_some(DECODE_THROTTLE)
    }

    pub(crate) fn mark_decode_start(&self) {
        *self.last_decode.lock() = Some(Instant::now());
    }

    /// Allocate a fresh negative local id
    pub(crate) fn next_local_id(&self) -> i32 {
        self.last_local_id.fetch_sub(1, Ordering::Relaxed) - 1
    }

    /// Edge length of generated quality thumbnails
    pub(crate) fn quality_thumb_size(&self) -> u32 {
        let shorter = self.config.display_width.min(self.config.display_height);
        (shorter / 4).clamp(1, 180)
    }
}
