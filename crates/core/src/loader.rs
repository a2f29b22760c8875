//! The image loader
//!
//! Owns the bitmap cache and five serial queues:
//!
//! - `image-load`: coordination, owns every in-flight index
//! - `cache-out`: full image decode
//! - `cache-thumb-out`: thumbnail decode
//! - `thumb-generating`: quality thumbnail generation
//! - `ui`: stands in for the presentation thread unless the host supplies
//!   its own [`UiDispatcher`]
//!
//! Construct one loader at application start and pass it to whatever needs
//! images. Dropping it stops every queue.

use crate::bitmaps::{PhotoSize, ScaleRequest, LOCAL_VOLUME_ID};
use crate::codec::{ImageCodec, RasterCodec};
use crate::context::{Collaborators, LoaderContext, Queues};
use crate::coordinator::{LoadOperation, LoadTarget, LoaderState, LoadingStats};
use crate::drawable::Drawable;
use crate::key::{self, DEFAULT_EXT};
use crate::media::{MediaProvider, NoMediaProvider};
use crate::notify::{Notification, NotificationCenter};
use crate::request::{ConsumerId, ImageConsumer, ImageLocation, ImageRequest, Slot, SlotSelection};
use crate::ui::UiDispatcher;
use imgloader_cache::{Bitmap, BitmapCache, CacheConfig, MediaDirs};
use imgloader_scheduler::{DispatchQueue, IdleTracker, StateQueue};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub struct ImageLoader {
    ctx: Arc<LoaderContext>,
    tracker: IdleTracker,
    coordinator: StateQueue<LoaderState>,
    cache_out: DispatchQueue,
    thumb_out: DispatchQueue,
    thumb_generating: DispatchQueue,
    ui_queue: Option<DispatchQueue>,
}

impl ImageLoader {
    /// Create a loader.
    ///
    /// Without a `ui` dispatcher the loader runs its own `ui` queue, which
    /// [`wait_idle`](Self::wait_idle) also covers. A host dispatcher is
    /// outside the loader's idle tracking.
    pub fn new(
        config: CacheConfig,
        codec: Arc<dyn RasterCodec>,
        media: Arc<dyn MediaProvider>,
        ui: Option<Arc<dyn UiDispatcher>>,
    ) -> Self {
        let tracker = IdleTracker::new();
        let coordinator = StateQueue::new("image-load", tracker.clone(), LoaderState::default());
        let cache_out = DispatchQueue::new("cache-out", tracker.clone());
        let thumb_out = DispatchQueue::new("cache-thumb-out", tracker.clone());
        let thumb_generating = DispatchQueue::new("thumb-generating", tracker.clone());

        let (ui, ui_queue) = match ui {
            Some(ui) => (ui, None),
            None => {
                let queue = DispatchQueue::new("ui", tracker.clone());
                let ui: Arc<dyn UiDispatcher> = Arc::new(queue.handle());
                (ui, Some(queue))
            }
        };

        let queues = Queues {
            coordinator: coordinator.handle(),
            cache_out: cache_out.handle(),
            thumb_out: thumb_out.handle(),
            thumb_generating: thumb_generating.handle(),
        };
        let ctx = Arc::new(LoaderContext::new(
            config,
            Collaborators { codec, media, ui },
            queues,
        ));

        let loader = Self {
            ctx,
            tracker,
            coordinator,
            cache_out,
            thumb_out,
            thumb_generating,
            ui_queue,
        };
        if let Err(e) = loader.check_media_paths() {
            log::warn!(
                "cannot prepare cache directory {}: {}",
                loader.ctx.dirs.root().display(),
                e
            );
        }
        log::debug!(
            "image loader ready, {} MB bitmap cache in {}",
            loader.ctx.config.memory_cache_mb(),
            loader.ctx.dirs.root().display()
        );
        loader
    }

    /// Loader with the `image` crate codec, no media store and its own ui queue
    pub fn with_defaults(config: CacheConfig) -> Self {
        Self::new(config, Arc::new(ImageCodec::new()), Arc::new(NoMediaProvider), None)
    }

    /// Create the media directories and the `.nomedia` marker
    pub fn check_media_paths(&self) -> io::Result<()> {
        self.ctx.dirs.ensure()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.ctx.config
    }

    pub fn dirs(&self) -> &MediaDirs {
        &self.ctx.dirs
    }

    pub fn cache(&self) -> &BitmapCache {
        &self.ctx.cache
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.ctx.notifications
    }

    /// Load whatever `consumer` currently requests.
    ///
    /// Rasters already in memory are delivered before this returns. Everything
    /// else is handed to the coordination queue and delivered later through
    /// the ui dispatcher.
    pub fn load_image_for(&self, consumer: Arc<dyn ImageConsumer>) {
        let request = consumer.request();
        let id = consumer.consumer_id();
        let ext = request.ext.clone().unwrap_or_else(|| DEFAULT_EXT.to_string());
        let full = resolve_full(&request, &ext);
        let thumb = resolve_thumb(&request, &ext);

        if let Some(target) = &full {
            if let Some(bitmap) = self.ctx.cache.get(&target.key) {
                self.cancel_loading_for(id, SlotSelection::Both);
                // A forced preview shows the thumbnail first and lets the full
                // raster arrive through the regular load
                if !request.force_preview {
                    consumer.set_image_by_key(&Drawable::Static(bitmap), &target.key, Slot::Full, true);
                    return;
                }
            }
        }

        let mut thumb_set = false;
        if let Some(target) = &thumb {
            if let Some(bitmap) = self.ctx.cache.get(&target.key) {
                consumer.set_image_by_key(&Drawable::Static(bitmap), &target.key, Slot::Thumb, true);
                self.cancel_loading_for(id, SlotSelection::ThumbOnly);
                thumb_set = true;
            }
        }

        if let Some(target) = thumb {
            self.post_operation(LoadOperation {
                consumer: consumer.clone(),
                slot: Slot::Thumb,
                thumb_already_set: thumb_set,
                target,
                needs_quality_thumb: request.needs_quality_thumb,
                should_generate_quality_thumb: request.should_generate_quality_thumb,
                media: request.media.clone(),
            });
        }
        if let Some(target) = full {
            self.post_operation(LoadOperation {
                consumer,
                slot: Slot::Full,
                thumb_already_set: false,
                target,
                needs_quality_thumb: false,
                should_generate_quality_thumb: false,
                media: None,
            });
        }
    }

    fn post_operation(&self, op: LoadOperation) {
        let ctx = self.ctx.clone();
        self.coordinator
            .post(move |state| state.create_load_operation(&ctx, op));
    }

    /// Detach a consumer from the loads of the selected slots
    pub fn cancel_loading_for(&self, consumer: ConsumerId, selection: SlotSelection) {
        self.coordinator
            .post(move |state| state.cancel_for(consumer, selection));
    }

    /// The external downloader finished fetching `name` into `path`
    pub fn file_did_load(&self, name: &str, path: impl Into<PathBuf>) {
        let ctx = self.ctx.clone();
        let name = name.to_string();
        let path = path.into();
        self.coordinator
            .post(move |state| state.file_did_load(&ctx, &name, path));
    }

    /// The external downloader gave up on `name`
    pub fn file_did_fail_load(&self, name: &str) {
        let ctx = self.ctx.clone();
        let name = name.to_string();
        self.coordinator
            .post(move |state| state.file_did_fail_load(&ctx, &name));
    }

    pub fn increment_use_count(&self, key: &str) {
        self.ctx.cache.increment_use_count(key);
    }

    /// Returns `true` when no uses of `key` remain
    pub fn decrement_use_count(&self, key: &str) -> bool {
        self.ctx.cache.decrement_use_count(key)
    }

    pub fn remove_image(&self, key: &str) {
        self.ctx.cache.remove_image(key);
    }

    pub fn is_in_cache(&self, key: &str) -> bool {
        self.ctx.cache.contains(key)
    }

    pub fn clear_memory(&self) {
        self.ctx.cache.evict_all();
    }

    /// Move cached rasters from `old_key` to `new_key`, including every
    /// `@filter` variant.
    pub fn replace_image_in_cache(&self, old_key: &str, new_key: &str) {
        let filters = self.ctx.cache.filter_keys(old_key);
        if filters.is_empty() {
            self.replace_key(old_key.to_string(), new_key.to_string());
            return;
        }
        for filter in filters {
            self.replace_key(
                format!("{}@{}", old_key, filter),
                format!("{}@{}", new_key, filter),
            );
        }
    }

    fn replace_key(&self, old_key: String, new_key: String) {
        self.ctx.cache.replace(&old_key, &new_key);
        self.ctx
            .notifications
            .post(&Notification::PhotoReplaced { old_key, new_key });
    }

    /// Decode the file at `path`, downsampled by the largest (or smallest,
    /// with `use_max_scale == false`) factor that fits the bounds.
    pub fn load_bitmap(
        &self,
        path: impl AsRef<Path>,
        max_width: f32,
        max_height: f32,
        use_max_scale: bool,
    ) -> Option<Bitmap> {
        self.ctx
            .load_bitmap(path.as_ref(), max_width, max_height, use_max_scale)
    }

    /// Scale `bitmap` into bounds and store it as a JPEG under a fresh local id
    pub fn scale_and_save(&self, bitmap: &Bitmap, request: &ScaleRequest) -> Option<PhotoSize> {
        self.ctx.scale_and_save(bitmap, request)
    }

    /// Snapshot of the in-flight indices, taken on the coordination queue
    pub fn loading_stats(&self) -> LoadingStats {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.coordinator.post(move |state| {
            let _ = tx.send(state.stats());
        });
        rx.recv().unwrap_or_default()
    }

    /// Block until every queue is idle. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.tracker.wait_idle(timeout)
    }

    /// Stop every queue after the work already queued on it
    pub fn shutdown(&self) {
        self.cache_out.shutdown();
        self.thumb_out.shutdown();
        self.thumb_generating.shutdown();
        self.coordinator.shutdown();
        if let Some(ui) = &self.ui_queue {
            ui.shutdown();
        }
    }
}

impl Drop for ImageLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn resolve_full(request: &ImageRequest, ext: &str) -> Option<LoadTarget> {
    let mut http_url = None;
    let mut local_path = None;
    let mut cache_only = request.cache_only;

    let (key, url) = match request.image.as_ref()? {
        ImageLocation::Http(url) => {
            http_url = Some(url.clone());
            key::http_location_key(url)
        }
        ImageLocation::File(location) => {
            if request.thumb.as_ref() == Some(location) {
                return None;
            }
            cache_only |= location.has_key
                || request.ext.is_some()
                || (location.volume_id == LOCAL_VOLUME_ID && location.local_id < 0);
            local_path = location.local_path.clone();
            key::file_location_key(location, ext)
        }
        ImageLocation::Document(document) => {
            cache_only |= !document.is_gif;
            key::document_key(document)?
        }
    };

    Some(LoadTarget {
        key: key::with_filter(&key, request.filter.as_deref()),
        url,
        filter: request.filter.clone(),
        http_url,
        local_path,
        location: request.image.clone(),
        cache_only,
        size: request.size,
    })
}

fn resolve_thumb(request: &ImageRequest, ext: &str) -> Option<LoadTarget> {
    let location = request.thumb.as_ref()?;
    let (key, url) = key::file_location_key(location, ext);
    Some(LoadTarget {
        key: key::with_filter(&key, request.thumb_filter.as_deref()),
        url,
        filter: request.thumb_filter.clone(),
        http_url: None,
        local_path: location.local_path.clone(),
        location: Some(ImageLocation::File(location.clone())),
        cache_only: false,
        size: 0,
    })
}
