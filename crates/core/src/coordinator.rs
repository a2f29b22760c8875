//! Request coordination
//!
//! [`LoaderState`] holds every index of in-flight work. It is owned by the
//! coordination queue and only ever touched by tasks running there, so none
//! of the maps below need a lock.
//!
//! An entry is reachable by the key it will publish under (once it has a
//! file to decode), or by its download name (while it waits for one), and by
//! the tag of every consumer attached to it. When the last consumer detaches
//! the entry leaves all three indices in the same step and its decode is
//! cancelled.

use crate::context::LoaderContext;
use crate::decode_task::{DecodeJob, DecodeTask};
use crate::drawable::Drawable;
use crate::entry::{CacheEntry, EntryId};
use crate::key::{is_animated_url, SourceUrl};
use crate::request::{
    ConsumerId, ConsumerTag, FileLocation, ImageConsumer, ImageLocation, MediaAttachment,
    MediaType, Slot, SlotSelection,
};
use crate::thumb_task::ThumbGenerateTask;
use imgloader_cache::MediaDir;
use imgloader_scheduler::CancellationToken;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// A resolved load for one slot
#[derive(Debug, Clone)]
pub(crate) struct LoadTarget {
    /// Cache key including the `@filter` suffix
    pub(crate) key: String,
    /// Download name (`<key>.<ext>`)
    pub(crate) url: String,
    pub(crate) filter: Option<String>,
    pub(crate) http_url: Option<String>,
    /// File the platform already holds for this location
    pub(crate) local_path: Option<PathBuf>,
    pub(crate) location: Option<ImageLocation>,
    pub(crate) cache_only: bool,
    pub(crate) size: u32,
}

pub(crate) struct LoadOperation {
    pub(crate) consumer: Arc<dyn ImageConsumer>,
    pub(crate) slot: Slot,
    /// The thumbnail is already on screen; only quality-thumb bookkeeping runs
    pub(crate) thumb_already_set: bool,
    pub(crate) target: LoadTarget,
    pub(crate) needs_quality_thumb: bool,
    pub(crate) should_generate_quality_thumb: bool,
    pub(crate) media: Option<MediaAttachment>,
}

struct ThumbWaitInfo {
    count: usize,
    location: FileLocation,
    filter: Option<String>,
    media_type: MediaType,
}

struct GenerateTask {
    generation: u64,
    token: CancellationToken,
}

/// Snapshot of the coordination indices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadingStats {
    pub entries: usize,
    pub by_url: usize,
    pub by_key: usize,
    pub by_tag: usize,
    /// Media files with consumers waiting for their quality thumbnail
    pub waiting_for_quality_thumb: usize,
    pub generating_thumbs: usize,
}

impl LoadingStats {
    pub fn is_empty(&self) -> bool {
        *self == LoadingStats::default()
    }
}

#[derive(Default)]
pub(crate) struct LoaderState {
    next_id: u64,
    entries: HashMap<EntryId, CacheEntry>,
    by_url: HashMap<String, EntryId>,
    by_key: HashMap<String, EntryId>,
    by_tag: HashMap<ConsumerTag, EntryId>,
    waiting_for_quality_thumb: HashMap<String, ThumbWaitInfo>,
    waiting_by_tag: HashMap<ConsumerTag, String>,
    thumb_generate_tasks: HashMap<String, GenerateTask>,
}

impl LoaderState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub(crate) fn stats(&self) -> LoadingStats {
        LoadingStats {
            entries: self.entries.len(),
            by_url: self.by_url.len(),
            by_key: self.by_key.len(),
            by_tag: self.by_tag.len(),
            waiting_for_quality_thumb: self.waiting_for_quality_thumb.len(),
            generating_thumbs: self.thumb_generate_tasks.len(),
        }
    }

    pub(crate) fn create_load_operation(&mut self, ctx: &Arc<LoaderContext>, op: LoadOperation) {
        let tag = ConsumerTag::new(op.consumer.consumer_id(), op.slot);

        if !op.thumb_already_set {
            let by_url = self.by_url.get(&op.target.url).copied();
            let by_key = self.by_key.get(&op.target.key).copied();

            if let Some(current) = self.by_tag.get(&tag).copied() {
                if Some(current) == by_url || Some(current) == by_key {
                    return;
                }
                self.detach(tag);
            }
            if let Some(existing) = by_key.or(by_url) {
                self.attach(existing, op.consumer);
                return;
            }
        }

        let target = op.target;
        let mut only_cache = false;
        let mut cache_file: Option<PathBuf> = None;

        if let Some(http_url) = &target.http_url {
            match SourceUrl::classify(http_url) {
                SourceUrl::Http(_) => {}
                SourceUrl::MediaThumb { path, .. }
                | SourceUrl::VideoThumb { path, .. }
                | SourceUrl::LocalPath(path) => {
                    only_cache = true;
                    cache_file = Some(PathBuf::from(path));
                }
            }
        } else if op.slot == Slot::Thumb {
            if op.needs_quality_thumb {
                let quality = ctx.dirs.quality_thumb_for_name(&target.url);
                if quality.exists() {
                    cache_file = Some(quality);
                }
            }
            if let (Some(media), Some(ImageLocation::File(location))) = (&op.media, &target.location) {
                if op.needs_quality_thumb && cache_file.is_none() {
                    self.wait_for_quality_thumb(tag, media, location, target.filter.clone());
                }
                let original = media.resolve_path();
                if op.should_generate_quality_thumb && original.exists() {
                    self.generate_thumb(
                        ctx,
                        media.media_type,
                        original,
                        location.clone(),
                        target.filter.clone(),
                    );
                }
            }
        }

        if op.thumb_already_set {
            return;
        }

        let is_gif_document =
            matches!(&target.location, Some(ImageLocation::Document(document)) if document.is_gif);
        let encrypted =
            matches!(&target.location, Some(ImageLocation::File(location)) if location.has_key);

        let external_file = cache_file.is_none() && target.local_path.is_some();
        let cache_file = cache_file.or_else(|| target.local_path.clone());
        let cache_file = cache_file.unwrap_or_else(|| {
            let dir = if target.cache_only || target.size == 0 || target.http_url.is_some() || encrypted {
                MediaDir::Cache
            } else if matches!(target.location, Some(ImageLocation::Document(_))) {
                MediaDir::Document
            } else {
                MediaDir::Image
            };
            ctx.dirs.path(dir, &target.url)
        });

        let mut entry = CacheEntry::new(target.key.clone(), op.slot);
        entry.filter = target.filter.clone();
        entry.animated = is_gif_document || target.http_url.as_deref().is_some_and(is_animated_url);
        entry.http_url = target.http_url.clone();
        entry.external_file = external_file;

        let id = self.allocate_id();
        let ready = only_cache || cache_file.exists();
        if ready {
            entry.final_path = Some(cache_file);
            self.by_key.insert(target.key.clone(), id);
        } else {
            entry.url = Some(target.url.clone());
            self.by_url.insert(target.url.clone(), id);
            log::debug!("{} is waiting for {}", target.key, target.url);
        }
        self.entries.insert(id, entry);
        self.attach(id, op.consumer);

        if ready {
            self.schedule_decode(ctx, id);
        }
    }

    fn attach(&mut self, id: EntryId, consumer: Arc<dyn ImageConsumer>) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        let tag = ConsumerTag::new(consumer.consumer_id(), entry.slot);
        entry.add_consumer(consumer);
        self.by_tag.insert(tag, id);
    }

    /// Detach the consumer slot behind `tag`, destroying its entry if that
    /// was the last consumer.
    pub(crate) fn detach(&mut self, tag: ConsumerTag) {
        let Some(id) = self.by_tag.remove(&tag) else {
            return;
        };
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        entry.remove_consumer(tag.consumer);
        if entry.is_empty() {
            self.destroy(id);
        }
    }

    fn destroy(&mut self, id: EntryId) {
        if let Some(mut entry) = self.entries.remove(&id) {
            entry.cancel_task();
            self.unindex(id, &entry);
            log::trace!("dropped load of {}", entry.key);
        }
    }

    fn unindex(&mut self, id: EntryId, entry: &CacheEntry) {
        if let Some(url) = &entry.url {
            if self.by_url.get(url) == Some(&id) {
                self.by_url.remove(url);
            }
        }
        if self.by_key.get(&entry.key) == Some(&id) {
            self.by_key.remove(&entry.key);
        }
        for consumer in entry.consumer_ids() {
            let tag = ConsumerTag::new(consumer, entry.slot);
            if self.by_tag.get(&tag) == Some(&id) {
                self.by_tag.remove(&tag);
            }
        }
    }

    pub(crate) fn cancel_for(&mut self, consumer: ConsumerId, selection: SlotSelection) {
        for &slot in selection.slots() {
            let tag = ConsumerTag::new(consumer, slot);
            if slot == Slot::Thumb {
                self.remove_from_waiting(tag);
            }
            self.detach(tag);
        }
    }

    fn schedule_decode(&mut self, ctx: &Arc<LoaderContext>, id: EntryId) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        let Some(final_path) = entry.final_path.clone() else {
            return;
        };

        let token = CancellationToken::new();
        entry.task = Some(token.clone());
        let job = DecodeJob {
            entry_id: id,
            key: entry.key.clone(),
            final_path,
            filter: entry.filter.clone(),
            http_url: entry.http_url.clone(),
            external_file: entry.external_file,
            slot: entry.slot,
            animated: entry.animated,
        };

        let queue = match entry.slot {
            Slot::Full => &ctx.cache_out,
            Slot::Thumb => &ctx.thumb_out,
        };
        let task = DecodeTask::new(ctx.clone(), job, token);
        queue.post(move || task.run());
    }

    /// Publish the outcome of a finished decode to every attached consumer
    pub(crate) fn complete(&mut self, ctx: &Arc<LoaderContext>, id: EntryId, image: Option<Drawable>) {
        let Some(mut entry) = self.entries.remove(&id) else {
            if let Some(Drawable::Animated(file)) = image {
                file.recycle();
            }
            return;
        };
        self.unindex(id, &entry);
        entry.task = None;

        let consumers = entry.take_consumers();
        let key = entry.key;
        let slot = entry.slot;
        ctx.on_ui(move || deliver(&consumers, &key, slot, image));
    }

    /// A download finished: decode every entry waiting on `name`
    pub(crate) fn file_did_load(&mut self, ctx: &Arc<LoaderContext>, name: &str, path: PathBuf) {
        if let Some(info) = self.waiting_for_quality_thumb.remove(name) {
            self.waiting_by_tag.retain(|_, waiting| waiting != name);
            self.generate_thumb(ctx, info.media_type, path.clone(), info.location, info.filter);
        }

        let Some(id) = self.by_url.remove(name) else {
            return;
        };
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        entry.url = None;
        entry.final_path = Some(path);
        entry.external_file = false;

        match self.by_key.get(&entry.key).copied() {
            Some(existing) => {
                // Another entry already decodes this key; merge into it
                let consumers = entry.take_consumers();
                self.entries.remove(&id);
                for consumer in consumers {
                    self.attach(existing, consumer);
                }
            }
            None => {
                self.by_key.insert(entry.key.clone(), id);
                self.schedule_decode(ctx, id);
            }
        }
    }

    /// A download failed: the entry waiting on `name` ends without a raster
    pub(crate) fn file_did_fail_load(&mut self, ctx: &Arc<LoaderContext>, name: &str) {
        if let Some(id) = self.by_url.remove(name) {
            log::debug!("download of {} failed", name);
            self.complete(ctx, id, None);
        }
    }

    fn wait_for_quality_thumb(
        &mut self,
        tag: ConsumerTag,
        media: &MediaAttachment,
        location: &FileLocation,
        filter: Option<String>,
    ) {
        self.remove_from_waiting(tag);
        let info = self
            .waiting_for_quality_thumb
            .entry(media.file_name.clone())
            .or_insert_with(|| ThumbWaitInfo {
                count: 0,
                location: location.clone(),
                filter,
                media_type: media.media_type,
            });
        info.count += 1;
        self.waiting_by_tag.insert(tag, media.file_name.clone());
    }

    fn remove_from_waiting(&mut self, tag: ConsumerTag) {
        let Some(name) = self.waiting_by_tag.remove(&tag) else {
            return;
        };
        if let Entry::Occupied(mut waiting) = self.waiting_for_quality_thumb.entry(name) {
            let info = waiting.get_mut();
            info.count = info.count.saturating_sub(1);
            if info.count == 0 {
                let info = waiting.remove();
                // Nobody waits for this thumbnail any more
                if let Some(task) = self.thumb_generate_tasks.remove(&info.location.attach_file_name()) {
                    task.token.cancel();
                }
            }
        }
    }

    /// Schedule quality-thumbnail generation unless one is already running
    /// for the same location.
    pub(crate) fn generate_thumb(
        &mut self,
        ctx: &Arc<LoaderContext>,
        media_type: MediaType,
        original: PathBuf,
        location: FileLocation,
        filter: Option<String>,
    ) {
        let name = location.attach_file_name();
        if self.thumb_generate_tasks.contains_key(&name) {
            return;
        }

        let generation = self.allocate_id();
        let token = CancellationToken::new();
        self.thumb_generate_tasks.insert(
            name,
            GenerateTask {
                generation,
                token: token.clone(),
            },
        );

        let task = ThumbGenerateTask::new(ctx.clone(), media_type, original, location, filter, token, generation);
        ctx.thumb_generating.post(move || task.run());
    }

    pub(crate) fn thumb_task_finished(&mut self, name: &str, generation: u64) {
        if let Entry::Occupied(task) = self.thumb_generate_tasks.entry(name.to_string()) {
            if task.get().generation == generation {
                task.remove();
            }
        }
    }
}

/// Hand a finished load to its consumers. Runs on the presentation thread.
fn deliver(consumers: &[Arc<dyn ImageConsumer>], key: &str, slot: Slot, image: Option<Drawable>) {
    match image {
        Some(Drawable::Animated(file)) => {
            let mut accepted = false;
            for (i, consumer) in consumers.iter().enumerate() {
                let handle = if i == 0 { file.clone() } else { file.make_copy() };
                if consumer.set_image_by_key(&Drawable::Animated(handle), key, slot, false) {
                    accepted = true;
                }
            }
            if !accepted {
                file.recycle();
            }
        }
        Some(image) => {
            for consumer in consumers {
                consumer.set_image_by_key(&image, key, slot, false);
            }
        }
        None => {
            for consumer in consumers {
                consumer.image_load_failed(key, slot);
            }
        }
    }
}
