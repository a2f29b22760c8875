//! Decoding one entry's file into a raster
//!
//! A task runs on the full-image or thumbnail decode queue. It checks its
//! cancellation token before every step that cannot be undone, hands the
//! result to the presentation thread for publication, and from there the
//! coordination queue detaches and notifies the consumers.

use crate::codec;
use crate::context::LoaderContext;
use crate::drawable::{AnimatedFile, Drawable};
use crate::entry::EntryId;
use crate::error::DecodeError;
use crate::key::{Filter, SourceUrl};
use crate::request::Slot;
use image::DynamicImage;
use imgloader_cache::{Bitmap, ColorDepth};
use imgloader_scheduler::CancellationToken;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Full-path rasters smaller than this in both dimensions get blurred
const SMALL_BLUR_LIMIT: u32 = 100;
/// Width overshoot that triggers an exact-fit rescale
const RESCALE_MARGIN: f32 = 20.0;

/// Snapshot of the entry a task decodes for
#[derive(Debug, Clone)]
pub(crate) struct DecodeJob {
    pub(crate) entry_id: EntryId,
    pub(crate) key: String,
    pub(crate) final_path: PathBuf,
    pub(crate) filter: Option<String>,
    pub(crate) http_url: Option<String>,
    pub(crate) external_file: bool,
    pub(crate) slot: Slot,
    pub(crate) animated: bool,
}

enum Outcome {
    Cancelled,
    Done(Option<Drawable>),
}

pub(crate) struct DecodeTask {
    ctx: Arc<LoaderContext>,
    job: DecodeJob,
    token: CancellationToken,
}

impl DecodeTask {
    pub(crate) fn new(ctx: Arc<LoaderContext>, job: DecodeJob, token: CancellationToken) -> Self {
        Self { ctx, job, token }
    }

    pub(crate) fn run(self) {
        let outcome = match self.token.enter() {
            Some(_running) => self.produce(),
            None => Outcome::Cancelled,
        };
        match outcome {
            Outcome::Cancelled => log::trace!("decode of {} cancelled", self.job.key),
            Outcome::Done(image) => self.publish(image),
        }
    }

    fn produce(&self) -> Outcome {
        if self.job.animated {
            if self.token.is_cancelled() {
                return Outcome::Cancelled;
            }
            let first_frame_only = self.job.filter.as_deref() == Some("d");
            let file = AnimatedFile::new(self.job.final_path.clone(), first_frame_only);
            return Outcome::Done(Some(Drawable::Animated(file)));
        }

        match self.job.slot {
            Slot::Thumb => self.decode_thumb(),
            Slot::Full => self.decode_full(),
        }
    }

    fn decode_thumb(&self) -> Outcome {
        let ctx = &self.ctx;
        let path = &self.job.final_path;
        let blur = self
            .job
            .filter
            .as_deref()
            .and_then(|filter| Filter::parse(filter, ctx.config.density).blur);

        ctx.mark_decode_start();
        if self.token.is_cancelled() {
            return Outcome::Cancelled;
        }

        let options = ctx.decode_options(1, ColorDepth::Argb8888);
        let decoded = fs::read(path)
            .map_err(DecodeError::from)
            .and_then(|bytes| ctx.decode_with_retry(&bytes, &options));

        let mut image = match decoded {
            Ok(image) => image,
            Err(e) => {
                log::debug!("thumbnail {} failed to decode: {}", self.job.key, e);
                if !self.job.external_file && (self.job.filter.is_none() || file_len(path) == 0) {
                    discard_file(path);
                }
                return Outcome::Done(None);
            }
        };

        let blurred = match blur {
            Some(level) => {
                let (radius, passes) = level.passes();
                codec::blur(&mut image, radius, passes)
            }
            None => false,
        };
        Outcome::Done(Some(Drawable::Static(self.finish_bitmap(image, blurred))))
    }

    fn decode_full(&self) -> Outcome {
        let ctx = &self.ctx;
        let path = &self.job.final_path;
        let source = self.job.http_url.as_deref().map(SourceUrl::classify);
        let media_id = source.and_then(|s| s.media_id());
        let can_delete = !self.job.external_file && source.map_or(true, |s| s.can_delete());

        if media_id.is_none() {
            if let Some(delay) = ctx.throttle_delay() {
                if !self.token.sleep(delay) {
                    return Outcome::Cancelled;
                }
            }
        }
        ctx.mark_decode_start();
        if self.token.is_cancelled() {
            return Outcome::Cancelled;
        }

        let filter = self
            .job
            .filter
            .as_deref()
            .map(|filter| Filter::parse(filter, ctx.config.density));

        let decoded = self.read_source(path, media_id).and_then(|bytes| {
            let mut sample_size = 1;
            if let Some((width, height)) = filter.and_then(|f| f.size) {
                if width > 0.0 && height > 0.0 {
                    let (source_w, source_h) = ctx.codec.dimensions(&bytes)?;
                    let scale = (source_w as f32 / width).max(source_h as f32 / height);
                    sample_size = scale.max(1.0) as u32;
                }
            }
            if self.token.is_cancelled() {
                return Err(DecodeError::Cancelled);
            }

            let alpha = match filter {
                None => true,
                Some(f) => f.blur.is_some() || self.job.http_url.is_some(),
            };
            let depth = if alpha {
                ColorDepth::Argb8888
            } else {
                ColorDepth::Opaque
            };
            ctx.decode_with_retry(&bytes, &ctx.decode_options(sample_size, depth))
        });

        let mut image = match decoded {
            Ok(image) => image,
            Err(DecodeError::Cancelled) => return Outcome::Cancelled,
            Err(e) => {
                log::debug!("{} failed to decode: {}", self.job.key, e);
                if can_delete && (file_len(path) == 0 || self.job.filter.is_none()) {
                    discard_file(path);
                }
                return Outcome::Done(None);
            }
        };

        let mut blurred = false;
        if let Some(filter) = filter {
            let (width, height) = (image.width(), image.height());
            if let Some((target_w, _)) = filter.size {
                let overshoot = width as f32 > target_w + RESCALE_MARGIN;
                if !ctx.config.legacy_purgeable && target_w > 0.0 && overshoot {
                    let scale = width as f32 / target_w;
                    image = codec::scale_exact(&image, target_w as u32, (height as f32 / scale) as u32);
                }
            }
            if filter.blur.is_some() && width < SMALL_BLUR_LIMIT && height < SMALL_BLUR_LIMIT {
                codec::blur(&mut image, 3, 1);
                blurred = true;
            }
        }
        Outcome::Done(Some(Drawable::Static(self.finish_bitmap(image, blurred))))
    }

    fn read_source(&self, path: &Path, media_id: Option<(i64, bool)>) -> Result<Vec<u8>, DecodeError> {
        match media_id {
            Some((id, is_video)) => self
                .ctx
                .media
                .media_thumbnail(id, is_video)
                .ok_or_else(|| DecodeError::Unsupported(format!("no media store thumbnail for {}", id))),
            None => Ok(fs::read(path)?),
        }
    }

    fn finish_bitmap(&self, image: DynamicImage, blurred: bool) -> Bitmap {
        let bitmap = Bitmap::new(image);
        if !blurred && self.ctx.config.legacy_purgeable {
            bitmap.pin();
        }
        bitmap
    }

    /// Publish on the presentation thread, then complete the entry on the
    /// coordination queue.
    fn publish(self, image: Option<Drawable>) {
        let DecodeTask { ctx, job, token } = self;
        let task_ctx = ctx.clone();

        ctx.on_ui(move || {
            if token.is_cancelled() {
                match &image {
                    Some(Drawable::Static(bitmap)) => {
                        bitmap.recycle();
                    }
                    Some(Drawable::Animated(file)) => file.recycle(),
                    None => {}
                }
                return;
            }

            let image = match image {
                Some(Drawable::Static(bitmap)) => match task_ctx.cache.get(&job.key) {
                    Some(cached) => {
                        bitmap.recycle();
                        Some(Drawable::Static(cached))
                    }
                    None => {
                        task_ctx.cache.put(&job.key, bitmap.clone());
                        Some(Drawable::Static(bitmap))
                    }
                },
                other => other,
            };

            let complete_ctx = task_ctx.clone();
            let entry_id = job.entry_id;
            task_ctx
                .coordinator
                .post(move |state| state.complete(&complete_ctx, entry_id, image));
        });
    }
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Delete a cache file that could not be decoded
fn discard_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => log::debug!("deleted undecodable cache file {}", path.display()),
        Err(e) => log::debug!("could not delete {}: {}", path.display(), e),
    }
}
