//! Quality thumbnail generation
//!
//! Derives a small preview from a media file, writes it next to the other
//! cache files as `q_<volume>_<local>.jpg`, publishes the raster and posts
//! [`Notification::ThumbGenerated`].

use crate::codec;
use crate::context::LoaderContext;
use crate::key::with_filter;
use crate::notify::Notification;
use crate::request::{FileLocation, MediaType};
use imgloader_cache::Bitmap;
use imgloader_scheduler::CancellationToken;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const THUMB_JPEG_QUALITY: u8 = 60;
const DOCUMENT_IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "gif"];

pub(crate) struct ThumbGenerateTask {
    ctx: Arc<LoaderContext>,
    media_type: MediaType,
    original: PathBuf,
    location: FileLocation,
    filter: Option<String>,
    token: CancellationToken,
    generation: u64,
}

impl ThumbGenerateTask {
    pub(crate) fn new(
        ctx: Arc<LoaderContext>,
        media_type: MediaType,
        original: PathBuf,
        location: FileLocation,
        filter: Option<String>,
        token: CancellationToken,
        generation: u64,
    ) -> Self {
        Self {
            ctx,
            media_type,
            original,
            location,
            filter,
            token,
            generation,
        }
    }

    pub(crate) fn run(self) {
        let generated = match self.token.enter() {
            Some(_running) => self.generate(),
            None => None,
        };

        if let Some((key, bitmap)) = generated {
            let ctx = self.ctx.clone();
            self.ctx.on_ui(move || {
                ctx.cache.put(&key, bitmap.clone());
                ctx.notifications.post(&Notification::ThumbGenerated { key, bitmap });
            });
        }

        let name = self.location.attach_file_name();
        let generation = self.generation;
        self.ctx
            .coordinator
            .post(move |state| state.thumb_task_finished(&name, generation));
    }

    fn generate(&self) -> Option<(String, Bitmap)> {
        let ctx = &self.ctx;
        let key = self.location.key();
        let thumb_file = ctx
            .dirs
            .quality_thumb_path(self.location.volume_id, self.location.local_id);
        if thumb_file.exists() || !self.original.exists() {
            return None;
        }

        let size = ctx.quality_thumb_size() as f32;
        let source = match self.media_type {
            MediaType::Image => ctx.load_bitmap(&self.original, size, size, false),
            MediaType::Video => ctx.media.video_frame(&self.original).map(Bitmap::new),
            MediaType::Document => {
                if !is_image_document(&self.original) {
                    return None;
                }
                ctx.load_bitmap(&self.original, size, size, false)
            }
        }?;

        let (width, height) = (source.width() as f32, source.height() as f32);
        if width == 0.0 || height == 0.0 {
            return None;
        }
        let factor = (width / size).min(height / size);
        let image = source.to_image()?;
        let scaled = codec::scale_exact(&image, (width / factor) as u32, (height / factor) as u32);
        source.recycle();

        if self.token.is_cancelled() {
            return None;
        }
        let bytes = match ctx.codec.encode_jpeg(&scaled, THUMB_JPEG_QUALITY) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("cannot encode quality thumbnail {}: {}", key, e);
                return None;
            }
        };
        if let Err(e) = fs::write(&thumb_file, bytes) {
            log::warn!("cannot write {}: {}", thumb_file.display(), e);
            return None;
        }
        log::debug!("generated quality thumbnail {}", thumb_file.display());

        Some((with_filter(&key, self.filter.as_deref()), Bitmap::new(scaled)))
    }
}

fn is_image_document(path: &Path) -> bool {
    let name = path.to_string_lossy().to_lowercase();
    DOCUMENT_IMAGE_EXTENSIONS
        .iter()
        .any(|ext| name.ends_with(&format!(".{}", ext)))
}
