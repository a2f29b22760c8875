//! Platform media sources

use image::DynamicImage;
use std::path::Path;

/// Thumbnails and video frames provided by the platform media store.
///
/// Files behind these sources are owned by the media store, so the loader
/// never deletes them.
pub trait MediaProvider: Send + Sync {
    /// Encoded thumbnail for a media-store item
    fn media_thumbnail(&self, media_id: i64, is_video: bool) -> Option<Vec<u8>>;

    /// A representative frame of the video at `path`
    fn video_frame(&self, path: &Path) -> Option<DynamicImage>;
}

/// Provider for hosts without a media store
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMediaProvider;

impl MediaProvider for NoMediaProvider {
    fn media_thumbnail(&self, _media_id: i64, _is_video: bool) -> Option<Vec<u8>> {
        None
    }

    fn video_frame(&self, _path: &Path) -> Option<DynamicImage> {
        None
    }
}
