//! What a consumer is handed: a static raster or an animated file

use crate::error::DecodeError;
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, RgbaImage};
use imgloader_cache::Bitmap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A loaded image
#[derive(Debug, Clone)]
pub enum Drawable {
    Static(Bitmap),
    Animated(AnimatedFile),
}

impl Drawable {
    pub fn as_bitmap(&self) -> Option<&Bitmap> {
        match self {
            Drawable::Static(bitmap) => Some(bitmap),
            Drawable::Animated(_) => None,
        }
    }

    pub fn as_animated(&self) -> Option<&AnimatedFile> {
        match self {
            Drawable::Animated(file) => Some(file),
            Drawable::Static(_) => None,
        }
    }
}

#[derive(Debug)]
struct AnimatedInner {
    path: PathBuf,
    first_frame_only: bool,
    recycled: AtomicBool,
}

/// Streaming decoder handle over an animated file.
///
/// Frames are decoded on demand, never up front. Clones share one handle;
/// [`make_copy`](Self::make_copy) opens an independent one over the same file.
#[derive(Debug, Clone)]
pub struct AnimatedFile {
    inner: Arc<AnimatedInner>,
}

impl AnimatedFile {
    pub fn new(path: impl Into<PathBuf>, first_frame_only: bool) -> Self {
        Self {
            inner: Arc::new(AnimatedInner {
                path: path.into(),
                first_frame_only,
                recycled: AtomicBool::new(false),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn first_frame_only(&self) -> bool {
        self.inner.first_frame_only
    }

    /// Independent handle for another consumer
    pub fn make_copy(&self) -> Self {
        Self::new(self.inner.path.clone(), self.inner.first_frame_only)
    }

    pub fn recycle(&self) {
        self.inner.recycled.store(true, Ordering::Release);
    }

    pub fn is_recycled(&self) -> bool {
        self.inner.recycled.load(Ordering::Acquire)
    }

    pub fn ptr_eq(&self, other: &AnimatedFile) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Decode the frames to show. Only GIF sources can be decoded here.
    pub fn frames(&self) -> Result<Vec<RgbaImage>, DecodeError> {
        if self.is_recycled() {
            return Err(DecodeError::Cancelled);
        }
        let ext = self
            .inner
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        if ext.as_deref() != Some("gif") {
            return Err(DecodeError::Unsupported(format!(
                "animated source {}",
                self.inner.path.display()
            )));
        }

        let reader = BufReader::new(File::open(&self.inner.path)?);
        let decoder = GifDecoder::new(reader)?;
        let limit = if self.inner.first_frame_only { 1 } else { usize::MAX };

        let mut frames = Vec::new();
        for frame in decoder.into_frames().take(limit) {
            frames.push(frame?.into_buffer());
        }
        if frames.is_empty() {
            return Err(DecodeError::Empty);
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Frame, Rgba};

    fn write_gif(path: &Path, frames: usize) {
        let file = File::create(path).unwrap();
        let mut encoder = GifEncoder::new(file);
        for i in 0..frames {
            let buffer = RgbaImage::from_pixel(4, 4, Rgba([i as u8 * 40, 0, 0, 255]));
            encoder
                .encode_frame(Frame::from_parts(buffer, 0, 0, Delay::from_numer_denom_ms(10, 1)))
                .unwrap();
        }
    }

    #[test]
    fn test_first_frame_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anim.gif");
        write_gif(&path, 3);

        assert_eq!(AnimatedFile::new(&path, false).frames().unwrap().len(), 3);
        assert_eq!(AnimatedFile::new(&path, true).frames().unwrap().len(), 1);
    }

    #[test]
    fn test_copies_are_independent() {
        let file = AnimatedFile::new("/tmp/a.gif", false);
        let shared = file.clone();
        let copy = file.make_copy();

        file.recycle();
        assert!(shared.is_recycled());
        assert!(!copy.is_recycled());
        assert!(file.ptr_eq(&shared));
        assert!(!file.ptr_eq(&copy));
    }

    #[test]
    fn test_mp4_is_unsupported() {
        let file = AnimatedFile::new("/tmp/clip.mp4", false);
        assert!(matches!(file.frames(), Err(DecodeError::Unsupported(_))));
    }
}
