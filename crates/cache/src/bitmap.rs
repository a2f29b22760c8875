//! Shared raster handle
//!
//! A `Bitmap` is a cheaply clonable handle to one decoded image. All clones
//! observe the same pixel buffer, so recycling a bitmap frees the pixels for
//! every holder at once.

use image::DynamicImage;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Pixel storage format of a decoded raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorDepth {
    /// 8 bits per channel with alpha. Required for blurring.
    Argb8888,
    /// Opaque, cheaper format without an alpha channel.
    Opaque,
}

impl ColorDepth {
    /// Bytes used per pixel in this format
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            ColorDepth::Argb8888 => 4,
            ColorDepth::Opaque => 3,
        }
    }
}

struct BitmapInner {
    pixels: Mutex<Option<DynamicImage>>,
    width: u32,
    height: u32,
    byte_count: usize,
    depth: ColorDepth,
    pinned: AtomicBool,
}

/// Reference-counted handle to a decoded raster
#[derive(Clone)]
pub struct Bitmap {
    inner: Arc<BitmapInner>,
}

impl Bitmap {
    /// Wrap a decoded image.
    ///
    /// The color depth is derived from the image layout: anything carrying an
    /// alpha channel is `Argb8888`, everything else is `Opaque`.
    pub fn new(image: DynamicImage) -> Self {
        let depth = if image.color().has_alpha() {
            ColorDepth::Argb8888
        } else {
            ColorDepth::Opaque
        };
        Self {
            inner: Arc::new(BitmapInner {
                width: image.width(),
                height: image.height(),
                byte_count: image.as_bytes().len(),
                depth,
                pixels: Mutex::new(Some(image)),
                pinned: AtomicBool::new(false),
            }),
        }
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    /// Size of the pixel buffer in bytes, as counted against cache capacity
    pub fn byte_count(&self) -> usize {
        self.inner.byte_count
    }

    pub fn depth(&self) -> ColorDepth {
        self.inner.depth
    }

    /// Mark the buffer as non-reclaimable until it is recycled explicitly
    pub fn pin(&self) {
        self.inner.pinned.store(true, Ordering::Release);
    }

    pub fn is_pinned(&self) -> bool {
        self.inner.pinned.load(Ordering::Acquire)
    }

    /// Free the pixel buffer.
    ///
    /// Returns `true` if this call released the pixels, `false` if they were
    /// already gone.
    pub fn recycle(&self) -> bool {
        let freed = self.inner.pixels.lock().take().is_some();
        if freed {
            self.inner.pinned.store(false, Ordering::Release);
        }
        freed
    }

    pub fn is_recycled(&self) -> bool {
        self.inner.pixels.lock().is_none()
    }

    /// Run `f` against the pixels, or return `None` if the bitmap was recycled
    pub fn with_image<R>(&self, f: impl FnOnce(&DynamicImage) -> R) -> Option<R> {
        self.inner.pixels.lock().as_ref().map(f)
    }

    /// Mutate the pixels in place. Dimensions must not change.
    pub fn with_image_mut<R>(&self, f: impl FnOnce(&mut DynamicImage) -> R) -> Option<R> {
        self.inner.pixels.lock().as_mut().map(f)
    }

    /// Copy of the pixels, or `None` if the bitmap was recycled
    pub fn to_image(&self) -> Option<DynamicImage> {
        self.with_image(|image| image.clone())
    }

    /// True if both handles point at the same raster
    pub fn ptr_eq(&self, other: &Bitmap) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .field("depth", &self.inner.depth)
            .field("byte_count", &self.inner.byte_count)
            .field("recycled", &self.is_recycled())
            .finish()
    }
}
