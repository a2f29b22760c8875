//! Standalone raster helpers: bounded file decode and scale-then-save

use crate::codec;
use crate::context::LoaderContext;
use crate::error::DecodeError;
use crate::request::FileLocation;
use imgloader_cache::{Bitmap, ColorDepth, MediaDir};
use std::fs;
use std::path::{Path, PathBuf};

/// Volume id given to locally generated photo sizes
pub const LOCAL_VOLUME_ID: i64 = i32::MIN as i64;

/// Size class of a stored photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeClass {
    /// Up to 100 px
    S,
    /// Up to 320 px
    M,
    /// Up to 800 px
    X,
    /// Up to 1280 px
    Y,
    /// Larger
    W,
}

impl SizeClass {
    pub fn for_dimensions(width: u32, height: u32) -> Self {
        let longest = width.max(height);
        match longest {
            0..=100 => SizeClass::S,
            101..=320 => SizeClass::M,
            321..=800 => SizeClass::X,
            801..=1280 => SizeClass::Y,
            _ => SizeClass::W,
        }
    }

    pub fn letter(self) -> char {
        match self {
            SizeClass::S => 's',
            SizeClass::M => 'm',
            SizeClass::X => 'x',
            SizeClass::Y => 'y',
            SizeClass::W => 'w',
        }
    }
}

/// A JPEG written by [`ImageLoader::scale_and_save`](crate::ImageLoader::scale_and_save)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoSize {
    pub location: FileLocation,
    pub width: u32,
    pub height: u32,
    /// Encoded size in bytes
    pub size: usize,
    pub kind: SizeClass,
    /// Encoded bytes, when the caller asked to keep them
    pub bytes: Option<Vec<u8>>,
    pub path: PathBuf,
}

/// Arguments to [`ImageLoader::scale_and_save`](crate::ImageLoader::scale_and_save)
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleRequest {
    pub max_width: f32,
    pub max_height: f32,
    /// JPEG quality, 1 to 100
    pub quality: u8,
    /// Keep the encoded bytes in the returned [`PhotoSize`]
    pub cache_bytes: bool,
    pub min_width: u32,
    pub min_height: u32,
    /// Write here instead of `<cache>/<volume>_<local>.jpg`
    pub cache_file: Option<PathBuf>,
}

impl ScaleRequest {
    pub fn new(max_width: f32, max_height: f32, quality: u8) -> Self {
        Self {
            max_width,
            max_height,
            quality,
            cache_bytes: false,
            min_width: 0,
            min_height: 0,
            cache_file: None,
        }
    }

    pub fn with_min_size(mut self, width: u32, height: u32) -> Self {
        self.min_width = width;
        self.min_height = height;
        self
    }

    pub fn with_cache_bytes(mut self, cache_bytes: bool) -> Self {
        self.cache_bytes = cache_bytes;
        self
    }

    pub fn with_cache_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_file = Some(path.into());
        self
    }

    /// Scale factor and whether a minimum size forces scaling
    fn scale_factor(&self, width: f32, height: f32) -> (f32, bool) {
        let min_w = self.min_width as f32;
        let min_h = self.min_height as f32;
        if self.min_width != 0 && self.min_height != 0 && (width < min_w || height < min_h) {
            let factor = if width < min_w && height > min_h {
                width / min_w
            } else if width > min_w && height < min_h {
                height / min_h
            } else {
                (width / min_w).max(height / min_h)
            };
            return (factor, true);
        }
        ((width / self.max_width).max(height / self.max_height), false)
    }
}

impl LoaderContext {
    /// Decode the file at `path` downsampled to roughly fit `max_width` x
    /// `max_height`, honoring EXIF orientation.
    pub(crate) fn load_bitmap(
        &self,
        path: &Path,
        max_width: f32,
        max_height: f32,
        use_max_scale: bool,
    ) -> Option<Bitmap> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::debug!("cannot read {}: {}", path.display(), e);
                return None;
            }
        };
        let (width, height) = match self.codec.dimensions(&bytes) {
            Ok(dimensions) => dimensions,
            Err(e) => {
                log::debug!("cannot read dimensions of {}: {}", path.display(), e);
                return None;
            }
        };

        let sample_size = if max_width > 0.0 && max_height > 0.0 {
            let scale_w = width as f32 / max_width;
            let scale_h = height as f32 / max_height;
            let factor = if use_max_scale {
                scale_w.max(scale_h)
            } else {
                scale_w.min(scale_h)
            };
            factor.max(1.0) as u32
        } else {
            1
        };

        let mut options = self.decode_options(sample_size, ColorDepth::Argb8888);
        options.apply_orientation = true;
        match self.decode_with_retry(&bytes, &options) {
            Ok(image) => {
                let bitmap = Bitmap::new(image);
                if self.config.legacy_purgeable {
                    bitmap.pin();
                }
                Some(bitmap)
            }
            Err(e) => {
                log::debug!("cannot decode {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Scale `bitmap` into the requested bounds and write it as JPEG
    pub(crate) fn scale_and_save(&self, bitmap: &Bitmap, request: &ScaleRequest) -> Option<PhotoSize> {
        let width = bitmap.width() as f32;
        let height = bitmap.height() as f32;
        if width == 0.0 || height == 0.0 {
            return None;
        }

        let (factor, scale_anyway) = request.scale_factor(width, height);
        let target_w = (width / factor) as u32;
        let target_h = (height / factor) as u32;
        if target_w == 0 || target_h == 0 {
            return None;
        }
        let resize = factor > 1.0 || scale_anyway;

        match self.scale_and_save_internal(bitmap, request, resize, target_w, target_h) {
            Err(err) if err.is_out_of_memory() => {
                log::warn!("scale_and_save ran out of memory, clearing bitmap cache and retrying");
                self.cache.evict_all();
                self.scale_and_save_internal(bitmap, request, resize, target_w, target_h)
                    .map_err(|e| log::debug!("scale_and_save failed after retry: {}", e))
                    .ok()
            }
            Err(err) => {
                log::debug!("scale_and_save failed: {}", err);
                None
            }
            Ok(size) => Some(size),
        }
    }

    fn scale_and_save_internal(
        &self,
        bitmap: &Bitmap,
        request: &ScaleRequest,
        resize: bool,
        width: u32,
        height: u32,
    ) -> Result<PhotoSize, DecodeError> {
        let source = bitmap.to_image().ok_or(DecodeError::Empty)?;
        let scaled = if resize {
            codec::scale_exact(&source, width, height)
        } else {
            source
        };

        let location = FileLocation::new(LOCAL_VOLUME_ID, self.next_local_id());
        let path = match &request.cache_file {
            Some(path) => path.clone(),
            None => self.dirs.path(MediaDir::Cache, &location.attach_file_name()),
        };

        let bytes = self.codec.encode_jpeg(&scaled, request.quality)?;
        fs::write(&path, &bytes)?;

        Ok(PhotoSize {
            location,
            width: scaled.width(),
            height: scaled.height(),
            size: bytes.len(),
            kind: SizeClass::for_dimensions(scaled.width(), scaled.height()),
            bytes: request.cache_bytes.then_some(bytes),
            path,
        })
    }
}
