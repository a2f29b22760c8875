//! Raster decode and encode
//!
//! The loader never touches image formats directly. It goes through a
//! [`RasterCodec`], which turns bytes into pixels and pixels back into JPEG.
//! [`ImageCodec`] is the default implementation on top of the `image` crate.

use crate::error::DecodeError;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageDecoder, ImageReader, Limits};
use imgloader_cache::ColorDepth;
use std::io::Cursor;

/// How to decode one source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Integer downscale factor, rounded down to a power of two. `1` keeps
    /// the full size.
    pub sample_size: u32,
    pub depth: ColorDepth,
    /// Maximum bytes the decoder may allocate, `None` for no limit
    pub alloc_limit: Option<u64>,
    /// Rotate according to EXIF orientation
    pub apply_orientation: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            sample_size: 1,
            depth: ColorDepth::Argb8888,
            alloc_limit: None,
            apply_orientation: false,
        }
    }
}

/// Opaque decode/encode capability
pub trait RasterCodec: Send + Sync {
    /// Dimensions without decoding pixels
    fn dimensions(&self, bytes: &[u8]) -> Result<(u32, u32), DecodeError>;

    fn decode(&self, bytes: &[u8], options: &DecodeOptions) -> Result<DynamicImage, DecodeError>;

    fn encode_jpeg(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>, DecodeError>;
}

/// [`RasterCodec`] backed by the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCodec;

impl ImageCodec {
    pub fn new() -> Self {
        Self
    }
}

impl RasterCodec for ImageCodec {
    fn dimensions(&self, bytes: &[u8]) -> Result<(u32, u32), DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
        Ok(reader.into_dimensions()?)
    }

    fn decode(&self, bytes: &[u8], options: &DecodeOptions) -> Result<DynamicImage, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
        let mut limits = Limits::default();
        limits.max_alloc = options.alloc_limit;
        reader.limits(limits.clone());

        let mut decoder = reader.into_decoder()?;
        limits.reserve(decoder.total_bytes())?;
        let orientation = if options.apply_orientation {
            decoder.orientation().ok()
        } else {
            None
        };
        let mut image = DynamicImage::from_decoder(decoder)?;

        let sample = power_of_two_floor(options.sample_size);
        if sample > 1 {
            let width = (image.width() / sample).max(1);
            let height = (image.height() / sample).max(1);
            image = image.resize_exact(width, height, FilterType::Nearest);
        }
        if let Some(orientation) = orientation {
            image.apply_orientation(orientation);
        }

        Ok(match options.depth {
            ColorDepth::Argb8888 => match image {
                DynamicImage::ImageRgba8(_) => image,
                other => DynamicImage::ImageRgba8(other.to_rgba8()),
            },
            ColorDepth::Opaque => match image {
                DynamicImage::ImageRgb8(_) => image,
                other => DynamicImage::ImageRgb8(other.to_rgb8()),
            },
        })
    }

    fn encode_jpeg(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>, DecodeError> {
        let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
        let mut out = Vec::new();
        rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))?;
        Ok(out)
    }
}

/// Blur an alpha-capable raster in place. Opaque rasters are left alone.
///
/// Returns `true` if the blur was applied.
pub fn blur(image: &mut DynamicImage, radius: u32, passes: u32) -> bool {
    let DynamicImage::ImageRgba8(buffer) = image else {
        return false;
    };
    let sigma = radius.max(1) as f32;
    for _ in 0..passes {
        *buffer = imageops::blur(&*buffer, sigma);
    }
    true
}

/// Resize to exactly `width` x `height` with bilinear filtering
pub fn scale_exact(image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    image.resize_exact(width.max(1), height.max(1), FilterType::Triangle)
}

/// Largest power of two not above `sample`
fn power_of_two_floor(sample: u32) -> u32 {
    if sample <= 1 {
        return 1;
    }
    1 << (u32::BITS - 1 - sample.leading_zeros())
}
