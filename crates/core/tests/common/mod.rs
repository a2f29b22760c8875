#![allow(dead_code)]

use crossbeam_channel::{Receiver, Sender};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imgloader_core::{
    Bitmap, CacheConfig, ConsumerId, DecodeError, DecodeOptions, Drawable, ImageCodec, ImageConsumer,
    ImageLoader, ImageRequest, NoMediaProvider, RasterCodec, Slot,
};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn config(root: &Path) -> CacheConfig {
    CacheConfig::default()
        .with_cache_dir(root.join("cache"))
        .with_memory_mb(8)
}

pub fn write_png(path: &Path, width: u32, height: u32) {
    let image = RgbImage::from_pixel(width, height, Rgb([120, 80, 200]));
    image
        .save_with_format(path, ImageFormat::Png)
        .expect("fixture png should be written");
}

/// White left half, black right half
pub fn write_split_png(path: &Path, width: u32, height: u32) {
    let image = RgbImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgb([255, 255, 255])
        } else {
            Rgb([0, 0, 0])
        }
    });
    image
        .save_with_format(path, ImageFormat::Png)
        .expect("fixture png should be written");
}

/// Red channel of the pixel at `x`, `y`
pub fn red_at(bitmap: &Bitmap, x: u32, y: u32) -> u8 {
    let image = bitmap.to_image().expect("raster should not be recycled");
    image.to_rgba8().get_pixel(x, y).0[0]
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub key: String,
    pub slot: Slot,
    pub from_memory: bool,
    pub image: Drawable,
}

/// Consumer that records everything the loader hands it
pub struct RecordingConsumer {
    id: ConsumerId,
    request: Mutex<ImageRequest>,
    delivered: Mutex<Vec<Delivery>>,
    failed: Mutex<Vec<(String, Slot)>>,
}

impl RecordingConsumer {
    pub fn new(request: ImageRequest) -> Arc<Self> {
        Arc::new(Self {
            id: ConsumerId::next(),
            request: Mutex::new(request),
            delivered: Mutex::new(Vec::new()),
            failed: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> ConsumerId {
        self.id
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.delivered.lock().clone()
    }

    pub fn failures(&self) -> Vec<(String, Slot)> {
        self.failed.lock().clone()
    }
}

impl ImageConsumer for RecordingConsumer {
    fn consumer_id(&self) -> ConsumerId {
        self.id
    }

    fn request(&self) -> ImageRequest {
        self.request.lock().clone()
    }

    fn set_image_by_key(&self, image: &Drawable, key: &str, slot: Slot, from_memory: bool) -> bool {
        self.delivered.lock().push(Delivery {
            key: key.to_string(),
            slot,
            from_memory,
            image: image.clone(),
        });
        true
    }

    fn image_load_failed(&self, key: &str, slot: Slot) {
        self.failed.lock().push((key.to_string(), slot));
    }
}

/// Codec whose decodes block until the test releases them
pub struct GatedCodec {
    inner: ImageCodec,
    gate: Receiver<()>,
    decodes: AtomicUsize,
}

impl GatedCodec {
    /// Returns the codec and the sender that opens the gate when dropped
    pub fn new() -> (Arc<Self>, Sender<()>) {
        let (release, gate) = crossbeam_channel::unbounded();
        let codec = Arc::new(Self {
            inner: ImageCodec::new(),
            gate,
            decodes: AtomicUsize::new(0),
        });
        (codec, release)
    }

    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }
}

impl RasterCodec for GatedCodec {
    fn dimensions(&self, bytes: &[u8]) -> Result<(u32, u32), DecodeError> {
        self.inner.dimensions(bytes)
    }

    fn decode(&self, bytes: &[u8], options: &DecodeOptions) -> Result<DynamicImage, DecodeError> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        let _ = self.gate.recv_timeout(TIMEOUT);
        self.inner.decode(bytes, options)
    }

    fn encode_jpeg(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>, DecodeError> {
        self.inner.encode_jpeg(image, quality)
    }
}

pub fn gated_loader(root: &Path) -> (ImageLoader, Arc<GatedCodec>, Sender<()>) {
    let (codec, release) = GatedCodec::new();
    let loader = ImageLoader::new(config(root), codec.clone(), Arc::new(NoMediaProvider), None);
    (loader, codec, release)
}

/// Codec that runs out of memory a fixed number of times before working
pub struct FlakyCodec {
    inner: ImageCodec,
    decode_failures: AtomicUsize,
    encode_failures: AtomicUsize,
    decodes: AtomicUsize,
    encodes: AtomicUsize,
}

impl FlakyCodec {
    pub fn new(decode_failures: usize, encode_failures: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: ImageCodec::new(),
            decode_failures: AtomicUsize::new(decode_failures),
            encode_failures: AtomicUsize::new(encode_failures),
            decodes: AtomicUsize::new(0),
            encodes: AtomicUsize::new(0),
        })
    }

    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }

    pub fn encodes(&self) -> usize {
        self.encodes.load(Ordering::SeqCst)
    }
}

fn take_failure(remaining: &AtomicUsize) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl RasterCodec for FlakyCodec {
    fn dimensions(&self, bytes: &[u8]) -> Result<(u32, u32), DecodeError> {
        self.inner.dimensions(bytes)
    }

    fn decode(&self, bytes: &[u8], options: &DecodeOptions) -> Result<DynamicImage, DecodeError> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.decode_failures) {
            return Err(DecodeError::OutOfMemory);
        }
        self.inner.decode(bytes, options)
    }

    fn encode_jpeg(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>, DecodeError> {
        self.encodes.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.encode_failures) {
            return Err(DecodeError::OutOfMemory);
        }
        self.inner.encode_jpeg(image, quality)
    }
}
