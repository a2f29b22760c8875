//! Consumers and what they ask for
//!
//! A consumer is a UI element waiting for a raster. It owns one stable
//! [`ConsumerId`] and can wait on two slots at once: the full image and its
//! thumbnail. The loader indexes in-flight work by [`ConsumerTag`]
//! (consumer + slot), so each slot is attached to at most one entry.

use crate::drawable::Drawable;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONSUMER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique consumer identity. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(u64);

impl ConsumerId {
    /// Allocate a fresh id
    pub fn next() -> Self {
        Self(NEXT_CONSUMER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Which image of a consumer a request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Full,
    Thumb,
}

/// Index key for a consumer's attachment in one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerTag {
    pub consumer: ConsumerId,
    pub slot: Slot,
}

impl ConsumerTag {
    pub fn new(consumer: ConsumerId, slot: Slot) -> Self {
        Self { consumer, slot }
    }
}

/// Which slots [`cancel_loading_for`](crate::ImageLoader::cancel_loading_for) detaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotSelection {
    Both,
    FullOnly,
    ThumbOnly,
}

impl SlotSelection {
    pub fn slots(self) -> &'static [Slot] {
        match self {
            SlotSelection::Both => &[Slot::Thumb, Slot::Full],
            SlotSelection::FullOnly => &[Slot::Full],
            SlotSelection::ThumbOnly => &[Slot::Thumb],
        }
    }
}

/// Media type of a stored attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Image,
    Video,
    Document,
}

/// A file stored on a storage volume
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileLocation {
    pub volume_id: i64,
    pub local_id: i32,
    /// Local file that already holds the content, if any
    pub local_path: Option<PathBuf>,
    /// The file is encrypted with a per-file key
    pub has_key: bool,
}

impl FileLocation {
    pub fn new(volume_id: i64, local_id: i32) -> Self {
        Self {
            volume_id,
            local_id,
            local_path: None,
            has_key: false,
        }
    }

    pub fn with_local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    /// `<volume>_<local>`
    pub fn key(&self) -> String {
        format!("{}_{}", self.volume_id, self.local_id)
    }

    /// Cache file name of this location's thumbnail (`<volume>_<local>.jpg`)
    pub fn attach_file_name(&self) -> String {
        format!("{}.jpg", self.key())
    }
}

/// A document attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub dc_id: i32,
    pub id: i64,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub is_gif: bool,
}

/// Where the full image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageLocation {
    File(FileLocation),
    Document(DocumentRef),
    /// Remote URL, or one of the `thumb://` / `vthumb://` indirections, or a
    /// bare local path
    Http(String),
}

/// The media file an image belongs to, used for quality thumbnails
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    pub media_type: MediaType,
    /// Download name of the media file
    pub file_name: String,
    /// Path the sender attached from, if it still exists
    pub attach_path: Option<PathBuf>,
    /// Canonical storage path of the media file
    pub stored_path: PathBuf,
}

impl MediaAttachment {
    /// The attach path when it exists on disk, else the stored path
    pub fn resolve_path(&self) -> PathBuf {
        match &self.attach_path {
            Some(path) if path.exists() => path.clone(),
            _ => self.stored_path.clone(),
        }
    }
}

/// Everything a consumer wants loaded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageRequest {
    pub image: Option<ImageLocation>,
    pub thumb: Option<FileLocation>,
    pub filter: Option<String>,
    pub thumb_filter: Option<String>,
    /// Extension for cache file names; `jpg` when absent
    pub ext: Option<String>,
    /// Expected byte size of the full image, `0` if unknown
    pub size: u32,
    pub cache_only: bool,
    /// Show the thumbnail even when the full image is cached
    pub force_preview: bool,
    pub needs_quality_thumb: bool,
    pub should_generate_quality_thumb: bool,
    pub media: Option<MediaAttachment>,
}

/// A UI element that displays loaded images
pub trait ImageConsumer: Send + Sync {
    fn consumer_id(&self) -> ConsumerId;

    /// What this consumer currently wants to show
    fn request(&self) -> ImageRequest;

    /// Deliver a raster for `key`.
    ///
    /// `from_memory` is true when the raster came straight from the bitmap
    /// cache. Returns `false` if the consumer no longer wants this key.
    fn set_image_by_key(&self, image: &Drawable, key: &str, slot: Slot, from_memory: bool) -> bool;

    /// The load for `key` finished without a raster
    fn image_load_failed(&self, _key: &str, _slot: Slot) {}
}
