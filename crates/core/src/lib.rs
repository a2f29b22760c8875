//! Image Loader Core Library
//!
//! Request coordination, decoding and thumbnail generation on top of the
//! bitmap cache and the serial work queues.
//!
//! A consumer asks for an image through [`ImageLoader::load_image_for`].
//! The loader serves it from the bitmap cache when it can, otherwise attaches
//! the consumer to an in-flight load for the same key or starts a new one.
//! Finished rasters are published to the cache and handed to every attached
//! consumer on the presentation thread.

mod bitmaps;
pub mod codec;
mod context;
mod coordinator;
mod decode_task;
pub mod drawable;
mod entry;
pub mod error;
pub mod key;
pub mod loader;
pub mod media;
pub mod notify;
pub mod request;
mod thumb_task;
pub mod ui;

pub use bitmaps::{PhotoSize, ScaleRequest, SizeClass, LOCAL_VOLUME_ID};
pub use codec::{DecodeOptions, ImageCodec, RasterCodec};
pub use coordinator::LoadingStats;
pub use drawable::{AnimatedFile, Drawable};
pub use error::DecodeError;
pub use key::{http_url_extension, BlurLevel, Filter, SourceUrl};
pub use loader::ImageLoader;
pub use media::{MediaProvider, NoMediaProvider};
pub use notify::{Notification, NotificationCenter, SubscriptionId};
pub use request::{
    ConsumerId, ConsumerTag, DocumentRef, FileLocation, ImageConsumer, ImageLocation,
    ImageRequest, MediaAttachment, MediaType, Slot, SlotSelection,
};
pub use ui::{UiDispatcher, UiTask};

pub use imgloader_cache::{Bitmap, BitmapCache, CacheConfig, ColorDepth, MediaDir, MediaDirs};
