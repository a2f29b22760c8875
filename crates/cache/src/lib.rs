//! Image Loader Cache Library
//!
//! Bounded in-memory bitmap cache with LRU eviction and use counting, plus
//! the configuration and on-disk layout shared by the loader.

pub mod bitmap;
pub mod config;
pub mod media_dirs;
pub mod memory;
pub mod ram;

pub use bitmap::{Bitmap, ColorDepth};
pub use config::{CacheConfig, ConfigError};
pub use media_dirs::{MediaDir, MediaDirs, NOMEDIA_MARKER};
pub use ram::{BitmapCache, CacheStats};
