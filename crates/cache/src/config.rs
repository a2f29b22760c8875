//! Loader configuration: cache capacity, cache location and device traits.
//!
//! Configuration starts from defaults, can be loaded from a JSON file and is
//! finally overridden by environment variables.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::memory;

pub const ENV_CACHE_MB: &str = "IMGLOADER_CACHE_MB";
pub const ENV_CACHE_DIR: &str = "IMGLOADER_CACHE_DIR";
pub const ENV_DENSITY: &str = "IMGLOADER_DENSITY";
pub const ENV_LEGACY_PURGEABLE: &str = "IMGLOADER_LEGACY_PURGEABLE";

/// Configuration for the image loader and its bitmap cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Bitmap cache capacity in bytes
    pub memory_cache_size: usize,
    /// Root of the on-disk cache; media subdirectories live below it
    pub cache_dir: PathBuf,
    /// Display width in pixels, used to size generated thumbnails
    pub display_width: u32,
    /// Display height in pixels
    pub display_height: u32,
    /// Scale applied to the `W_H` dimensions of a filter
    pub density: f32,
    /// Emulate reclaimable-memory platforms: pin decoded buffers and throttle
    /// back-to-back decodes
    pub legacy_purgeable: bool,
    /// Maximum bytes a single decode may allocate
    pub decode_alloc_limit: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_cache_size: memory::default_cache_size(),
            cache_dir: Self::default_cache_dir(),
            display_width: 1080,
            display_height: 1920,
            density: 1.0,
            legacy_purgeable: false,
            decode_alloc_limit: Some(512 * 1024 * 1024),
        }
    }
}

impl CacheConfig {
    /// Sets the bitmap cache capacity in megabytes.
    pub fn with_memory_mb(mut self, mb: usize) -> Self {
        self.memory_cache_size = mb * 1024 * 1024;
        self
    }

    pub fn with_cache_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.cache_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn with_display_size(mut self, width: u32, height: u32) -> Self {
        self.display_width = width;
        self.display_height = height;
        self
    }

    pub fn with_density(mut self, density: f32) -> Self {
        self.density = density;
        self
    }

    pub fn with_legacy_purgeable(mut self, enabled: bool) -> Self {
        self.legacy_purgeable = enabled;
        self
    }

    pub fn with_decode_alloc_limit(mut self, limit: Option<u64>) -> Self {
        self.decode_alloc_limit = limit;
        self
    }

    /// Returns the default cache directory for the current platform.
    ///
    /// - macOS: ~/Library/Caches/imgloader
    /// - Linux: ~/.cache/imgloader
    /// - Windows: %LOCALAPPDATA%\imgloader
    pub fn default_cache_dir() -> PathBuf {
        if let Some(cache_dir) = dirs::cache_dir() {
            cache_dir.join("imgloader")
        } else {
            PathBuf::from("cache")
        }
    }

    /// Defaults overridden by environment variables.
    ///
    /// - `IMGLOADER_CACHE_MB`: bitmap cache capacity in MB
    /// - `IMGLOADER_CACHE_DIR`: cache root directory
    /// - `IMGLOADER_DENSITY`: filter density multiplier
    /// - `IMGLOADER_LEGACY_PURGEABLE`: `1`/`true` or `0`/`false`
    ///
    /// # Errors
    /// Returns an error if any variable holds an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Load a JSON configuration file, then apply environment overrides.
    ///
    /// Keys missing from the file keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_file(path)?.apply_env()
    }

    /// Load a JSON configuration file without environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let bytes = fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        fs::write(path.as_ref(), bytes)?;
        Ok(())
    }

    fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(val) = std::env::var(ENV_CACHE_MB) {
            let mb = val
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue(ENV_CACHE_MB.to_string()))?;
            self.memory_cache_size = mb * 1024 * 1024;
        }

        if let Ok(val) = std::env::var(ENV_CACHE_DIR) {
            self.cache_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(ENV_DENSITY) {
            self.density = val
                .parse::<f32>()
                .ok()
                .filter(|d| *d > 0.0)
                .ok_or_else(|| ConfigError::InvalidValue(ENV_DENSITY.to_string()))?;
        }

        if let Ok(val) = std::env::var(ENV_LEGACY_PURGEABLE) {
            self.legacy_purgeable = match val.as_str() {
                "1" | "true" => true,
                "0" | "false" => false,
                _ => return Err(ConfigError::InvalidValue(ENV_LEGACY_PURGEABLE.to_string())),
            };
        }

        Ok(self)
    }

    /// Returns the bitmap cache capacity in megabytes.
    pub fn memory_cache_mb(&self) -> usize {
        self.memory_cache_size / (1024 * 1024)
    }
}

/// Errors that can occur while loading or saving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
