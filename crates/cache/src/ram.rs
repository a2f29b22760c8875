//! In-memory bitmap cache with LRU eviction
//!
//! Decoded rasters are kept by string key and evicted least-recently-used
//! first once their combined byte size exceeds the configured capacity.
//! Evicted or removed rasters are recycled unless a caller still holds a use
//! count on the key, or the key is the one currently being renamed.

use crate::bitmap::Bitmap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Number of rasters currently in cache
    pub entry_count: usize,

    /// Total bytes used by cached rasters
    pub memory_used: usize,

    /// Maximum bytes allowed
    pub capacity: usize,

    /// Number of cache hits
    pub hits: u64,

    /// Number of cache misses
    pub misses: u64,

    /// Number of rasters evicted due to capacity pressure
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Calculate memory utilization (0.0 to 1.0)
    pub fn memory_utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.memory_used as f64 / self.capacity as f64
        }
    }
}

/// Internal cache state
struct CacheState {
    /// Map from cache key to raster
    entries: HashMap<String, Bitmap>,

    /// LRU queue (most recently used at back, least recently used at front)
    lru_queue: VecDeque<String>,

    /// Outstanding use counts; a positive count protects a key from eviction
    use_counts: HashMap<String, usize>,

    /// Key whose removal must not recycle its raster (in-flight rename)
    ignore_removal: Option<String>,

    memory_used: usize,
    capacity: usize,
    stats: CacheStats,
}

impl CacheState {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            lru_queue: VecDeque::new(),
            use_counts: HashMap::new(),
            ignore_removal: None,
            memory_used: 0,
            capacity,
            stats: CacheStats {
                capacity,
                ..Default::default()
            },
        }
    }

    /// Move a key to the back of the LRU queue (mark as most recently used)
    fn touch(&mut self, key: &str) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.to_string());
    }

    fn is_protected(&self, key: &str) -> bool {
        if self.ignore_removal.as_deref() == Some(key) {
            return true;
        }
        self.use_counts.get(key).copied().unwrap_or(0) > 0
    }

    /// Detach a key from the map and LRU queue without recycling it
    fn take(&mut self, key: &str) -> Option<Bitmap> {
        let bitmap = self.entries.remove(key)?;
        self.memory_used = self.memory_used.saturating_sub(bitmap.byte_count());
        self.lru_queue.retain(|k| k != key);
        self.sync_stats();
        Some(bitmap)
    }

    /// Release a raster that left the cache.
    ///
    /// `replacement` is the raster now stored under the same key, if any.
    fn entry_removed(&self, key: &str, old: &Bitmap, replacement: Option<&Bitmap>) {
        if self.is_protected(key) {
            return;
        }
        if replacement.is_some_and(|new| new.ptr_eq(old)) {
            return;
        }
        old.recycle();
    }

    /// Evict the least recently used raster that is not protected
    fn evict_lru(&mut self) -> bool {
        let victim = self
            .lru_queue
            .iter()
            .find(|k| !self.is_protected(k))
            .cloned();

        let Some(key) = victim else {
            return false;
        };

        if let Some(bitmap) = self.take(&key) {
            self.entry_removed(&key, &bitmap, None);
            self.stats.evictions += 1;
            log::trace!("evicted {} ({} bytes)", key, bitmap.byte_count());
        }
        true
    }

    /// Evict rasters until `required_size` more bytes fit under capacity
    fn evict_to_fit(&mut self, required_size: usize) {
        while self.memory_used + required_size > self.capacity && !self.entries.is_empty() {
            if !self.evict_lru() {
                log::debug!(
                    "bitmap cache over capacity ({} / {} bytes), remaining entries are in use",
                    self.memory_used + required_size,
                    self.capacity
                );
                break;
            }
        }
    }

    fn sync_stats(&mut self) {
        self.stats.entry_count = self.entries.len();
        self.stats.memory_used = self.memory_used;
    }
}

/// Bitmap cache with LRU eviction bounded by decoded byte size
///
/// Thread-safe; callers never need to lock it externally. Clones share the
/// same underlying cache.
///
/// # Example
///
/// ```
/// use image::{DynamicImage, RgbaImage};
/// use imgloader_cache::{Bitmap, BitmapCache};
///
/// let cache = BitmapCache::new(1024 * 1024);
/// let bitmap = Bitmap::new(DynamicImage::ImageRgba8(RgbaImage::new(64, 64)));
/// cache.put("100_5@80_80", bitmap);
///
/// assert!(cache.get("100_5@80_80").is_some());
/// ```
#[derive(Clone)]
pub struct BitmapCache {
    state: Arc<Mutex<CacheState>>,
}

impl BitmapCache {
    /// Create a new cache holding at most `capacity` bytes of decoded pixels
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::new(capacity))),
        }
    }

    /// Create a new cache with a capacity in megabytes
    pub fn with_mb_limit(megabytes: usize) -> Self {
        Self::new(megabytes * 1024 * 1024)
    }

    /// Store a raster.
    ///
    /// A raster previously stored under the same key is released, unless it
    /// is the very same raster or the key is protected.
    pub fn put(&self, key: &str, bitmap: Bitmap) {
        let mut state = self.state.lock();
        let size = bitmap.byte_count();

        if let Some(old) = state.take(key) {
            state.entry_removed(key, &old, Some(&bitmap));
        }

        state.evict_to_fit(size);

        state.memory_used += size;
        state.entries.insert(key.to_string(), bitmap);
        state.touch(key);
        state.sync_stats();
    }

    /// Look up a raster and mark it most recently used
    pub fn get(&self, key: &str) -> Option<Bitmap> {
        let mut state = self.state.lock();

        if let Some(bitmap) = state.entries.get(key).cloned() {
            state.touch(key);
            state.stats.hits += 1;
            Some(bitmap)
        } else {
            state.stats.misses += 1;
            None
        }
    }

    /// Check presence without touching LRU order or statistics
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Remove a raster, releasing it unless the key is protected.
    ///
    /// Returns the removed handle.
    pub fn remove(&self, key: &str) -> Option<Bitmap> {
        let mut state = self.state.lock();
        let bitmap = state.take(key)?;
        state.entry_removed(key, &bitmap, None);
        Some(bitmap)
    }

    /// Drop the use count for `key`, then remove it
    pub fn remove_image(&self, key: &str) -> Option<Bitmap> {
        let mut state = self.state.lock();
        state.use_counts.remove(key);
        let bitmap = state.take(key)?;
        state.entry_removed(key, &bitmap, None);
        Some(bitmap)
    }

    /// Evict every raster that is not protected
    pub fn evict_all(&self) {
        let mut state = self.state.lock();
        let keys: Vec<String> = state.lru_queue.iter().cloned().collect();
        for key in keys {
            if state.is_protected(&key) {
                continue;
            }
            if let Some(bitmap) = state.take(&key) {
                state.entry_removed(&key, &bitmap, None);
                state.stats.evictions += 1;
            }
        }
    }

    /// Move a raster to a new key without releasing it
    ///
    /// Any use count held on `old_key` moves with it. Returns `false` if
    /// `old_key` was not cached.
    pub fn rename(&self, old_key: &str, new_key: &str) -> bool {
        let mut state = self.state.lock();
        let Some(bitmap) = state.entries.get(old_key).cloned() else {
            return false;
        };
        Self::rename_locked(&mut state, old_key, new_key, bitmap);
        true
    }

    /// Like [`rename`](Self::rename), but a larger raster already stored
    /// under `new_key` wins and the one under `old_key` is dropped instead.
    ///
    /// Use counts move to `new_key` either way.
    pub fn replace(&self, old_key: &str, new_key: &str) -> bool {
        let mut state = self.state.lock();
        let Some(incoming) = state.entries.get(old_key).cloned() else {
            return false;
        };
        let keep_existing = state.entries.get(new_key).is_some_and(|existing| {
            existing.width() > incoming.width() || existing.height() > incoming.height()
        });
        if !keep_existing {
            Self::rename_locked(&mut state, old_key, new_key, incoming);
            return true;
        }

        if let Some(old) = state.take(old_key) {
            state.entry_removed(old_key, &old, None);
        }
        if let Some(count) = state.use_counts.remove(old_key) {
            state.use_counts.insert(new_key.to_string(), count);
        }
        true
    }

    /// Filters of every key stored as `<base>@<filter>`
    pub fn filter_keys(&self, base: &str) -> Vec<String> {
        let prefix = format!("{}@", base);
        let state = self.state.lock();
        let mut filters: Vec<String> = state
            .entries
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect();
        filters.sort();
        filters
    }

    fn rename_locked(state: &mut CacheState, old_key: &str, new_key: &str, bitmap: Bitmap) {
        state.ignore_removal = Some(old_key.to_string());
        if let Some(old) = state.take(old_key) {
            state.entry_removed(old_key, &old, None);
        }
        state.ignore_removal = None;

        if let Some(count) = state.use_counts.remove(old_key) {
            state.use_counts.insert(new_key.to_string(), count);
        }

        if let Some(previous) = state.take(new_key) {
            state.entry_removed(new_key, &previous, Some(&bitmap));
        }
        let size = bitmap.byte_count();
        state.evict_to_fit(size);
        state.memory_used += size;
        state.entries.insert(new_key.to_string(), bitmap);
        state.touch(new_key);
        state.sync_stats();
    }

    /// Set or clear the key whose removal must not recycle its raster
    pub fn set_ignore_removal(&self, key: Option<&str>) {
        self.state.lock().ignore_removal = key.map(str::to_string);
    }

    /// Protect `key` from eviction. Every call must be paired with
    /// [`decrement_use_count`](Self::decrement_use_count).
    pub fn increment_use_count(&self, key: &str) {
        let mut state = self.state.lock();
        *state.use_counts.entry(key.to_string()).or_insert(0) += 1;
    }

    /// Release one use of `key`.
    ///
    /// Returns `true` when no uses remain.
    pub fn decrement_use_count(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        match state.use_counts.get_mut(key) {
            None => true,
            Some(count) if *count <= 1 => {
                state.use_counts.remove(key);
                true
            }
            Some(count) => {
                *count -= 1;
                false
            }
        }
    }

    pub fn use_count(&self, key: &str) -> usize {
        self.state.lock().use_counts.get(key).copied().unwrap_or(0)
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }

    /// Change the capacity, evicting immediately if usage is now above it
    pub fn set_capacity(&self, capacity: usize) {
        let mut state = self.state.lock();
        state.capacity = capacity;
        state.stats.capacity = capacity;
        if state.memory_used > capacity {
            state.evict_to_fit(0);
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub fn memory_used(&self) -> usize {
        self.state.lock().memory_used
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }
}
