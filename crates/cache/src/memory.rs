//! Memory-class sizing for the bitmap cache
//!
//! The cache capacity is derived from how much memory the process can
//! reasonably claim, then capped at a fixed ceiling.

/// Upper bound for the bitmap cache, in megabytes
pub const MAX_CACHE_MB: usize = 15;

/// Memory class assumed when physical RAM cannot be queried, in megabytes
pub const FALLBACK_MEMORY_CLASS_MB: usize = 128;

#[cfg(target_os = "linux")]
pub fn physical_ram_bytes() -> Option<u64> {
    let mut info = std::mem::MaybeUninit::<libc::sysinfo>::uninit();
    let rc = unsafe { libc::sysinfo(info.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    let info = unsafe { info.assume_init() };
    Some((info.totalram as u64).saturating_mul(info.mem_unit as u64))
}

#[cfg(target_os = "macos")]
pub fn physical_ram_bytes() -> Option<u64> {
    use std::ffi::CString;
    use std::mem::size_of;
    use std::ptr;

    let key = CString::new("hw.memsize").ok()?;
    let mut value: u64 = 0;
    let mut len = size_of::<u64>();
    let rc = unsafe {
        libc::sysctlbyname(
            key.as_ptr(),
            &mut value as *mut u64 as *mut libc::c_void,
            &mut len,
            ptr::null_mut(),
            0,
        )
    };
    if rc == 0 && len == size_of::<u64>() {
        Some(value)
    } else {
        None
    }
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
pub fn physical_ram_bytes() -> Option<u64> {
    None
}

/// Per-process memory budget in megabytes: an eighth of physical RAM
pub fn memory_class_mb() -> usize {
    physical_ram_bytes()
        .map(|bytes| (bytes / (1024 * 1024) / 8) as usize)
        .filter(|mb| *mb > 0)
        .unwrap_or(FALLBACK_MEMORY_CLASS_MB)
}

/// Cache capacity in bytes for a given memory class
pub fn cache_size_for_memory_class(memory_class_mb: usize) -> usize {
    (memory_class_mb / 7).clamp(1, MAX_CACHE_MB) * 1024 * 1024
}

/// Default bitmap cache capacity for this machine
pub fn default_cache_size() -> usize {
    cache_size_for_memory_class(memory_class_mb())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_is_capped() {
        assert_eq!(cache_size_for_memory_class(4096), 15 * 1024 * 1024);
        assert_eq!(cache_size_for_memory_class(70), 10 * 1024 * 1024);
        assert_eq!(cache_size_for_memory_class(3), 1024 * 1024);
    }

    #[test]
    fn test_default_within_bounds() {
        let size = default_cache_size();
        assert!(size >= 1024 * 1024);
        assert!(size <= MAX_CACHE_MB * 1024 * 1024);
    }
}
