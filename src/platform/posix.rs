// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX shared memory segments.
//
// Every segment is mapped with a trailing `atomic<int32_t>` reference
// counter shared between all processes mapping the same name. The last
// mapping to drop unlinks the backing object, so stale segments do not
// accumulate when every handle is released cleanly.
//
// The segment cache makes all threads of one process share a single
// mapping per named mutex/condvar. pthread objects (notably on macOS)
// store state relative to the virtual address they were initialised at;
// a second mmap of the same pages at a different address makes
// pthread_mutex_lock fail with EINVAL.

use std::collections::HashMap;
use std::ffi::CString;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::shm_name;

// ---------------------------------------------------------------------------
// In-process segment cache
// ---------------------------------------------------------------------------

pub(crate) struct CachedSegment {
    pub(crate) shm: PosixShm,
    pub(crate) local_ref: AtomicUsize,
}

pub(crate) struct SegmentCache {
    map: HashMap<String, Arc<CachedSegment>>,
}

impl SegmentCache {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }
}

pub(crate) fn lock_cache() -> &'static Mutex<SegmentCache> {
    static CACHE: OnceLock<Mutex<SegmentCache>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(SegmentCache::new()))
}

pub(crate) fn cond_cache() -> &'static Mutex<SegmentCache> {
    static CACHE: OnceLock<Mutex<SegmentCache>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(SegmentCache::new()))
}

/// Acquire or reuse a cached segment.
///
/// On the first local open of `name`, `init_fn` runs with the segment
/// pointer while the cache lock is still held, so no other thread can
/// observe a half-initialised pthread object.
pub(crate) fn cache_acquire<F>(
    cache: &Mutex<SegmentCache>,
    name: &str,
    size: usize,
    init_fn: F,
) -> io::Result<Arc<CachedSegment>>
where
    F: FnOnce(*mut u8) -> io::Result<()>,
{
    let mut c = cache.lock().unwrap();
    if let Some(entry) = c.map.get(name) {
        entry.local_ref.fetch_add(1, Ordering::Relaxed);
        return Ok(Arc::clone(entry));
    }
    let shm = PosixShm::acquire(name, size, ShmMode::CreateOrOpen)?;
    if shm.prev_ref_count() == 0 {
        init_fn(shm.as_mut_ptr())?;
    }
    let entry = Arc::new(CachedSegment {
        shm,
        local_ref: AtomicUsize::new(1),
    });
    c.map.insert(name.to_string(), Arc::clone(&entry));
    Ok(entry)
}

/// Release one local reference; the last local ref removes the cache entry.
pub(crate) fn cache_release(cache: &Mutex<SegmentCache>, name: &str) {
    let mut c = cache.lock().unwrap();
    if let Some(entry) = c.map.get(name) {
        let prev = entry.local_ref.fetch_sub(1, Ordering::AcqRel);
        if prev <= 1 {
            c.map.remove(name);
        }
    }
}

/// Forcibly drop a cache entry so a later open creates fresh state.
pub(crate) fn cache_purge(cache: &Mutex<SegmentCache>, name: &str) {
    let mut c = cache.lock().unwrap();
    c.map.remove(name);
}

// ---------------------------------------------------------------------------
// Robust mutex symbols — not exposed by the libc crate on all platforms.
// macOS has no robust mutexes; EOWNERDEAD handling is compiled out there.
// ---------------------------------------------------------------------------

#[cfg(not(target_os = "macos"))]
pub(crate) const EOWNERDEAD: i32 = libc::EOWNERDEAD;

#[cfg(not(target_os = "macos"))]
extern "C" {
    pub(crate) fn pthread_mutexattr_setrobust(
        attr: *mut libc::pthread_mutexattr_t,
        robustness: libc::c_int,
    ) -> libc::c_int;
    pub(crate) fn pthread_mutex_consistent(mutex: *mut libc::pthread_mutex_t) -> libc::c_int;
}

#[cfg(not(target_os = "macos"))]
pub(crate) const PTHREAD_MUTEX_ROBUST: libc::c_int = 1;

// ---------------------------------------------------------------------------
// Segment layout: user bytes, padding to counter alignment, ref counter
// ---------------------------------------------------------------------------

const ALIGN: usize = std::mem::align_of::<AtomicI32>();

/// Total mapped size for a user-visible size: round up to the counter
/// alignment, then append the `atomic<int32_t>` reference counter.
pub(crate) fn calc_size(user_size: usize) -> usize {
    let aligned = ((user_size.wrapping_sub(1) / ALIGN) + 1) * ALIGN;
    aligned + std::mem::size_of::<AtomicI32>()
}

/// The trailing reference counter of a mapped segment.
///
/// # Safety
/// `mem` must point to a live mapping of at least `total_size` bytes.
unsafe fn ref_counter(mem: *mut u8, total_size: usize) -> &'static AtomicI32 {
    let offset = total_size - std::mem::size_of::<AtomicI32>();
    &*(mem.add(offset) as *const AtomicI32)
}

// ---------------------------------------------------------------------------
// PosixShm
// ---------------------------------------------------------------------------

pub(crate) struct PosixShm {
    mem: *mut u8,
    size: usize,      // total mapped size, counter included
    user_size: usize, // user-visible size
    name: String,     // POSIX name, leading '/'
    prev_ref: i32,    // counter value before our own increment
}

// The mapping is shared between processes by design; access discipline is
// the caller's responsibility.
unsafe impl Send for PosixShm {}
unsafe impl Sync for PosixShm {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShmMode {
    Create,
    CreateOrOpen,
}

impl PosixShm {
    /// Acquire a named segment of `user_size` visible bytes.
    pub(crate) fn acquire(name: &str, user_size: usize, mode: ShmMode) -> io::Result<Self> {
        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
        }
        if user_size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }

        let posix_name = shm_name::make_shm_name(name);
        let c_name = CString::new(posix_name.as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let perms: libc::mode_t = 0o666;
        let total_size = calc_size(user_size);

        // For CreateOrOpen, try exclusive create first so ftruncate only
        // runs on an object we own. On macOS, ftruncate on an already-sized
        // object can zero its contents before returning EINVAL.
        let (fd, need_truncate) = match mode {
            ShmMode::Create => {
                let f = unsafe {
                    libc::shm_open(
                        c_name.as_ptr(),
                        libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                        perms as libc::c_uint,
                    )
                };
                if f == -1 {
                    return Err(io::Error::last_os_error());
                }
                (f, true)
            }
            ShmMode::CreateOrOpen => {
                let f = unsafe {
                    libc::shm_open(
                        c_name.as_ptr(),
                        libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                        perms as libc::c_uint,
                    )
                };
                if f != -1 {
                    (f, true)
                } else {
                    let e = io::Error::last_os_error();
                    if e.raw_os_error() != Some(libc::EEXIST) {
                        return Err(e);
                    }
                    let f2 = unsafe {
                        libc::shm_open(c_name.as_ptr(), libc::O_RDWR, perms as libc::c_uint)
                    };
                    if f2 == -1 {
                        return Err(io::Error::last_os_error());
                    }
                    (f2, false)
                }
            }
        };

        unsafe { libc::fchmod(fd, perms) };

        if need_truncate {
            let ret = unsafe { libc::ftruncate(fd, total_size as libc::off_t) };
            if ret != 0 {
                let err = io::Error::last_os_error();
                unsafe { libc::close(fd) };
                return Err(err);
            }
        }

        Self::map_and_finish(fd, total_size, user_size, posix_name)
    }

    /// Open an existing segment whose size is recovered from the kernel
    /// via fstat. Used by attachers that do not know the region size.
    pub(crate) fn open_sized(name: &str) -> io::Result<Self> {
        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
        }

        let posix_name = shm_name::make_shm_name(name);
        let c_name = CString::new(posix_name.as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0o666 as libc::c_uint) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut st) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }

        let total_size = st.st_size as usize;
        let counter = std::mem::size_of::<AtomicI32>();
        if total_size <= counter {
            unsafe { libc::close(fd) };
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "segment too small to carry a reference counter",
            ));
        }

        Self::map_and_finish(fd, total_size, total_size - counter, posix_name)
    }

    fn map_and_finish(
        fd: i32,
        total_size: usize,
        user_size: usize,
        posix_name: String,
    ) -> io::Result<Self> {
        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                total_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };

        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let prev = unsafe { ref_counter(mem as *mut u8, total_size).fetch_add(1, Ordering::AcqRel) };

        Ok(Self {
            mem: mem as *mut u8,
            size: total_size,
            user_size,
            name: posix_name,
            prev_ref: prev,
        })
    }

    pub(crate) fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }

    pub(crate) fn user_size(&self) -> usize {
        self.user_size
    }

    /// Counter value before our own increment; 0 means we created the
    /// segment (or were the first to map it again after a full release).
    pub(crate) fn prev_ref_count(&self) -> i32 {
        self.prev_ref
    }

    /// Remove the backing object. The mapping itself stays valid.
    pub(crate) fn unlink(&self) {
        if let Ok(c_name) = CString::new(self.name.as_bytes()) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }

    /// Remove a named segment without an open handle.
    pub(crate) fn unlink_by_name(name: &str) {
        let posix_name = shm_name::make_shm_name(name);
        if let Ok(c_name) = CString::new(posix_name.as_bytes()) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }
}

impl Drop for PosixShm {
    fn drop(&mut self) {
        if self.mem.is_null() {
            return;
        }
        let prev = unsafe { ref_counter(self.mem, self.size).fetch_sub(1, Ordering::AcqRel) };
        unsafe { libc::munmap(self.mem as *mut libc::c_void, self.size) };
        if prev <= 1 {
            self.unlink();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calc_size_appends_counter() {
        assert_eq!(calc_size(4), 8);
        assert_eq!(calc_size(5), 12);
        assert_eq!(calc_size(4096), 4100);
    }
}
