// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named inter-process mutex: a pthread_mutex_t living in its own shared
// memory segment with PTHREAD_PROCESS_SHARED (and, where the platform has
// it, PTHREAD_MUTEX_ROBUST so a dead owner does not wedge the queue).

use std::io;
use std::ptr;
use std::sync::Arc;

use crate::platform::posix::{self, CachedSegment};

/// A named mutex shared between processes.
///
/// All threads of one process that open the same name share a single
/// mapping through the segment cache.
pub struct ShmMutex {
    cached: Arc<CachedSegment>,
    name: String,
}

impl ShmMutex {
    /// Open (or create and initialise) a named inter-process mutex.
    pub fn open(name: &str) -> io::Result<Self> {
        let shm_size = std::mem::size_of::<libc::pthread_mutex_t>();
        let cached = posix::cache_acquire(posix::lock_cache(), name, shm_size, |base| {
            let mtx_ptr = base as *mut libc::pthread_mutex_t;
            unsafe {
                ptr::write_bytes(mtx_ptr, 0, 1);

                let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
                let mut eno = libc::pthread_mutexattr_init(&mut attr);
                if eno != 0 {
                    return Err(io::Error::from_raw_os_error(eno));
                }

                eno = libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
                if eno != 0 {
                    libc::pthread_mutexattr_destroy(&mut attr);
                    return Err(io::Error::from_raw_os_error(eno));
                }

                #[cfg(not(target_os = "macos"))]
                {
                    eno = posix::pthread_mutexattr_setrobust(&mut attr, posix::PTHREAD_MUTEX_ROBUST);
                    if eno != 0 {
                        libc::pthread_mutexattr_destroy(&mut attr);
                        return Err(io::Error::from_raw_os_error(eno));
                    }
                }

                eno = libc::pthread_mutex_init(mtx_ptr, &attr);
                libc::pthread_mutexattr_destroy(&mut attr);
                if eno != 0 {
                    return Err(io::Error::from_raw_os_error(eno));
                }
            }
            Ok(())
        })?;

        Ok(Self {
            cached,
            name: name.to_string(),
        })
    }

    fn mtx_ptr(&self) -> *mut libc::pthread_mutex_t {
        self.cached.shm.as_mut_ptr() as *mut libc::pthread_mutex_t
    }

    /// Lock, blocking. `EOWNERDEAD` from a robust mutex is recovered with
    /// `pthread_mutex_consistent` and reported as success.
    pub fn lock(&self) -> io::Result<()> {
        let eno = unsafe { libc::pthread_mutex_lock(self.mtx_ptr()) };
        match eno {
            0 => Ok(()),
            #[cfg(not(target_os = "macos"))]
            posix::EOWNERDEAD => {
                let eno2 = unsafe { posix::pthread_mutex_consistent(self.mtx_ptr()) };
                if eno2 != 0 {
                    return Err(io::Error::from_raw_os_error(eno2));
                }
                Ok(())
            }
            _ => Err(io::Error::from_raw_os_error(eno)),
        }
    }

    /// Unlock. The caller must hold the lock.
    pub fn unlock(&self) -> io::Result<()> {
        let eno = unsafe { libc::pthread_mutex_unlock(self.mtx_ptr()) };
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
        Ok(())
    }

    /// Raw pointer to the underlying pthread mutex, for condvar waits.
    pub(crate) fn native_ptr(&self) -> *mut libc::pthread_mutex_t {
        self.mtx_ptr()
    }

    /// Remove the backing segment and purge the local cache entry.
    pub fn clear_storage(name: &str) {
        posix::cache_purge(posix::lock_cache(), name);
        posix::PosixShm::unlink_by_name(name);
    }
}

impl Drop for ShmMutex {
    fn drop(&mut self) {
        // No pthread_mutex_destroy here. After munmap the virtual address
        // may be recycled for a different segment, and destroy would wreck
        // whatever mutex now lives there. Releasing the mapping is enough.
        posix::cache_release(posix::lock_cache(), &self.name);
    }
}
