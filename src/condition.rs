// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named inter-process condition variable: a pthread_cond_t living in its
// own shared memory segment with PTHREAD_PROCESS_SHARED.

use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::platform::posix::{self, CachedSegment};
use crate::ShmMutex;

/// A named condition variable shared between processes.
pub struct ShmCondvar {
    cached: Arc<CachedSegment>,
    name: String,
}

impl ShmCondvar {
    /// Open (or create and initialise) a named condition variable.
    pub fn open(name: &str) -> io::Result<Self> {
        let shm_size = std::mem::size_of::<libc::pthread_cond_t>();
        let cached = posix::cache_acquire(posix::cond_cache(), name, shm_size, |base| {
            let cond_ptr = base as *mut libc::pthread_cond_t;
            unsafe {
                std::ptr::write_bytes(cond_ptr, 0, 1);

                let mut attr: libc::pthread_condattr_t = std::mem::zeroed();
                let mut eno = libc::pthread_condattr_init(&mut attr);
                if eno != 0 {
                    return Err(io::Error::from_raw_os_error(eno));
                }

                eno = libc::pthread_condattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
                if eno != 0 {
                    libc::pthread_condattr_destroy(&mut attr);
                    return Err(io::Error::from_raw_os_error(eno));
                }

                eno = libc::pthread_cond_init(cond_ptr, &attr);
                libc::pthread_condattr_destroy(&mut attr);
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

    fn cond_ptr(&self) -> *mut libc::pthread_cond_t {
        self.cached.shm.as_mut_ptr() as *mut libc::pthread_cond_t
    }

    /// Wait on the condition variable. The caller must hold `mtx`; it is
    /// atomically released for the duration of the sleep and reacquired
    /// before returning. `None` waits indefinitely.
    /// Returns `Ok(true)` when signalled, `Ok(false)` on timeout.
    pub fn wait(&self, mtx: &ShmMutex, timeout: Option<Duration>) -> io::Result<bool> {
        let mtx_ptr = mtx.native_ptr();

        match timeout {
            None => {
                let eno = unsafe { libc::pthread_cond_wait(self.cond_ptr(), mtx_ptr) };
                if eno != 0 {
                    return Err(io::Error::from_raw_os_error(eno));
                }
                Ok(true)
            }
            Some(dur) => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default();
                let deadline = now + dur;
                let ts = libc::timespec {
                    tv_sec: deadline.as_secs() as libc::time_t,
                    tv_nsec: deadline.subsec_nanos() as libc::c_long,
                };
                let eno = unsafe { libc::pthread_cond_timedwait(self.cond_ptr(), mtx_ptr, &ts) };
                if eno == 0 {
                    return Ok(true);
                }
                if eno == libc::ETIMEDOUT {
                    return Ok(false);
                }
                Err(io::Error::from_raw_os_error(eno))
            }
        }
    }

    /// Wake one waiter.
    pub fn notify(&self) -> io::Result<()> {
        let eno = unsafe { libc::pthread_cond_signal(self.cond_ptr()) };
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
        Ok(())
    }

    /// Wake every waiter.
    pub fn broadcast(&self) -> io::Result<()> {
        let eno = unsafe { libc::pthread_cond_broadcast(self.cond_ptr()) };
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
        Ok(())
    }

    /// Remove the backing segment and purge the local cache entry.
    pub fn clear_storage(name: &str) {
        posix::cache_purge(posix::cond_cache(), name);
        posix::PosixShm::unlink_by_name(name);
    }
}

impl Drop for ShmCondvar {
    fn drop(&mut self) {
        // No pthread_cond_destroy, for the same address-recycling reason
        // as ShmMutex.
        posix::cache_release(posix::cond_cache(), &self.name);
    }
}
