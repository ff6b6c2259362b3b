// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The named byte region backing one queue: control block plus message
// ring. Created by the first participant, attached by the rest, unlinked
// by the last to leave.

use std::io;

use log::debug;

use crate::platform::posix::{PosixShm, ShmMode};

/// A named, fixed-size shared memory region.
///
/// `create` zero-fills the user-visible bytes so a fresh queue starts
/// with all counters at zero. `attach` recovers the size from the kernel;
/// attachers never pass one.
pub(crate) struct SharedRegion {
    inner: PosixShm,
    name: String,
}

impl SharedRegion {
    /// Create a new region of `size` user-visible bytes. Fails if a
    /// region with this name already exists.
    ///
    /// `size` is rounded up to the control-counter width so creators and
    /// attachers derive identical layouts from the mapped length.
    pub(crate) fn create(name: &str, size: usize) -> io::Result<Self> {
        let size = size.div_ceil(8) * 8;
        let inner = PosixShm::acquire(name, size, ShmMode::Create)?;
        unsafe {
            std::ptr::write_bytes(inner.as_mut_ptr(), 0, size);
        }
        debug!("created region {name:?} ({size} bytes)");
        Ok(Self {
            inner,
            name: name.to_string(),
        })
    }

    /// Attach to an existing region by name.
    pub(crate) fn attach(name: &str) -> io::Result<Self> {
        let inner = PosixShm::open_sized(name)?;
        debug!("attached region {name:?} ({} bytes)", inner.user_size());
        Ok(Self {
            inner,
            name: name.to_string(),
        })
    }

    /// User-visible size in bytes (control block + ring).
    pub(crate) fn user_size(&self) -> usize {
        self.inner.user_size()
    }

    /// Base pointer of the user-visible bytes.
    pub(crate) fn as_mut_ptr(&self) -> *mut u8 {
        self.inner.as_mut_ptr()
    }

    /// Remove the backing object; the mapping stays valid until drop.
    pub(crate) fn unlink(&self) {
        debug!("unlinking region {:?}", self.name);
        self.inner.unlink();
    }

    /// Remove a named region without an open handle.
    pub(crate) fn clear_storage(name: &str) {
        PosixShm::unlink_by_name(name);
    }
}
