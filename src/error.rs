// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error type for queue construction, registration, and message traffic.

use thiserror::Error;

/// Errors surfaced by [`crate::SyncQueue`] and the region handle.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Requested region size falls outside the supported bounds.
    #[error("region size {requested} outside supported range {min}..={max}")]
    InvalidRegionSize {
        requested: u128,
        min: u64,
        max: u128,
    },

    /// Append could not claim enough ring bytes before giving up.
    #[error("{needed} byte message > {free} free bytes")]
    OutOfSpace { needed: u64, free: u64 },

    /// Attach to a region name that does not exist.
    #[error("no shared memory region named {0:?}")]
    NotFound(String),

    /// Operation on a handle that has already been closed.
    #[error("queue handle is closed")]
    Closed,

    /// Message traffic before `register` was called on this handle.
    #[error("instance is not registered with the queue")]
    NotRegistered,

    /// Second `register` call on the same handle.
    #[error("instance is already registered with the queue")]
    AlreadyRegistered,

    /// A popped field was requested as text but is not valid UTF-8.
    #[error("message field is not valid UTF-8")]
    Encoding(#[from] std::string::FromUtf8Error),

    /// Underlying shared memory or pthread primitive failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;
