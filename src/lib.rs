// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Multi-producer / multi-consumer synchronisation queue over named POSIX
// shared memory. Every registered participant writes and reads; each
// appended message is delivered to every participant registered at the
// moment of the write. One process-shared mutex and condition variable
// coordinate all access to the region.

pub mod layout;
pub mod shm_name;

mod platform;

mod error;
pub use error::{QueueError, Result};

mod region;

mod mutex;
pub use mutex::ShmMutex;

mod condition;
pub use condition::ShmCondvar;

mod monitor;
pub use monitor::{Monitor, MonitorGuard};

mod ring;

mod screen;
pub use screen::ScreenSet;

mod queue;
pub use queue::{Drain, Message, QueueStats, SyncQueue};
