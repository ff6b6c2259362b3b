// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The queue's lock-and-signal pair: one process-shared mutex plus one
// process-shared condition variable, both derived from the queue name.
// Every header read, every ring mutation, and every refcount change runs
// under this one mutex; the condvar carries both "space freed" and
// "message appended" wakeups.

use std::io;
use std::time::{Duration, Instant};

use crate::{ShmCondvar, ShmMutex};

fn lock_name(name: &str) -> String {
    format!("{name}_SQ_LOCK_")
}

fn cond_name(name: &str) -> String {
    format!("{name}_SQ_COND_")
}

/// Mutex + condition variable guarding one queue region.
pub struct Monitor {
    lock: ShmMutex,
    cond: ShmCondvar,
}

impl Monitor {
    /// Open (or create) the monitor pair for a queue name.
    pub fn open(name: &str) -> io::Result<Self> {
        let lock = ShmMutex::open(&lock_name(name))?;
        let cond = ShmCondvar::open(&cond_name(name))?;
        Ok(Self { lock, cond })
    }

    /// Acquire the queue mutex; released when the guard drops.
    pub fn lock(&self) -> io::Result<MonitorGuard<'_>> {
        self.lock.lock()?;
        Ok(MonitorGuard { monitor: self })
    }

    /// Remove the backing segments for a queue's monitor pair.
    pub fn clear_storage(name: &str) {
        ShmMutex::clear_storage(&lock_name(name));
        ShmCondvar::clear_storage(&cond_name(name));
    }
}

/// RAII guard over the monitor mutex.
pub struct MonitorGuard<'a> {
    monitor: &'a Monitor,
}

impl MonitorGuard<'_> {
    /// Sleep until signalled or until `timeout` elapses. The mutex is
    /// atomically released during the sleep. Returns `false` on timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        self.monitor.cond.wait(&self.monitor.lock, timeout)
    }

    /// Re-check `pred` on every wakeup until it returns true or the
    /// deadline passes. Returns whether the predicate became true.
    ///
    /// The timeout is a total budget: time consumed by spurious or
    /// unrelated wakeups is deducted from the remaining wait.
    pub fn wait_for<F>(&self, mut pred: F, timeout: Option<Duration>) -> io::Result<bool>
    where
        F: FnMut() -> bool,
    {
        let deadline = timeout.map(|t| Instant::now() + t);
        while !pred() {
            match deadline {
                None => {
                    self.wait(None)?;
                }
                Some(dl) => {
                    let remaining = dl.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(false);
                    }
                    self.wait(Some(remaining))?;
                }
            }
        }
        Ok(true)
    }

    /// Wake every process waiting on this queue's condition variable.
    pub fn broadcast(&self) -> io::Result<()> {
        self.monitor.cond.broadcast()
    }
}

impl Drop for MonitorGuard<'_> {
    fn drop(&mut self) {
        let _ = self.monitor.lock.unlock();
    }
}
