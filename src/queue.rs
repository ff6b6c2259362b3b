// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The synchronisation queue: a circular log of messages in one shared
// region, fanned out to every registered participant.
//
// Wire format of one slot, laid out from `tail` with wrap:
//     [ reads | sender_len | type_len | body_len | sender | type | body ]
// The four 32-bit counters are contiguous (a slot never starts within
// MSG_HEAD_SIZE bytes of the physical end); the three byte strings wrap
// freely. A slot's bytes return to `free` once its read counter hits
// zero and the head has reached it.
//
// Each handle is one participant: it keeps a private read cursor and a
// count of consumed messages (the instance serial). Comparing that count
// with the region's write serial tells a reader whose cursor sits exactly
// on `tail` whether the ring is drained or fully lapped.

use std::io;
use std::time::{Duration, Instant};

use log::debug;

use crate::error::{QueueError, Result};
use crate::layout::{
    self, CTRL_SIZE, MSG_BODY_LEN, MSG_HEAD_SIZE, MSG_READS, MSG_SENDER_LEN, MSG_TYPE_LEN,
};
use crate::monitor::Monitor;
use crate::region::SharedRegion;
use crate::ring::{BodyRing, CtrlBlock};
use crate::screen::ScreenSet;

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// One message popped from the queue: sender name, type string, payload.
/// All three are raw bytes; [`decode`](Message::decode) converts to text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender: Vec<u8>,
    pub msg_type: Vec<u8>,
    pub body: Vec<u8>,
}

impl Message {
    /// Decode all three fields as UTF-8. The message has already been
    /// consumed from the queue; a failure here loses no other reader's
    /// copy.
    pub fn decode(self) -> Result<(String, String, String)> {
        Ok((
            String::from_utf8(self.sender)?,
            String::from_utf8(self.msg_type)?,
            String::from_utf8(self.body)?,
        ))
    }
}

/// Snapshot of the control-block counters, taken under the queue lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub participants: u64,
    pub free: u64,
    pub head: u64,
    pub tail: u64,
    pub serial: u64,
}

// ---------------------------------------------------------------------------
// SyncQueue
// ---------------------------------------------------------------------------

/// A handle on a named synchronisation queue.
///
/// Construct with [`create`](SyncQueue::create) (first participant) or
/// [`attach`](SyncQueue::attach), then call [`register`](SyncQueue::register)
/// before sending or receiving. Every handle is an independent participant
/// with its own read cursor and screens; handles in the same process or in
/// different processes behave identically.
///
/// Dropping a handle closes it; the last participant to close unlinks the
/// region. A process that dies without closing leaks its participant slot
/// and can pin messages forever, so closing is part of the protocol.
pub struct SyncQueue {
    name: String,
    region: Option<SharedRegion>,
    monitor: Monitor,
    body_len: usize,
    sender: Vec<u8>,
    cursor: usize,
    serial: u64,
    screen_senders: ScreenSet,
    screen_types: ScreenSet,
    registered: bool,
}

impl SyncQueue {
    /// Create a new queue region of `size` bytes and open a handle on it.
    /// Fails if the name already exists. `size` covers the control block
    /// plus the ring and is rounded up to the counter width.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        if size < layout::MIN_REGION_SIZE || size as u128 > layout::MAX_REGION_SIZE {
            return Err(QueueError::InvalidRegionSize {
                requested: size as u128,
                min: layout::MIN_REGION_SIZE as u64,
                max: layout::MAX_REGION_SIZE,
            });
        }

        let monitor = Monitor::open(name)?;
        let region = {
            // Initialise under the queue lock so attachers never observe
            // a half-built control block.
            let guard = monitor.lock()?;
            let region = SharedRegion::create(name, size)?;
            let body_len = region.user_size() - CTRL_SIZE;
            CtrlBlock::new(region.as_mut_ptr()).set_free(body_len as u64);
            drop(guard);
            region
        };

        Ok(Self::from_parts(name, region, monitor))
    }

    /// Create a queue region sized to the host page.
    pub fn create_default(name: &str) -> Result<Self> {
        Self::create(name, layout::default_region_size())
    }

    /// Attach to an existing queue region by name.
    pub fn attach(name: &str) -> Result<Self> {
        let monitor = Monitor::open(name)?;
        let region = {
            let guard = monitor.lock()?;
            let region = SharedRegion::attach(name).map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    QueueError::NotFound(name.to_string())
                } else {
                    QueueError::Io(e)
                }
            })?;
            drop(guard);
            region
        };

        if region.user_size() < layout::MIN_REGION_SIZE {
            return Err(QueueError::InvalidRegionSize {
                requested: region.user_size() as u128,
                min: layout::MIN_REGION_SIZE as u64,
                max: layout::MAX_REGION_SIZE,
            });
        }

        Ok(Self::from_parts(name, region, monitor))
    }

    fn from_parts(name: &str, region: SharedRegion, monitor: Monitor) -> Self {
        let body_len = region.user_size() - CTRL_SIZE;
        Self {
            name: name.to_string(),
            region: Some(region),
            monitor,
            body_len,
            sender: Vec::new(),
            cursor: 0,
            serial: 0,
            screen_senders: ScreenSet::new(),
            screen_types: ScreenSet::new(),
            registered: false,
        }
    }

    /// The queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ring capacity in bytes (region size minus the control block).
    pub fn body_len(&self) -> usize {
        self.body_len
    }

    /// This handle's sender name; empty before registration.
    pub fn sender(&self) -> &[u8] {
        &self.sender
    }

    fn views(&self) -> Result<(CtrlBlock, BodyRing)> {
        let region = self.region.as_ref().ok_or(QueueError::Closed)?;
        let base = region.as_mut_ptr();
        Ok((
            CtrlBlock::new(base),
            BodyRing::new(unsafe { base.add(CTRL_SIZE) }, self.body_len),
        ))
    }

    // -- lifecycle ----------------------------------------------------------

    /// Register this handle as a participant, named after the process PID,
    /// with self-screening on.
    pub fn register(&mut self) -> Result<()> {
        let pid = std::process::id().to_string();
        self.register_as(pid, true)
    }

    /// Register this handle under `sender`. With `screen_self`, the
    /// encoded sender bytes go into the sender screen so the handle never
    /// receives its own messages.
    ///
    /// Registration points the read cursor at the current `tail` and
    /// captures the current write serial: a participant only sees
    /// messages appended after it joined.
    pub fn register_as(&mut self, sender: impl AsRef<[u8]>, screen_self: bool) -> Result<()> {
        let (ctrl, _) = self.views()?;
        if self.registered {
            return Err(QueueError::AlreadyRegistered);
        }

        let sender = sender.as_ref().to_vec();
        if screen_self {
            self.screen_senders.insert(&sender);
        }

        let guard = self.monitor.lock()?;
        ctrl.set_procs(ctrl.procs() + 1);
        self.cursor = ctrl.tail() as usize;
        self.serial = ctrl.serial();
        drop(guard);

        debug!(
            "registered {:?} on queue {:?}",
            String::from_utf8_lossy(&sender),
            self.name
        );
        self.sender = sender;
        self.registered = true;
        Ok(())
    }

    /// Close this handle: consume this instance's unread backlog so it no
    /// longer pins slots, leave the participant set, and unlink the
    /// region if nobody is left. Safe to call twice; the second call is a
    /// no-op. Also runs on drop.
    pub fn close(&mut self) -> Result<()> {
        let Some(region) = self.region.take() else {
            return Ok(());
        };
        let base = region.as_mut_ptr();
        let ctrl = CtrlBlock::new(base);
        let ring = BodyRing::new(unsafe { base.add(CTRL_SIZE) }, self.body_len);

        let last = {
            let guard = self.monitor.lock()?;
            if self.registered {
                while has_unread(&ctrl, self.cursor, self.serial) {
                    self.serial = self.serial.wrapping_add(1);
                    let at = self.cursor;
                    self.cursor = ring.normalize((at + ring.slot_size(at)) % ring.len());
                    let remaining = ring.msg_counter(at, MSG_READS).saturating_sub(1);
                    ring.set_msg_counter(at, MSG_READS, remaining);
                    if remaining == 0 {
                        reclaim_from_head(&ctrl, &ring);
                    }
                }
                let procs = ctrl.procs();
                if procs > 0 {
                    ctrl.set_procs(procs - 1);
                }
                self.registered = false;
                // The drain may have freed space.
                guard.broadcast()?;
            }
            ctrl.procs() == 0
        };

        if last {
            region.unlink();
        }
        drop(region);
        debug!("closed handle on queue {:?} (last: {last})", self.name);
        Ok(())
    }

    /// Force-remove the region and monitor segments for a queue name.
    /// For reclaiming names left behind by crashed participants.
    pub fn clear_storage(name: &str) {
        SharedRegion::clear_storage(name);
        Monitor::clear_storage(name);
    }

    // -- screens ------------------------------------------------------------

    /// Discard incoming messages whose sender equals `name`.
    pub fn screen_sender(&mut self, name: impl AsRef<[u8]>) {
        self.screen_senders.insert(name);
    }

    /// Discard incoming messages whose type equals `msg_type`.
    pub fn screen_type(&mut self, msg_type: impl AsRef<[u8]>) {
        self.screen_types.insert(msg_type);
    }

    // -- append -------------------------------------------------------------

    /// Append a message without blocking. Fails with
    /// [`QueueError::OutOfSpace`] if the ring lacks room right now.
    pub fn try_append(&mut self, msg_type: impl AsRef<[u8]>, body: impl AsRef<[u8]>) -> Result<()> {
        self.append_inner(msg_type.as_ref(), body.as_ref(), false, None)
    }

    /// Append a message, waiting up to `timeout` (`None` waits forever)
    /// for readers to free enough room.
    pub fn append(
        &mut self,
        msg_type: impl AsRef<[u8]>,
        body: impl AsRef<[u8]>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.append_inner(msg_type.as_ref(), body.as_ref(), true, timeout)
    }

    fn append_inner(
        &mut self,
        msg_type: &[u8],
        body: &[u8],
        block: bool,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let (ctrl, ring) = self.views()?;
        if !self.registered {
            return Err(QueueError::NotRegistered);
        }

        let n = MSG_HEAD_SIZE + self.sender.len() + msg_type.len() + body.len();
        // A slot that exceeds the ring, or a field that overflows its
        // 32-bit counter, can never fit; fail without waiting.
        let fits = n <= self.body_len
            && self.sender.len() <= u32::MAX as usize
            && msg_type.len() <= u32::MAX as usize
            && body.len() <= u32::MAX as usize;

        let guard = self.monitor.lock()?;

        let room = |ctrl: &CtrlBlock| ctrl.free() >= n as u64;
        if !(fits && (room(&ctrl) || block && guard.wait_for(|| room(&ctrl), timeout)?)) {
            return Err(QueueError::OutOfSpace {
                needed: n as u64,
                free: ctrl.free(),
            });
        }

        let mut at = ctrl.tail() as usize;
        ring.set_msg_counter(at, MSG_READS, ctrl.procs() as u32);
        ring.set_msg_counter(at, MSG_SENDER_LEN, self.sender.len() as u32);
        ring.set_msg_counter(at, MSG_TYPE_LEN, msg_type.len() as u32);
        ring.set_msg_counter(at, MSG_BODY_LEN, body.len() as u32);

        at = (at + MSG_HEAD_SIZE) % ring.len();
        at = ring.write(at, &self.sender);
        at = ring.write(at, msg_type);
        at = ring.write(at, body);

        ctrl.set_free(ctrl.free() - n as u64);
        ctrl.set_tail(at as u64);

        // Too close to the physical end for the next slot's counters:
        // park the tail at 0 and burn the trailing bytes as skip padding.
        // They sit between tail and head, so they are free by geometry.
        let trailing = ring.len() - at;
        if trailing < MSG_HEAD_SIZE {
            debug_assert!(ctrl.free() >= trailing as u64);
            ctrl.set_tail(0);
            ctrl.set_free(ctrl.free() - trailing as u64);
        }

        ctrl.bump_serial();
        guard.broadcast()?;
        Ok(())
    }

    // -- pop ----------------------------------------------------------------

    /// Pop the next unread, unscreened message without blocking.
    /// Returns `Ok(None)` when nothing is pending.
    pub fn try_pop(&mut self) -> Result<Option<Message>> {
        self.pop_inner(false, None)
    }

    /// Pop the next unread, unscreened message, waiting up to `timeout`
    /// (`None` waits forever). Time spent consuming screened messages
    /// counts against the budget.
    pub fn pop(&mut self, timeout: Option<Duration>) -> Result<Option<Message>> {
        self.pop_inner(true, timeout)
    }

    fn pop_inner(&mut self, block: bool, timeout: Option<Duration>) -> Result<Option<Message>> {
        let (ctrl, ring) = self.views()?;
        if !self.registered {
            return Err(QueueError::NotRegistered);
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let guard = self.monitor.lock()?;

        loop {
            while has_unread(&ctrl, self.cursor, self.serial) {
                self.serial = self.serial.wrapping_add(1);
                let at = self.cursor;

                let slen = ring.msg_counter(at, MSG_SENDER_LEN) as usize;
                let tlen = ring.msg_counter(at, MSG_TYPE_LEN) as usize;
                let blen = ring.msg_counter(at, MSG_BODY_LEN) as usize;
                let data_at = (at + MSG_HEAD_SIZE) % ring.len();

                // Screens short-circuit: a screened sender never has its
                // type or body copied out.
                let (sender, after_sender) = ring.read(data_at, slen);
                let matched = if self.screen_senders.contains(&sender) {
                    None
                } else {
                    let (msg_type, after_type) = ring.read(after_sender, tlen);
                    if self.screen_types.contains(&msg_type) {
                        None
                    } else {
                        let (body, _) = ring.read(after_type, blen);
                        Some(Message {
                            sender,
                            msg_type,
                            body,
                        })
                    }
                };

                self.cursor = ring.normalize((data_at + slen + tlen + blen) % ring.len());

                // Matched or screened, this instance has consumed its
                // read of the slot.
                let remaining = ring.msg_counter(at, MSG_READS).saturating_sub(1);
                ring.set_msg_counter(at, MSG_READS, remaining);
                if remaining == 0 {
                    reclaim_from_head(&ctrl, &ring);
                }
                guard.broadcast()?;

                if let Some(msg) = matched {
                    return Ok(Some(msg));
                }
            }

            if !block {
                return Ok(None);
            }

            let (cursor, serial) = (self.cursor, self.serial);
            let pending = || has_unread(&ctrl, cursor, serial);
            let woke = match deadline {
                None => guard.wait_for(pending, None)?,
                Some(dl) => {
                    let remaining = dl.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        false
                    } else {
                        guard.wait_for(pending, Some(remaining))?
                    }
                }
            };
            if !woke {
                return Ok(None);
            }
        }
    }

    /// Iterate over pending messages without blocking; screened messages
    /// are consumed invisibly and the iterator ends when the backlog is
    /// drained.
    pub fn drain(&mut self) -> Drain<'_> {
        Drain {
            queue: self,
            block: false,
            timeout: None,
        }
    }

    /// Iterate over messages, waiting up to `timeout` for *each* element;
    /// the iterator ends when a wait expires.
    pub fn drain_blocking(&mut self, timeout: Option<Duration>) -> Drain<'_> {
        Drain {
            queue: self,
            block: true,
            timeout,
        }
    }

    // -- introspection ------------------------------------------------------

    /// Control-counter snapshot, taken under the queue lock.
    pub fn stats(&self) -> Result<QueueStats> {
        let (ctrl, _) = self.views()?;
        let _guard = self.monitor.lock()?;
        Ok(QueueStats {
            participants: ctrl.procs(),
            free: ctrl.free(),
            head: ctrl.head(),
            tail: ctrl.tail(),
            serial: ctrl.serial(),
        })
    }
}

impl Drop for SyncQueue {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncQueue")
            .field("name", &self.name)
            .field("body_len", &self.body_len)
            .field("registered", &self.registered)
            .field("closed", &self.region.is_none())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Drain iterator
// ---------------------------------------------------------------------------

/// Iterator over pending messages; see [`SyncQueue::drain`] and
/// [`SyncQueue::drain_blocking`].
pub struct Drain<'q> {
    queue: &'q mut SyncQueue,
    block: bool,
    timeout: Option<Duration>,
}

impl Iterator for Drain<'_> {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.queue.pop_inner(self.block, self.timeout) {
            Ok(Some(msg)) => Some(Ok(msg)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared protocol steps
// ---------------------------------------------------------------------------

/// The pop predicate: a slot is pending when the cursor trails the tail,
/// or when the cursor sits on the tail but the instance has consumed
/// fewer messages than the region has seen appended (a full lap).
fn has_unread(ctrl: &CtrlBlock, cursor: usize, serial: u64) -> bool {
    cursor as u64 != ctrl.tail() || serial != ctrl.serial()
}

/// Return depleted slots at the head to `free`, chaining forward until a
/// live slot (or the empty ring) stops the walk. Chaining matters: a slot
/// can hit zero reads while buried behind the head, and nothing will ever
/// decrement it again.
fn reclaim_from_head(ctrl: &CtrlBlock, ring: &BodyRing) {
    while ctrl.free() < ring.len() as u64 {
        let head = ctrl.head() as usize;
        if ring.msg_counter(head, MSG_READS) != 0 {
            break;
        }
        let mut next = (head + ring.slot_size(head)) % ring.len();
        let mut freed = ring.slot_size(head) as u64;
        let trailing = ring.len() - next;
        if trailing < MSG_HEAD_SIZE {
            // Mirror of append's end-of-ring rule: the skip padding is
            // reclaimed together with the slot before it.
            freed += trailing as u64;
            next = 0;
        }
        ctrl.set_head(next as u64);
        ctrl.set_free(ctrl.free() + freed);
        debug_assert!(ctrl.free() <= ring.len() as u64);
    }
}
