// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Fixed byte layout of the queue region: the control block of five 64-bit
// counters at the start, followed by the message ring. Message slots carry
// their own header of four 32-bit counters.
//
// All counters are native-endian; the layout is the ABI shared by every
// process that attaches to the same region name.

/// Number of 64-bit counters in the control block.
pub const CTRL_COUNTERS: usize = 5;

/// Byte width of one control counter (`u64`).
pub const CTRL_COUNTER_SIZE: usize = std::mem::size_of::<u64>();

/// Byte size of the control block at the start of the region.
pub const CTRL_SIZE: usize = CTRL_COUNTERS * CTRL_COUNTER_SIZE;

/// Control counter indices.
pub const CTRL_PROCS: usize = 0;
pub const CTRL_FREE: usize = 1;
pub const CTRL_HEAD: usize = 2;
pub const CTRL_TAIL: usize = 3;
pub const CTRL_SERIAL: usize = 4;

/// Number of 32-bit counters in a message header.
pub const MSG_COUNTERS: usize = 4;

/// Byte width of one message counter (`u32`).
pub const MSG_COUNTER_SIZE: usize = std::mem::size_of::<u32>();

/// Byte size of a message header. This block is always contiguous in the
/// ring; it never straddles the wrap.
pub const MSG_HEAD_SIZE: usize = MSG_COUNTERS * MSG_COUNTER_SIZE;

/// Message counter indices.
pub const MSG_READS: usize = 0;
pub const MSG_SENDER_LEN: usize = 1;
pub const MSG_TYPE_LEN: usize = 2;
pub const MSG_BODY_LEN: usize = 3;

/// Smallest usable region: the control block plus one message header.
pub const MIN_REGION_SIZE: usize = CTRL_SIZE + MSG_HEAD_SIZE;

/// Largest permitted region: the control block plus as many minimum-sized
/// messages as the 64-bit serial counter can number before lapping.
/// Advisory on 64-bit hosts, where `usize` cannot express a violation.
pub const MAX_REGION_SIZE: u128 =
    CTRL_SIZE as u128 + (u64::MAX as u128 + 1) * MSG_HEAD_SIZE as u128;

/// Default region size: the host page size.
pub fn default_region_size() -> usize {
    #[cfg(unix)]
    {
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if page > 0 {
            return page as usize;
        }
    }
    4096
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_block_is_forty_bytes() {
        assert_eq!(CTRL_SIZE, 40);
        assert_eq!(MSG_HEAD_SIZE, 16);
    }

    #[test]
    fn default_size_holds_messages() {
        assert!(default_region_size() >= MIN_REGION_SIZE);
    }
}
