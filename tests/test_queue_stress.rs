// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Stress tests: racing writers and readers over many messages, and
// sustained churn across the ring wrap.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use syncq::{Message, QueueError, SyncQueue};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(tag: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("sq_stress_{tag}_{n}_{}", std::process::id())
}

/// Small LCG for deterministic pseudo-random sleeps and sizes.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 32
    }
}

// Scenario: two writers and two readers race over 10,000 appends with
// random sleeps. Every participant receives every message (nobody
// self-screens), so all four observed sequences must be identical and in
// per-writer FIFO order, and the ring must end empty.
#[test]
fn two_writers_two_readers_race() {
    const QUOTA: usize = 5_000;
    const TOTAL: usize = 2 * QUOTA;

    let name = unique_name("race");
    SyncQueue::clear_storage(&name);

    // Register all four participants before any traffic so every handle
    // sees the full stream.
    let mut w1 = SyncQueue::create(&name, 4096).expect("create");
    w1.register_as("w1", false).expect("register w1");
    let mut w2 = SyncQueue::attach(&name).expect("attach");
    w2.register_as("w2", false).expect("register w2");
    let mut r1 = SyncQueue::attach(&name).expect("attach");
    r1.register_as("r1", false).expect("register r1");
    let mut r2 = SyncQueue::attach(&name).expect("attach");
    r2.register_as("r2", false).expect("register r2");

    fn record(log: &mut Vec<(Vec<u8>, Vec<u8>)>, msg: Message) {
        log.push((msg.sender, msg.body));
    }

    fn writer(mut q: SyncQueue, tag: &str, seed: u64) -> (SyncQueue, Vec<(Vec<u8>, Vec<u8>)>) {
        let mut rng = Lcg(seed);
        let mut log = Vec::with_capacity(TOTAL);
        let mut sent = 0usize;
        while sent < QUOTA || log.len() < TOTAL {
            if sent < QUOTA {
                let body = format!("{tag}-{sent}");
                match q.append("data", &body, Some(Duration::from_millis(10))) {
                    Ok(()) => sent += 1,
                    Err(QueueError::OutOfSpace { .. }) => {} // drain first, retry
                    Err(e) => panic!("append: {e}"),
                }
            }
            while let Some(msg) = q.try_pop().expect("pop") {
                record(&mut log, msg);
            }
            if sent == QUOTA && log.len() < TOTAL {
                if let Some(msg) = q.pop(Some(Duration::from_millis(100))).expect("pop") {
                    record(&mut log, msg);
                }
            }
            if rng.next() % 256 == 0 {
                thread::sleep(Duration::from_millis(rng.next() % 3));
            }
        }
        (q, log)
    }

    fn reader(mut q: SyncQueue, seed: u64) -> (SyncQueue, Vec<(Vec<u8>, Vec<u8>)>) {
        let mut rng = Lcg(seed);
        let mut log = Vec::with_capacity(TOTAL);
        while log.len() < TOTAL {
            match q.pop(Some(Duration::from_secs(5))).expect("pop") {
                Some(msg) => record(&mut log, msg),
                None => panic!("reader starved at {} messages", log.len()),
            }
            if rng.next() % 256 == 0 {
                thread::sleep(Duration::from_millis(rng.next() % 3));
            }
        }
        (q, log)
    }

    let tw1 = thread::spawn(move || writer(w1, "w1", 1));
    let tw2 = thread::spawn(move || writer(w2, "w2", 2));
    let tr1 = thread::spawn(move || reader(r1, 3));
    let tr2 = thread::spawn(move || reader(r2, 4));

    let (w1, log_w1) = tw1.join().unwrap();
    let (w2, log_w2) = tw2.join().unwrap();
    let (r1, log_r1) = tr1.join().unwrap();
    let (r2, log_r2) = tr2.join().unwrap();

    // Fan-out is total-ordered: every participant saw the same sequence.
    assert_eq!(log_r1.len(), TOTAL);
    assert_eq!(log_r1, log_r2);
    assert_eq!(log_r1, log_w1);
    assert_eq!(log_r1, log_w2);

    // Per-writer FIFO.
    for tag in ["w1", "w2"] {
        let bodies: Vec<&[u8]> = log_r1
            .iter()
            .filter(|(s, _)| s == tag.as_bytes())
            .map(|(_, b)| b.as_slice())
            .collect();
        assert_eq!(bodies.len(), QUOTA);
        for (i, body) in bodies.iter().enumerate() {
            assert_eq!(*body, format!("{tag}-{i}").as_bytes());
        }
    }

    // Everything consumed: the ring is empty and fully free.
    let stats = w1.stats().expect("stats");
    assert_eq!(stats.participants, 4);
    assert_eq!(stats.free, w1.body_len() as u64);
    assert_eq!(stats.head, stats.tail);
    assert_eq!(stats.serial, TOTAL as u64);

    for mut q in [w1, w2, r1, r2] {
        q.close().expect("close");
    }
    assert!(matches!(
        SyncQueue::attach(&name),
        Err(QueueError::NotFound(_))
    ));
}

// Sustained churn on a small ring: thousands of variable-sized messages
// force the tail through the wrap and the skip padding over and over.
#[test]
fn churn_across_the_wrap() {
    let name = unique_name("churn");
    SyncQueue::clear_storage(&name);

    let mut writer = SyncQueue::create(&name, 296).expect("create");
    writer.register_as("w", true).expect("register");
    let mut reader = SyncQueue::attach(&name).expect("attach");
    reader.register_as("r", true).expect("register");

    let body_len = writer.body_len() as u64;
    let mut rng = Lcg(42);

    for i in 0..10_000u32 {
        let size = (rng.next() % 98) as usize;
        let body: Vec<u8> = (0..size).map(|j| (i as usize + j) as u8).collect();

        writer.try_append("t", &body).expect("append");
        let msg = reader.try_pop().expect("pop").expect("message");
        assert_eq!(msg.body, body, "iteration {i}");
        assert!(writer.try_pop().expect("self pop").is_none());

        if i % 512 == 0 {
            let stats = writer.stats().expect("stats");
            assert_eq!(stats.free, body_len);
            assert_eq!(stats.head, stats.tail);
            assert!(stats.head < body_len);
        }
    }

    let stats = writer.stats().expect("stats");
    assert_eq!(stats.free, body_len);
    assert_eq!(stats.head, stats.tail);
}
