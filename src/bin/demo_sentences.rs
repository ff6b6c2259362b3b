// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Demonstration: several workers coordinate through one synchronisation
// queue. The parent broadcasts a start signal, the workers exchange
// generated sentences for a few seconds, then the parent broadcasts stop
// and every participant drains and closes.
//
// Usage:
//   demo_sentences [workers] [seconds]

use std::thread;
use std::time::Duration;

use syncq::SyncQueue;

const QUEUE_NAME: &str = "syncq-demo";
const QUEUE_SIZE: usize = 512;

const DETERMINERS: &[&str] = &["a", "the", "your", "my", "someone's", "no one's"];
const NOUNS: &[&str] = &["dog", "cat", "computer", "castle", "pear", "shire", "nose"];
const VERBS: &[&str] = &["ate", "married", "fled", "hid", "shared", "worried", "satisfied"];

/// Small LCG so the demo needs no rand dependency.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 32
    }

    fn pick<'a>(&mut self, words: &[&'a str]) -> &'a str {
        words[self.next() as usize % words.len()]
    }
}

fn sentence(rng: &mut Lcg) -> String {
    format!(
        "{} {} {} {} {}.",
        rng.pick(DETERMINERS),
        rng.pick(NOUNS),
        rng.pick(VERBS),
        rng.pick(DETERMINERS),
        rng.pick(NOUNS),
    )
}

fn worker(index: usize) {
    let name = format!("worker-{index}");
    let mut q = SyncQueue::attach(QUEUE_NAME).expect("attach");
    q.register_as(&name, true).expect("register");
    println!("{name}: joined {q:?}");

    // Block until the parent releases everyone.
    let start = q.pop(None).expect("pop start").expect("start signal");
    assert_eq!(start.msg_type, b"control");
    println!("{name}: received start signal");

    let mut rng = Lcg(0x9e3779b97f4a7c15 ^ index as u64);
    'run: loop {
        thread::sleep(Duration::from_millis(20 + rng.next() % 200));

        // Contribute a sentence; tolerate a briefly full queue.
        if q.append("sentence", sentence(&mut rng), Some(Duration::from_millis(500)))
            .is_err()
        {
            println!("{name}: queue full, write skipped");
        }

        // Timed read of whatever the others produced.
        for msg in q.drain_blocking(Some(Duration::from_millis(200))) {
            let (sender, msg_type, body) = msg.expect("pop").decode().expect("utf-8");
            match msg_type.as_str() {
                "control" if body == "stop" => {
                    println!("{name}: received stop signal");
                    break 'run;
                }
                "sentence" => println!("{name}: read \"{body}\" from {sender}"),
                _ => {}
            }
        }
    }

    q.close().expect("close");
}

fn main() {
    let mut args = std::env::args().skip(1);
    let workers: usize = args
        .next()
        .and_then(|a| a.parse().ok())
        .unwrap_or_else(|| thread::available_parallelism().map_or(4, |n| n.get()));
    let seconds: u64 = args.next().and_then(|a| a.parse().ok()).unwrap_or(5);

    SyncQueue::clear_storage(QUEUE_NAME);
    let mut q = SyncQueue::create(QUEUE_NAME, QUEUE_SIZE).expect("create");
    q.register_as("parent", true).expect("register parent");
    // The parent only referees; sentences are worker traffic.
    q.screen_type("sentence");

    let handles: Vec<_> = (0..workers).map(|i| thread::spawn(move || worker(i))).collect();

    // Everyone must be registered before start is appended, or a late
    // joiner would block forever waiting for a signal it cannot see.
    while q.stats().expect("stats").participants < workers as u64 + 1 {
        thread::sleep(Duration::from_millis(10));
    }
    println!("parent: releasing {workers} workers for {seconds}s");
    q.append("control", "start", None).expect("start");

    // The parent referees: its pending read pins every sentence until it
    // drains, so keep the queue clear while the workers chat.
    let deadline = std::time::Instant::now() + Duration::from_secs(seconds);
    while std::time::Instant::now() < deadline {
        for _ in q.drain() {}
        thread::sleep(Duration::from_millis(100));
    }
    q.append("control", "stop", Some(Duration::from_secs(30)))
        .expect("stop");

    // Keep the queue flowing while the workers wind down.
    while handles.iter().any(|h| !h.is_finished()) {
        for _ in q.drain() {}
        thread::sleep(Duration::from_millis(10));
    }
    for h in handles {
        h.join().unwrap();
    }

    let stats = q.stats().expect("stats");
    println!("parent: final counters {stats:?}");
    q.close().expect("close");
}
