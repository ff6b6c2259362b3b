// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Region handle tests: create, attach, zero-fill, size recovery, cleanup.

use std::sync::atomic::{AtomicUsize, Ordering};

use syncq::{layout, QueueError, SyncQueue};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(tag: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("sq_region_{tag}_{n}_{}", std::process::id())
}

#[test]
fn create_initialises_counters() {
    let name = unique_name("init");
    SyncQueue::clear_storage(&name);

    let q = SyncQueue::create(&name, 256).expect("create");
    let stats = q.stats().expect("stats");
    assert_eq!(stats.participants, 0);
    assert_eq!(stats.head, 0);
    assert_eq!(stats.tail, 0);
    assert_eq!(stats.serial, 0);
    assert_eq!(stats.free, q.body_len() as u64);
    assert_eq!(q.body_len(), 256 - layout::CTRL_SIZE);
}

#[test]
fn create_twice_fails() {
    let name = unique_name("twice");
    SyncQueue::clear_storage(&name);

    let _q = SyncQueue::create(&name, 256).expect("create");
    assert!(matches!(
        SyncQueue::create(&name, 256),
        Err(QueueError::Io(_))
    ));
}

#[test]
fn attach_recovers_size() {
    let name = unique_name("attach");
    SyncQueue::clear_storage(&name);

    let creator = SyncQueue::create(&name, 512).expect("create");
    let attached = SyncQueue::attach(&name).expect("attach");
    assert_eq!(attached.body_len(), creator.body_len());
}

#[test]
fn attach_rounds_like_create() {
    // An odd creation size is rounded to the counter width; the attacher
    // must land on the same body length or the two would disagree on the
    // ring geometry.
    let name = unique_name("round");
    SyncQueue::clear_storage(&name);

    let creator = SyncQueue::create(&name, 251).expect("create");
    let attached = SyncQueue::attach(&name).expect("attach");
    assert_eq!(creator.body_len(), 256 - layout::CTRL_SIZE);
    assert_eq!(attached.body_len(), creator.body_len());
}

#[test]
fn attach_missing_name_is_not_found() {
    let name = unique_name("missing");
    SyncQueue::clear_storage(&name);

    match SyncQueue::attach(&name) {
        Err(QueueError::NotFound(n)) => assert_eq!(n, name),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[test]
fn size_bounds_are_enforced() {
    let name = unique_name("bounds");
    SyncQueue::clear_storage(&name);

    assert!(matches!(
        SyncQueue::create(&name, layout::MIN_REGION_SIZE - 1),
        Err(QueueError::InvalidRegionSize { .. })
    ));
    // The lower bound itself is fine.
    let q = SyncQueue::create(&name, layout::MIN_REGION_SIZE).expect("min size");
    drop(q);
}

#[test]
fn default_size_is_page_sized() {
    let name = unique_name("page");
    SyncQueue::clear_storage(&name);

    let q = SyncQueue::create_default(&name).expect("create");
    assert_eq!(
        q.body_len(),
        layout::default_region_size() - layout::CTRL_SIZE
    );
}

#[test]
fn last_close_unlinks() {
    let name = unique_name("unlink");
    SyncQueue::clear_storage(&name);

    let mut a = SyncQueue::create(&name, 256).expect("create");
    a.register_as("a", true).expect("register");
    let mut b = SyncQueue::attach(&name).expect("attach");
    b.register_as("b", true).expect("register");

    a.close().expect("close a");
    // One participant left: the region must still be attachable.
    let c = SyncQueue::attach(&name).expect("attach while live");
    drop(c);

    b.close().expect("close b");
    assert!(matches!(
        SyncQueue::attach(&name),
        Err(QueueError::NotFound(_))
    ));
}
