// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Message transfer benchmarks.
//
// Run with:
//   cargo bench --bench transfer
//
// Groups:
//   transfer      — one append + one pop per iteration, writer and reader
//                   registered on the same region (the reader's pop plus
//                   the writer's screened self-read reclaim the slot, so
//                   the ring returns to empty every iteration)
//   append_drain  — a burst of appends followed by an iterator drain
//
// Body sizes sweep powers of two, the shape of the original transfer-time
// measurement.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use syncq::SyncQueue;

const SIZES: &[(&str, usize)] = &[
    ("16", 16),
    ("256", 256),
    ("4096", 4096),
    ("16384", 16 * 1024),
];

/// Region comfortably larger than any burst so space waits never skew
/// the measurement.
const REGION_SIZE: usize = 512 * 1024;

fn queue_pair(tag: &str) -> (SyncQueue, SyncQueue) {
    let name = format!("syncq_bench_{tag}_{}", std::process::id());
    SyncQueue::clear_storage(&name);
    let mut writer = SyncQueue::create(&name, REGION_SIZE).expect("create");
    writer.register_as("origin", true).expect("register writer");
    let mut reader = SyncQueue::attach(&name).expect("attach");
    reader.register_as("echo", true).expect("register reader");
    (writer, reader)
}

fn bench_transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("transfer");

    for &(label, size) in SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(label), &size, |b, &sz| {
            let (mut writer, mut reader) = queue_pair(&format!("t{label}"));
            let body = vec![0xA5u8; sz];
            b.iter(|| {
                writer.try_append("data", &body).expect("append");
                let msg = reader.try_pop().expect("pop").expect("message");
                // The writer's own (screened) read releases the slot.
                assert!(writer.try_pop().expect("self pop").is_none());
                black_box(msg)
            });
        });
    }

    group.finish();
}

fn bench_append_drain(c: &mut Criterion) {
    const BURST: usize = 16;

    let mut group = c.benchmark_group("append_drain");

    for &(label, size) in SIZES {
        group.throughput(Throughput::Bytes((size * BURST) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(label), &size, |b, &sz| {
            let (mut writer, mut reader) = queue_pair(&format!("d{label}"));
            let body = vec![0x5Au8; sz];
            b.iter(|| {
                for _ in 0..BURST {
                    writer.try_append("data", &body).expect("append");
                }
                let mut received = 0usize;
                for msg in reader.drain() {
                    received += msg.expect("pop").body.len();
                }
                for _ in writer.drain() {}
                black_box(received)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_transfer, bench_append_drain);
criterion_main!(benches);
