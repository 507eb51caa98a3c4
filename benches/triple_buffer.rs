// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Triple-buffer round-trip benchmarks.
//
// Groups:
//   write            — SharedRegion::write at three payload sizes
//   write_then_wait  — write followed by the consumer-side wait_and_snapshot

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use shmcast::SharedRegion;

const SMALL: usize = 64;
const MEDIUM: usize = 1024;
const LARGE: usize = 65536;

const SIZES: &[(&str, usize)] = &[("small", SMALL), ("medium", MEDIUM), ("large", LARGE)];

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{}_{}", std::process::id(), n)
}

fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("write");
    for &(label, size) in SIZES {
        let region = SharedRegion::create(&unique_name("bench_write"), size).unwrap();
        let payload = vec![0xABu8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(label), &payload, |b, payload| {
            b.iter(|| region.write(black_box(payload)).unwrap());
        });
    }
    group.finish();
}

fn bench_write_then_wait(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_then_wait");
    for &(label, size) in SIZES {
        let name = unique_name("bench_wait");
        let publisher = SharedRegion::create(&name, size).unwrap();
        let subscriber = SharedRegion::attach(&name, size).unwrap();
        let payload = vec![0xCDu8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(label), &payload, |b, payload| {
            b.iter(|| {
                publisher.write(black_box(payload)).unwrap();
                let outcome = subscriber
                    .wait_and_snapshot(Duration::from_secs(1))
                    .unwrap();
                black_box(outcome);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_write, bench_write_then_wait);
criterion_main!(benches);
