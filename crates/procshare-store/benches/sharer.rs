//! Cached reads versus locked writes.
//!
//! Run with:
//! ```bash
//! cargo bench --bench sharer
//! ```

#![allow(clippy::expect_used)]

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use procshare_store::{DataSharer, SharerConfig};
use std::hint::black_box;

fn bench_sharer(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("Failed to create benchmark directory");
    let sharer = DataSharer::open(SharerConfig::new(dir.path(), "bench"))
        .expect("Failed to open benchmark store");
    sharer
        .put_string("device_id", "0f4c2a8e-7d1b-4b8e-9a37-5d2c6e1f0b94")
        .expect("Failed to seed store");

    let mut group = c.benchmark_group("sharer");

    group.bench_function(BenchmarkId::new("get_string", "cached"), |b| {
        b.iter(|| black_box(sharer.get_string(black_box("device_id"), "")));
    });

    group.bench_function(BenchmarkId::new("get_and_increment", "locked"), |b| {
        b.iter(|| {
            black_box(
                sharer
                    .get_and_increment(black_box("counter"), 1)
                    .expect("increment"),
            )
        });
    });

    group.bench_function(BenchmarkId::new("put_string", "update"), |b| {
        b.iter(|| {
            sharer
                .put_string(black_box("session_id"), black_box("s-1"))
                .expect("put");
        });
    });

    let other = DataSharer::open(SharerConfig::new(dir.path(), "bench"))
        .expect("Failed to open second handle");
    group.bench_function(BenchmarkId::new("get_string", "invalidated"), |b| {
        b.iter(|| {
            other.put_boolean("flag", true).expect("put");
            black_box(sharer.get_string(black_box("device_id"), ""))
        });
    });

    group.finish();
}

criterion_group!(benches, bench_sharer);
criterion_main!(benches);
