use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use strata_io::{ByteRange, IntervalTree, merge_ranges, pack_range_headers};

/// `count` reads of `len` bytes spread with a fixed stride, like the baskets
/// of an event file.
fn scattered(count: u64, stride: u64, len: u64) -> Vec<ByteRange> {
    (0..count)
        .map(|i| ByteRange::new(i * stride, i * stride + len - 1))
        .collect()
}

fn bench_merge_ranges(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_ranges");

    for count in [16u64, 256, 4096].iter() {
        let ranges = scattered(*count, 3000, 1000);
        for window in [0u64, 2000].iter() {
            group.bench_with_input(
                BenchmarkId::new(format!("window_{window}"), count),
                &ranges,
                |b, ranges| b.iter(|| black_box(merge_ranges(black_box(ranges), *window))),
            );
        }
    }

    group.finish();
}

fn bench_pack_headers(c: &mut Criterion) {
    let mut group = c.benchmark_group("pack_range_headers");

    for count in [16u64, 256, 4096].iter() {
        let ranges = scattered(*count, 1_000_000, 4096);
        group.bench_with_input(BenchmarkId::new("budget_3900", count), &ranges, |b, ranges| {
            b.iter(|| black_box(pack_range_headers(black_box(ranges), 3900)))
        });
    }

    group.finish();
}

fn bench_interval_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("interval_tree");

    let slots = scattered(4096, 500, 1000);
    let tree = IntervalTree::new(slots.iter().copied().enumerate().map(|(i, r)| (r, i)));
    group.bench_function("build_4096", |b| {
        b.iter(|| IntervalTree::new(black_box(&slots).iter().copied().enumerate().map(|(i, r)| (r, i))))
    });
    group.bench_function("query_64k_chunk", |b| {
        b.iter(|| {
            let mut hits = 0usize;
            tree.for_each_overlapping(ByteRange::new(100_000, 165_535), |_, _| hits += 1);
            black_box(hits)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_merge_ranges, bench_pack_headers, bench_interval_tree);
criterion_main!(benches);
