use criterion::{black_box, criterion_group, criterion_main, Criterion};
use jobq_rpc::{reduce_or, split_long_array};

fn bench_split_long_array(c: &mut Criterion) {
    let ids: Vec<String> = (0..10_000).map(|n| format!("job-{n:05}")).collect();

    c.bench_function("split_long_array_10k_by_256", |b| {
        b.iter(|| {
            let chunks = split_long_array(black_box(&ids), 256).unwrap();
            black_box(chunks.len())
        })
    });
}

fn bench_reduce_or(c: &mut Criterion) {
    c.bench_function("reduce_or_1000_results", |b| {
        b.iter(|| {
            let reduced = reduce_or::<(), _>(|result| {
                black_box(result).ok();
            }, 1000)
            .unwrap();
            for n in 0..1000 {
                reduced.invoke(Ok(n == 999)).unwrap();
            }
        })
    });
}

criterion_group!(benches, bench_split_long_array, bench_reduce_or);
criterion_main!(benches);
