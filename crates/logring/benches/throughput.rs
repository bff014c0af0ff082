//! Ring push/drain throughput.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use logring::Ring;

fn bench_push_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_push_drain");

    for &batch in &[1usize, 32, 256] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            let ring = Ring::with_capacity(1024).unwrap();
            let mut out = Vec::with_capacity(batch);
            b.iter(|| {
                for i in 0..batch {
                    ring.push(i as u64).unwrap();
                }
                out.clear();
                ring.drain_into(&mut out, batch)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_push_drain);
criterion_main!(benches);
