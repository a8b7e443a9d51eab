use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use grit_pack::delta::{apply::apply, compute::compute};

fn similar_pair(len: usize) -> (Vec<u8>, Vec<u8>) {
    let base: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
    let mut target = base.clone();
    for i in (0..len).step_by(997) {
        target[i] ^= 0x5a;
    }
    (base, target)
}

fn bench_compute(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta_compute");
    for len in [4 * 1024, 64 * 1024, 512 * 1024] {
        let (base, target) = similar_pair(len);
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_function(format!("{}k", len / 1024), |b| {
            b.iter(|| compute(black_box(&base), black_box(&target)))
        });
    }
    group.finish();
}

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta_apply");
    for len in [4 * 1024, 64 * 1024, 512 * 1024] {
        let (base, target) = similar_pair(len);
        let delta = compute(&base, &target);
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_function(format!("{}k", len / 1024), |b| {
            b.iter(|| apply(black_box(&base), black_box(&delta)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compute, bench_apply);
criterion_main!(benches);
