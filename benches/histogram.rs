use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use simlocality::{Axis, Histogram, IrregularAxis, RegularAxis, ThreadLocalHistogram};
use std::sync::Arc;

const N_VALUES: usize = 1_000_000;

fn values() -> Vec<f64> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(3);
    (0..N_VALUES).map(|_| rng.gen_range(0.0..10.0)).collect()
}

fn benchmark_binning(c: &mut Criterion) {
    let regular = RegularAxis::new(100, 0.0, 10.0).unwrap();
    let edges: Vec<f64> = (0..=100).map(|i| (i as f64 / 10.0).powi(2) / 10.0).collect();
    let irregular = IrregularAxis::new(edges).unwrap();
    let values = values();

    c.bench_function("regular_axis_bin_1m", |b| {
        b.iter(|| values.iter().map(|&v| regular.bin(black_box(v))).sum::<usize>())
    });
    c.bench_function("irregular_axis_bin_1m", |b| {
        b.iter(|| values.iter().map(|&v| irregular.bin(black_box(v))).sum::<usize>())
    });
}

fn benchmark_thread_local(c: &mut Criterion) {
    let histogram = Histogram::new(vec![
        Arc::new(RegularAxis::new(100, 0.0, 10.0).unwrap()) as Arc<dyn Axis>,
        Arc::new(RegularAxis::new(10, 0.0, 10.0).unwrap()),
    ])
    .unwrap();
    let values = values();

    c.bench_function("thread_local_accumulate_reduce_1m", |b| {
        b.iter(|| {
            let mut locals = ThreadLocalHistogram::new(&histogram);
            values.par_iter().for_each(|&v| {
                locals.accumulate(&[v, 10.0 - v]).unwrap();
            });
            let mut merged = histogram.empty_like();
            merged.reduce_over_threads(&mut locals).unwrap();
            merged
        })
    });
}

criterion_group!(benches, benchmark_binning, benchmark_thread_local);
criterion_main!(benches);
