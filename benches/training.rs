use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use farecast::optimizer::{CandidateModelTuner, SearchStrategy, TunerConfig};
use farecast::partition::{Partitioner, PartitionerConfig};
use farecast::selection::{Candidate, RandomForestCandidate, RidgeCandidate};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;

fn create_regression_data(n_rows: usize, n_features: usize) -> (Array2<f64>, Array1<f64>) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
    let x = Array2::from_shape_fn((n_rows, n_features), |(i, _)| {
        // four loose segments on every axis
        (i % 4) as f64 * 5.0 + rng.gen::<f64>()
    });
    let y = x.rows().into_iter().map(|r| r.sum() + rng.gen::<f64>() * 0.1).collect();
    (x, y)
}

fn bench_partitioning(c: &mut Criterion) {
    let mut group = c.benchmark_group("partitioning");
    group.sample_size(10);

    for n_rows in [500, 2000, 5000].iter() {
        let (x, _) = create_regression_data(*n_rows, 8);
        let partitioner = Partitioner::new(PartitionerConfig::new());

        group.bench_with_input(BenchmarkId::new("dispersion_curve", n_rows), &x, |b, x| {
            b.iter(|| partitioner.dispersion_curve(black_box(x)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("assign_k4", n_rows), &x, |b, x| {
            b.iter(|| partitioner.assign(black_box(x), 4).unwrap())
        });
    }

    group.finish();
}

fn bench_tuning(c: &mut Criterion) {
    let mut group = c.benchmark_group("tuning");
    group.sample_size(10);

    let (x, y) = create_regression_data(1000, 8);
    let tuner = CandidateModelTuner::new(
        TunerConfig::new().with_strategy(SearchStrategy::Random { n_iter: 4 }),
    );
    let candidates: Vec<Box<dyn Candidate>> = vec![Box::new(RidgeCandidate), Box::new(RandomForestCandidate)];

    for candidate in &candidates {
        group.bench_function(BenchmarkId::new("tune", candidate.name()), |b| {
            b.iter(|| tuner.tune(candidate.as_ref(), black_box(&x), black_box(&y)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_partitioning, bench_tuning);
criterion_main!(benches);
