use criterion::{black_box, criterion_group, criterion_main, Criterion};
use planar_tin::{Thresholds, Triangulator, Vertex};
use rand::{Rng, SeedableRng};

fn random_vertices(n: usize, extent: f64, seed: u64) -> Vec<Vertex> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let x = rng.gen_range(0.0..extent);
            let y = rng.gen_range(0.0..extent);
            Vertex::new(x, y, 0.0, i as i32)
        })
        .collect()
}

fn bench_incremental_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("Triangulator::add (one at a time)");
    for &n in &[100usize, 1_000, 10_000] {
        group.bench_function(format!("{n}"), |b| {
            let vertices = random_vertices(n, 1_000.0, 42);
            b.iter(|| {
                let thresholds = Thresholds::from_nominal_spacing(1_000.0 / (n as f64).sqrt());
                let mut tin = Triangulator::with_thresholds(thresholds);
                for v in &vertices {
                    tin.add(*v).unwrap();
                }
                black_box(tin.get_maximum_edge_allocation_index());
            });
        });
    }
    group.finish();
}

fn bench_batch_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("Triangulator::add_batch (Hilbert-presorted)");
    for &n in &[100usize, 1_000, 10_000, 100_000] {
        group.bench_function(format!("{n}"), |b| {
            let vertices = random_vertices(n, 1_000.0, 7);
            b.iter(|| {
                let thresholds = Thresholds::from_nominal_spacing(1_000.0 / (n as f64).sqrt());
                let mut tin = Triangulator::with_thresholds(thresholds);
                let committed = tin.add_batch(vertices.clone(), None).unwrap();
                black_box(committed);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_incremental_insert, bench_batch_insert);
criterion_main!(benches);
