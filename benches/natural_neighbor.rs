use criterion::{black_box, criterion_group, criterion_main, Criterion};
use planar_tin::natural_neighbor::{NaturalNeighbor, ZValuator};
use planar_tin::{Thresholds, Triangulator, Vertex};
use rand::{Rng, SeedableRng};

fn built_mesh(n: usize, extent: f64) -> Triangulator {
    let mut rng = rand::rngs::StdRng::seed_from_u64(11);
    let thresholds = Thresholds::from_nominal_spacing(extent / (n as f64).sqrt());
    let mut tin = Triangulator::with_thresholds(thresholds);
    let vertices: Vec<Vertex> = (0..n)
        .map(|i| {
            let x = rng.gen_range(0.0..extent);
            let y = rng.gen_range(0.0..extent);
            let z = x + y;
            Vertex::new(x, y, z, i as i32)
        })
        .collect();
    tin.add_batch(vertices, None).unwrap();
    tin
}

fn bench_interpolate(c: &mut Criterion) {
    let mut group = c.benchmark_group("NaturalNeighbor::interpolate");
    for &n in &[100usize, 1_000, 10_000] {
        let tin = built_mesh(n, 1_000.0);
        let mut rng = rand::rngs::StdRng::seed_from_u64(99);
        let queries: Vec<(f64, f64)> = (0..1_000)
            .map(|_| (rng.gen_range(0.0..1_000.0), rng.gen_range(0.0..1_000.0)))
            .collect();

        group.bench_function(format!("{n} vertices, 1000 queries"), |b| {
            b.iter(|| {
                let nn = NaturalNeighbor::new(&tin);
                for &(x, y) in &queries {
                    black_box(nn.interpolate(x, y, &ZValuator));
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_interpolate);
criterion_main!(benches);
