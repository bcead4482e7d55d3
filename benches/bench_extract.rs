use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use planeseg::cloud::PointCloud;
use planeseg::normals::estimate_normals;
use planeseg::segmentation::{extract_planes, ExtractParams};
use planeseg::spatial::IndexedCloud;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Floor, wall and uniform clutter; `n` points on each plane and `n / 4`
/// clutter points.
fn room_corner(n: usize, seed: u64) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(seed);
    let side = (n as f32).sqrt() * 0.1;
    let mut pts = Vec::with_capacity(2 * n + n / 4);
    for _ in 0..n {
        pts.push([
            rng.gen_range(0.05f32..side),
            rng.gen_range(0.0f32..side),
            rng.gen_range(-0.005f32..0.005),
        ]);
    }
    for _ in 0..n {
        pts.push([
            rng.gen_range(-0.005f32..0.005),
            rng.gen_range(0.0f32..side),
            rng.gen_range(0.05f32..side),
        ]);
    }
    for _ in 0..n / 4 {
        pts.push([
            rng.gen_range(0.0f32..side),
            rng.gen_range(0.0f32..side),
            rng.gen_range(0.0f32..side),
        ]);
    }
    PointCloud::from_points(&pts)
}

fn bench_extract_planes(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract_planes");
    group.sample_size(10);
    let params = ExtractParams::default();
    for size in [5_000, 20_000] {
        let cloud = room_corner(size, 42);
        let normals = estimate_normals(&cloud, params.k_neighbors);
        let index = IndexedCloud::new(&cloud);
        group.bench_with_input(BenchmarkId::new("planeseg", size), &size, |b, _| {
            b.iter(|| extract_planes(&index, &normals, &params))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_extract_planes);
criterion_main!(benches);
