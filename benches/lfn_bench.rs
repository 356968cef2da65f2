use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use mesh_forest::prelude::*;
use std::sync::Arc;

/// A brick forest with a random sprinkle of refined leaves, 2:1 balanced.
fn random_forest(n: u64, level: u8, seed: u64) -> Arc<Forest> {
    let cmesh = CmeshBuilder::brick_2d(n, n, false, false).commit(&NoComm).unwrap();
    let mut builder = ForestBuilder::new();
    builder.set_cmesh(cmesh, SchemeSet::default_schemes()).set_level(level);
    let from = builder.commit(&NoComm).unwrap();

    let mut rng = SmallRng::seed_from_u64(seed);
    let markers = (0..from.local_num_elements())
        .map(|_| i8::from(rng.gen_bool(0.2)))
        .collect();
    let mut builder = ForestBuilder::new();
    builder.set_adapt_batch(from, markers).set_balance(true).set_ghost(true);
    builder.commit(&NoComm).unwrap()
}

fn bench_leaf_face_neighbors(c: &mut Criterion) {
    let mut group = c.benchmark_group("leaf_face_neighbors");
    for &(n, level) in &[(2u64, 3u8), (4, 4)] {
        let forest = random_forest(n, level, 42);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{n}x{n}@{level}")),
            &forest,
            |b, forest| {
                b.iter(|| {
                    let mut total = 0usize;
                    for (t, i, _) in forest.iter_elements() {
                        for face in 0..4 {
                            total += forest.leaf_face_neighbors(t, i, face, true).unwrap().len();
                        }
                    }
                    black_box(total)
                })
            },
        );
    }
    group.finish();
}

fn bench_balance(c: &mut Criterion) {
    c.bench_function("balance_4x4_level4", |b| {
        b.iter(|| black_box(random_forest(4, 4, 7).local_num_elements()))
    });
}

criterion_group!(benches, bench_leaf_face_neighbors, bench_balance);
criterion_main!(benches);
