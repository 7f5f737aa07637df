use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use comm_pattern::prelude::*;

/// Rank 0 owns `n` entities; rank 1 ghosts a random half of them.
fn layout(rank: usize, n: usize, seed: u64) -> (Vec<u64>, Vec<usize>) {
    let mut rng = SmallRng::seed_from_u64(seed);
    if rank == 0 {
        return ((0..n as u64).collect(), vec![0; n]);
    }
    let mut ghosts: Vec<u64> = (0..n as u64).collect();
    ghosts.shuffle(&mut rng);
    ghosts.truncate(n / 2);
    let owners = vec![0; ghosts.len()];
    (ghosts, owners)
}

fn run_pair<F>(f: F)
where
    F: Fn(&RayonComm) + Sync,
{
    let world = RayonComm::world(2);
    let f = &f;
    std::thread::scope(|s| {
        for comm in &world {
            s.spawn(move || f(comm));
        }
    });
}

fn bench_setup(c: &mut Criterion) {
    let mut group = c.benchmark_group("setup");
    for &n in &[1_000usize, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                run_pair(|comm| {
                    let (gids, owners) = layout(comm.rank(), n, 7);
                    let mut pattern = CommPattern::new(comm, CommPatternConfig::default());
                    pattern
                        .setup_with(WrappedField::new("gid", 1, gids).unwrap(), &owners)
                        .unwrap();
                });
            });
        });
    }
    group.finish();
}

fn bench_synchronize(c: &mut Criterion) {
    let mut group = c.benchmark_group("synchronize");
    for &stride in &[1usize, 8] {
        group.bench_with_input(BenchmarkId::new("stride", stride), &stride, |b, &stride| {
            b.iter(|| {
                run_pair(|comm| {
                    let (gids, owners) = layout(comm.rank(), 5_000, 11);
                    let n = gids.len();
                    let mut pattern = CommPattern::new(comm, CommPatternConfig::default());
                    pattern
                        .setup_with(WrappedField::new("gid", 1, gids).unwrap(), &owners)
                        .unwrap();
                    let mut rng = SmallRng::seed_from_u64(comm.rank() as u64);
                    let values: Vec<f64> = (0..n * stride).map(|_| rng.r#gen()).collect();
                    pattern
                        .register_field(WrappedField::new("u", stride, values).unwrap())
                        .unwrap();
                    for _ in 0..10 {
                        pattern.field_mut("u").unwrap().mark_dirty();
                        pattern.synchronize("u").unwrap();
                    }
                });
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_setup, bench_synchronize);
criterion_main!(benches);
