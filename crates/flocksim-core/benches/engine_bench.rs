use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use flocksim_core::{FlockConfig, FlockWorld, Predator, PredatorConfig};
use std::hint::black_box;

const STEPS_PER_ITER: u64 = 16;

fn build_world(count: usize, workers: usize) -> FlockWorld {
    let config = FlockConfig {
        rng_seed: Some(0xB01D),
        workers: Some(workers),
        ..FlockConfig::default()
    };
    FlockWorld::new(count, 1600.0, 1200.0, config).expect("bench world")
}

fn bench_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("flock_step");
    for &count in &[1_000usize, 5_000, 20_000] {
        group.throughput(Throughput::Elements(count as u64 * STEPS_PER_ITER));
        for &workers in &[1usize, 4] {
            let id = BenchmarkId::new(format!("workers_{workers}"), count);
            group.bench_function(id, |b| {
                let mut world = build_world(count, workers);
                b.iter(|| {
                    for i in 0..STEPS_PER_ITER {
                        let predator = (800.0 + (i as f32) * 3.0, 600.0);
                        world.step(black_box(predator)).expect("step");
                    }
                    black_box(world.tick())
                });
            });
        }
    }
    group.finish();
}

fn bench_hunt_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("hunt_loop");
    for &count in &[1_000usize, 5_000] {
        group.throughput(Throughput::Elements(count as u64 * STEPS_PER_ITER));
        group.bench_function(BenchmarkId::from_parameter(count), |b| {
            let mut world = build_world(count, 1);
            let mut predator =
                Predator::new(800.0, 600.0, PredatorConfig::default(), 0xCAFE).expect("predator");
            b.iter(|| {
                for _ in 0..STEPS_PER_ITER {
                    let outcome = predator.hunt(&mut world).expect("hunt");
                    if !outcome.eaten.is_empty() {
                        world.remove(&outcome.eaten).expect("remove");
                    }
                    world.step(predator.position()).expect("step");
                }
                black_box(world.count())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_step, bench_hunt_loop);
criterion_main!(benches);
