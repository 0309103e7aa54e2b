//! Interpreter benchmark suite for effectum.
//!
//! Benchmarks the cost of running effect descriptions end to end:
//! - Deep flat_map chains (run-loop step cost)
//! - Error recovery through fold frames
//! - Fork/join round trips
//! - Parallel `all` with different concurrency bounds
//! - Race with an immediately losing candidate
//!
//! Each iteration includes a `run_sync` round trip, so the numbers are upper
//! bounds on per-step cost.

#![allow(missing_docs)]
#![allow(clippy::semicolon_if_nothing_returned)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use effectum::{Concurrency, Effect, Never, Runtime, RuntimeBuilder};
use std::time::Duration;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn bench_runtime() -> Runtime {
    RuntimeBuilder::new()
        .worker_threads(4)
        .thread_name_prefix("effectum-bench")
        .build()
        .expect("failed to build bench runtime")
}

fn chain(depth: u64) -> Effect<u64, Never> {
    (0..depth).fold(Effect::succeed(0), |acc, _| {
        acc.flat_map(|n| Effect::succeed(n + 1))
    })
}

// =============================================================================
// SEQUENTIAL
// =============================================================================

fn bench_flat_map_chain(c: &mut Criterion) {
    let runtime = bench_runtime();
    let mut group = c.benchmark_group("flat_map_chain");
    for depth in [10u64, 100, 1_000, 10_000] {
        let program = chain(depth);
        group.throughput(Throughput::Elements(depth));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &program, |b, program| {
            b.iter(|| black_box(runtime.run_sync(program.clone())))
        });
    }
    group.finish();
}

fn bench_error_recovery(c: &mut Criterion) {
    let runtime = bench_runtime();
    let program = (0..100).fold(Effect::<u32, String>::succeed(0), |acc, _| {
        acc.flat_map(|n| Effect::fail(format!("{n}")))
            .catch_all(|e| Effect::succeed(e.len() as u32))
    });
    c.bench_function("catch_all_x100", |b| {
        b.iter(|| black_box(runtime.run_sync(program.clone())))
    });
}

// =============================================================================
// CONCURRENCY
// =============================================================================

fn bench_fork_join(c: &mut Criterion) {
    let runtime = bench_runtime();
    let program = Effect::<u32, Never>::succeed(1)
        .fork::<Never>()
        .flat_map(|fiber| fiber.join());
    c.bench_function("fork_join", |b| {
        b.iter(|| black_box(runtime.run_sync(program.clone())))
    });
}

fn bench_parallel_all(c: &mut Criterion) {
    let runtime = bench_runtime();
    let mut group = c.benchmark_group("parallel_all_100");
    for (name, concurrency) in [
        ("sequential", Concurrency::Sequential),
        ("bounded_8", Concurrency::Bounded(8)),
        ("unbounded", Concurrency::Unbounded),
    ] {
        let program =
            Effect::all_with((0..100u32).map(|n| Effect::<u32, Never>::succeed(n)), concurrency);
        group.bench_function(name, |b| {
            b.iter(|| black_box(runtime.run_sync(program.clone())))
        });
    }
    group.finish();
}

fn bench_race(c: &mut Criterion) {
    let runtime = bench_runtime();
    let program = Effect::<u32, Never>::succeed(1)
        .race(Effect::<(), Never>::sleep(Duration::from_secs(60)).as_value(2));
    c.bench_function("race_immediate_winner", |b| {
        b.iter(|| black_box(runtime.run_sync(program.clone())))
    });
}

criterion_group!(
    benches,
    bench_flat_map_chain,
    bench_error_recovery,
    bench_fork_join,
    bench_parallel_all,
    bench_race
);
criterion_main!(benches);
