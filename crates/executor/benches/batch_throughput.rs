//! Batch throughput benchmark
//!
//! Measures the drive loop end to end: submit a batch, replay failures,
//! collect results and shut the pool down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

use replay_executor::{ExecutorConfig, RetryStrategy, RetryingExecutor, Task, TaskError};

/// Task that fails on its first call when `flaky` is set
fn task(value: u64, flaky: bool) -> impl Task<u64> {
    let failed = Arc::new(AtomicBool::new(!flaky));
    move || {
        let failed = Arc::clone(&failed);
        async move {
            if !failed.swap(true, Ordering::Relaxed) {
                return Err(TaskError::retryable("transient"));
            }
            Ok(value)
        }
    }
}

fn executor(pool_size: usize, strategy: RetryStrategy) -> RetryingExecutor {
    let config = ExecutorConfig::default()
        .with_pool_size(pool_size)
        .with_strategy(strategy)
        .with_poll_interval(Duration::from_millis(1));
    RetryingExecutor::new(config).unwrap()
}

/// Batches where every task succeeds on the first attempt (baseline)
fn bench_no_failures(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("batch/no_failures");

    for batch_size in [10u64, 100, 1000] {
        group.throughput(Throughput::Elements(batch_size));
        group.bench_with_input(
            BenchmarkId::new("tasks", batch_size),
            &batch_size,
            |b, &batch_size| {
                let executor = executor(8, RetryStrategy::Requeue);
                b.to_async(&rt).iter(|| async {
                    let values = executor
                        .run((0..batch_size).map(|n| task(n, false)))
                        .await
                        .unwrap();
                    assert_eq!(values.len() as u64, batch_size);
                });
            },
        );
    }

    group.finish();
}

/// Every other task fails once, compared across retry strategies
fn bench_replay(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("batch/replay");
    let batch_size = 500u64;
    group.throughput(Throughput::Elements(batch_size));

    for strategy in [RetryStrategy::Requeue, RetryStrategy::InPlace] {
        group.bench_with_input(
            BenchmarkId::new("strategy", strategy),
            &strategy,
            |b, &strategy| {
                let executor = executor(8, strategy);
                b.to_async(&rt).iter(|| async {
                    let report = executor
                        .run_report((0..batch_size).map(|n| task(n, n % 2 == 0)))
                        .await
                        .unwrap();
                    assert_eq!(report.retries(), batch_size / 2);
                });
            },
        );
    }

    group.finish();
}

/// Throughput as slot count grows
fn bench_pool_size(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("batch/pool_size");
    let batch_size = 1000u64;
    group.throughput(Throughput::Elements(batch_size));

    for pool_size in [1usize, 4, 16, 64] {
        group.bench_with_input(
            BenchmarkId::new("slots", pool_size),
            &pool_size,
            |b, &pool_size| {
                let executor = executor(pool_size, RetryStrategy::Requeue);
                b.to_async(&rt).iter(|| async {
                    executor
                        .run((0..batch_size).map(|n| task(n, n % 10 == 0)))
                        .await
                        .unwrap()
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_no_failures, bench_replay, bench_pool_size);

criterion_main!(benches);
