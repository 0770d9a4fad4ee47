use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use quickpulse::accumulator::LiveAccumulator;
use quickpulse::counters::sharded::ShardedU64;

const NUM_THREADS: usize = 8;
const ITERATIONS_PER_THREAD: usize = 250_000;

fn label() -> String {
    format!("{}threads x {}iter", NUM_THREADS, ITERATIONS_PER_THREAD)
}

fn run_threads<S, F>(shared: Arc<S>, op: F)
where
    S: Send + Sync + 'static,
    F: Fn(&S) + Send + Copy + 'static,
{
    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                for _ in 0..ITERATIONS_PER_THREAD {
                    op(&shared);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

fn bench_counter_increment(c: &mut Criterion) {
    let mut group = c.benchmark_group("counter_increment");

    group.bench_function(BenchmarkId::new("ShardedU64", label()), |b| {
        b.iter(|| {
            let counter = Arc::new(ShardedU64::new());
            run_threads(Arc::clone(&counter), |c| c.increment());
            black_box(counter.value())
        })
    });

    group.bench_function(BenchmarkId::new("AtomicU64 (single)", label()), |b| {
        b.iter(|| {
            let counter = Arc::new(AtomicU64::new(0));
            run_threads(Arc::clone(&counter), |c| {
                c.fetch_add(1, Ordering::Relaxed);
            });
            black_box(counter.load(Ordering::Relaxed))
        })
    });

    group.finish();
}

/// A full `record_request` updates three counters through the live slot.
fn bench_record_request(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_request");

    group.bench_function(BenchmarkId::new("LiveAccumulator", label()), |b| {
        b.iter(|| {
            let live = Arc::new(LiveAccumulator::new());
            run_threads(Arc::clone(&live), |live| {
                live.record_request(Duration::from_micros(250), true)
            });
            black_box(live.current().request_count())
        })
    });

    group.bench_function(BenchmarkId::new("3x AtomicU64 (single)", label()), |b| {
        b.iter(|| {
            let counters = Arc::new([AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)]);
            run_threads(Arc::clone(&counters), |c| {
                c[0].fetch_add(1, Ordering::Relaxed);
                c[1].fetch_add(2_500, Ordering::Relaxed);
                c[2].fetch_add(1, Ordering::Relaxed);
            });
            black_box(counters[0].load(Ordering::Relaxed))
        })
    });

    group.finish();
}

criterion_group!(benches, bench_counter_increment, bench_record_request);
criterion_main!(benches);
