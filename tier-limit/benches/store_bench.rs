use std::hint::black_box;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use chrono::Utc;
use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::criterion_group;
use criterion::criterion_main;
use futures::executor::block_on;

use tier_limit::AdmissionEngine;
use tier_limit::CallerIdentity;
use tier_limit::CounterStore;
use tier_limit::InMemoryCounterStore;
use tier_limit::PolicyRegistry;
use tier_limit::RateLimitPolicy;
use tier_limit::Tier;

const LIMIT: u32 = 1_000_000;
// Short enough that pruning keeps the logs bounded during a run
const WINDOW: Duration = Duration::from_millis(100);

fn bench_single_key(group_name: &str, c: &mut Criterion, store: Arc<dyn CounterStore>) {
    let mut group = c.benchmark_group(group_name);

    group.bench_function("single-threaded", |b| {
        b.iter(|| {
            let _ = black_box(block_on(store.record_and_check(
                "bench:key",
                LIMIT,
                WINDOW,
                Utc::now(),
            )));
        })
    });

    group.finish();
}

fn bench_parallel_store(group_name: &str, c: &mut Criterion, store: Arc<dyn CounterStore>) {
    let mut group = c.benchmark_group(group_name);

    for keys in [1, 64] {
        for threads in [2, 4, 8] {
            group.bench_with_input(
                BenchmarkId::from_parameter(format!("{}-threads-{}-keys", threads, keys)),
                &threads,
                |b, &n| {
                    b.iter_custom(|iters| {
                        let barrier = Arc::new(Barrier::new(n + 1));
                        let mut handles = Vec::with_capacity(n);

                        for t in 0..n {
                            let s = Arc::clone(&store);
                            let bar = Arc::clone(&barrier);
                            let iters_per_thread = iters / n as u64;

                            handles.push(thread::spawn(move || {
                                bar.wait();
                                for i in 0..iters_per_thread {
                                    let key = format!("bench:{}", (i as usize + t) % keys);
                                    let _ = black_box(block_on(s.record_and_check(
                                        &key,
                                        LIMIT,
                                        WINDOW,
                                        Utc::now(),
                                    )));
                                }
                            }));
                        }

                        barrier.wait();
                        let start = Instant::now();

                        for handle in handles {
                            let _ = handle.join();
                        }

                        start.elapsed()
                    });
                },
            );
        }
    }
    group.finish();
}

fn bench_engine(c: &mut Criterion) {
    let policy =
        RateLimitPolicy::new(Tier::Free, NonZeroU32::new(LIMIT).unwrap(), WINDOW).unwrap();
    let engine = AdmissionEngine::new(
        Arc::new(PolicyRegistry::new([policy]).unwrap()),
        Arc::new(InMemoryCounterStore::new()),
    );
    let caller = CallerIdentity::new("caller:bench", Tier::Free);
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let mut group = c.benchmark_group("AdmissionEngine");
    group.bench_function("decide", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(engine.decide(&caller, Utc::now()).await) })
    });
    group.finish();
}

fn run_all_benches(c: &mut Criterion) {
    let memory: Arc<dyn CounterStore> = Arc::new(InMemoryCounterStore::new());
    bench_single_key("InMemory", c, Arc::clone(&memory));
    bench_parallel_store("InMemory", c, memory);

    bench_engine(c);
}

criterion_group!(benches, run_all_benches);
criterion_main!(benches);
