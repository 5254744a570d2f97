//! Job throughput
//!
//! Submits batches of tiny jobs against one counter and waits for them,
//! both from the main thread and from inside a root job (which suspends
//! in `wait_counter` instead of blocking).

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use jobfiber::{wait_counter, Job, JobCounter, JobSystem, JobSystemConfig};

const BATCH: usize = 1024;

fn bench_batch(c: &mut Criterion) {
    let system = JobSystem::setup(JobSystemConfig::from_env().max_jobs_per_thread(BATCH))
        .expect("job system setup");

    let mut group = c.benchmark_group("throughput");
    group.throughput(Throughput::Elements(BATCH as u64));

    group.bench_function(BenchmarkId::new("batch_from_main", system.num_workers()), |b| {
        b.iter(|| {
            let counter = JobCounter::new(BATCH as i32);
            let jobs = (0..BATCH).map(|i| Job::new(move || {
                black_box(i * 2);
            }));
            system.execute_batch(jobs, Some(&counter)).expect("submit");
            system.wait_counter(&counter);
        })
    });

    group.bench_function(BenchmarkId::new("batch_from_job", system.num_workers()), |b| {
        b.iter(|| {
            let handle = system.handle();
            let root = JobCounter::new(1);
            let job = Job::new(move || {
                let counter = JobCounter::new(BATCH as i32 - 1);
                let jobs = (0..BATCH - 1).map(|i| Job::new(move || {
                    black_box(i * 2);
                }));
                handle.execute_batch(jobs, Some(&counter)).expect("submit");
                wait_counter(&counter);
            });
            system.execute(job, Some(&root)).expect("submit");
            system.wait_counter(&root);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_batch);
criterion_main!(benches);
