//! Stress test - many jobs, nested waits
//!
//! Usage: `stress [batches] [jobs-per-batch]`
//!
//! Each batch is driven by a root job that fans out its jobs, waits for
//! them from inside the job, and then checks the result. Submissions that
//! hit a full queue back off and retry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use jobfiber::{env_get, in_job, kerror, kwarn, wait_counter, yield_now};
use jobfiber::{Job, JobCounter, JobSystem, JobSystemConfig, JobSystemHandle, SchedError, SchedResult};

/// Submit the batch built by `make`, retrying while the queues are full
fn submit_retrying<F>(handle: &JobSystemHandle, counter: &JobCounter, make: F) -> SchedResult<u64>
where
    F: Fn() -> Vec<Job>,
{
    let mut retries = 0;
    loop {
        match handle.execute_batch(make(), Some(counter)) {
            Ok(()) => return Ok(retries),
            Err(SchedError::QueueFull { .. }) => {
                retries += 1;
                if in_job() {
                    yield_now();
                } else {
                    std::thread::yield_now();
                }
            }
            Err(e) => return Err(e),
        }
    }
}

fn main() -> SchedResult<()> {
    println!("=== jobfiber Stress Test ===\n");

    let mut args = std::env::args().skip(1);
    let batches: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(200);
    let per_batch: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(500);
    // Every Nth job yields once to shake up scheduling (0 = never)
    let yield_every: usize = env_get("JF_STRESS_YIELD_EVERY", 7);

    let config = JobSystemConfig::from_env().max_jobs_per_thread(per_batch.max(64));
    let mut system = JobSystem::setup(config)?;
    let handle = system.handle();

    println!(
        "{} batches x {} jobs on {} workers (queue capacity {})",
        batches,
        per_batch,
        system.num_workers(),
        system.max_jobs_per_thread()
    );

    let completed = Arc::new(AtomicU64::new(0));
    let failures = Arc::new(AtomicU64::new(0));
    let retries = Arc::new(AtomicU64::new(0));
    let start = Instant::now();

    let all = JobCounter::new(batches as i32);
    for batch in 0..batches {
        let make_root = || {
            let handle = handle.clone();
            let completed = Arc::clone(&completed);
            let failures = Arc::clone(&failures);
            let retries = Arc::clone(&retries);
            vec![Job::new(move || {
                let sum = Arc::new(AtomicU64::new(0));
                let counter = JobCounter::new(per_batch as i32);
                let make_children = || {
                    (0..per_batch)
                        .map(|i| {
                            let sum = Arc::clone(&sum);
                            Job::new(move || {
                                if yield_every > 0 && i % yield_every == 0 {
                                    yield_now();
                                }
                                sum.fetch_add(i as u64, Ordering::Relaxed);
                            })
                        })
                        .collect()
                };
                match submit_retrying(&handle, &counter, make_children) {
                    Ok(n) => {
                        retries.fetch_add(n, Ordering::Relaxed);
                    }
                    Err(e) => {
                        kerror!("batch {}: {}", batch, e);
                        failures.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                }
                wait_counter(&counter);

                let n = per_batch as u64;
                let expected = n * n.saturating_sub(1) / 2;
                let got = sum.load(Ordering::Relaxed);
                if got != expected {
                    kerror!("batch {}: sum {} != {}", batch, got, expected);
                    failures.fetch_add(1, Ordering::Relaxed);
                }
                completed.fetch_add(n, Ordering::Relaxed);
            })]
        };
        let n = submit_retrying(&handle, &all, make_root)?;
        retries.fetch_add(n, Ordering::Relaxed);

        if (batch + 1) % 50 == 0 {
            print!("\rSubmitted: {}/{}", batch + 1, batches);
        }
    }

    let submit_time = start.elapsed();
    println!("\n\nSubmit time: {:?}", submit_time);

    system.wait_counter(&all);
    let total_time = start.elapsed();
    system.shutdown()?;

    let stats = system.stats();
    let done = completed.load(Ordering::Relaxed);
    println!("\n=== Results ===");
    println!("Jobs completed:  {}", done);
    println!("Jobs executed:   {}", stats.jobs_executed);
    println!("Suspensions:     {}", stats.suspensions);
    println!("Yields:          {}", stats.yields);
    println!("Queue retries:   {}", retries.load(Ordering::Relaxed));
    println!("Total time:      {:?}", total_time);
    println!("Throughput:      {:.0} jobs/sec", stats.jobs_executed as f64 / total_time.as_secs_f64());

    let failed = failures.load(Ordering::Relaxed);
    if failed > 0 {
        kwarn!("{} batch(es) failed", failed);
        std::process::exit(1);
    }

    println!("\n=== Stress Test Complete ===");
    Ok(())
}
