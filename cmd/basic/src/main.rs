//! Basic jobfiber example
//!
//! Eight jobs increment a shared atomic; a ninth job fans out more work
//! and waits for it from inside the job.
//!
//! # Environment Variables
//!
//! - `JF_FLUSH_EPRINT=1` - Flush debug output immediately (useful for crash debugging)
//! - `JF_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)
//! - `JF_NUM_WORKERS=<n>` - Worker threads (0 = one per CPU)

use std::sync::Arc;

use jobfiber::{current_worker_id, wait_counter, yield_now};
use jobfiber::{kdebug, kinfo, Atomic32, Job, JobCounter, JobSystem, JobSystemConfig};

// JF_LOG_LEVEL=debug JF_FLUSH_EPRINT=1 cargo run -p jobfiber-basic
fn main() -> jobfiber::SchedResult<()> {
    println!("=== jobfiber Basic Example ===\n");

    let config = JobSystemConfig::from_env()
        .max_jobs_per_thread(256)
        .debug_logging(true);
    config.print();
    let mut system = JobSystem::setup(config)?;
    println!("Workers: {}", system.num_workers());

    // Eight increments, one counter
    let total = Arc::new(Atomic32::new(0));
    let counter = JobCounter::new(8);
    let jobs = (0..8).map(|i| {
        let total = Arc::clone(&total);
        Job::new(move || {
            kdebug!("[job {}] on worker {:?}", i, current_worker_id());
            total.increment();
        })
    });
    system.execute_batch(jobs, Some(&counter))?;
    system.wait_counter(&counter);
    println!("Total after 8 jobs: {}", total.load());

    // A job that waits for its own children
    let handle = system.handle();
    let squares = Arc::new(Atomic32::new(0));
    let root = JobCounter::new(1);
    {
        let squares = Arc::clone(&squares);
        system.execute(
            Job::new(move || {
                let children = JobCounter::new(4);
                let jobs = (1..=4).map(|n| {
                    let squares = Arc::clone(&squares);
                    Job::new(move || {
                        yield_now();
                        squares.fetch_add(n * n);
                    })
                });
                if let Err(e) = handle.execute_batch(jobs, Some(&children)) {
                    kinfo!("child submission failed: {}", e);
                    return;
                }
                kdebug!("[root] waiting for children");
                wait_counter(&children);
                kdebug!("[root] children done");
            }),
            Some(&root),
        )?;
    }
    system.wait_counter(&root);
    println!("Sum of squares 1..=4: {}", squares.load());

    system.shutdown()?;
    let stats = system.stats();
    println!(
        "\nExecuted {} jobs ({} suspensions, {} yields)",
        stats.jobs_executed, stats.suspensions, stats.yields
    );

    println!("\n=== Example Complete ===");
    Ok(())
}
