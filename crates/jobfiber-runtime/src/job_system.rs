//! The job system
//!
//! A fixed pool of worker threads with bounded per-worker queues. Jobs run
//! inside coroutines; a job that waits on a [`JobCounter`] is parked on the
//! counter and requeued, on its own job system, by whichever worker brings
//! that counter to zero. Every job gets its coroutine stack at submission,
//! so running out of stacks is reported to the submitter.
//!
//! # Example
//!
//! ```rust,ignore
//! use jobfiber_runtime::{Job, JobCounter, JobSystem, JobSystemConfig};
//!
//! let system = JobSystem::setup(JobSystemConfig::from_env())?;
//! let counter = JobCounter::new(2);
//! system.execute_batch(vec![Job::new(|| a()), Job::new(|| b())], Some(&counter))?;
//! system.wait_counter(&counter);
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use jobfiber_core::{kerror, kinfo, SchedError, SchedResult, WorkerError};

use crate::config::JobSystemConfig;
use crate::coroutine::Coroutine;
use crate::counter::JobCounter;
use crate::job::Job;
use crate::stack::StackPool;
use crate::sync::{ConditionSignal, Mutex};
use crate::thread::Thread;
use crate::tls::{self, Suspend};
use crate::worker::{self, Parked, QueuedJob, WorkerQueue};

static NEXT_SYSTEM_ID: AtomicU64 = AtomicU64::new(1);

/// Wait until `counter` reaches zero
///
/// From inside a job this suspends only the job: its worker goes on with
/// other work and the job is resumed, possibly on another worker, once the
/// counter is complete. Anywhere else it blocks the calling thread.
pub fn wait_counter(counter: &JobCounter) {
    if counter.is_complete() {
        return;
    }
    if tls::in_job() {
        tls::set_suspend(Suspend::Wait(counter.clone()));
        Coroutine::yield_now();
        debug_assert!(counter.is_complete());
    } else {
        counter.wait();
    }
}

/// Let other work on this worker run before continuing
///
/// Inside a job the job is requeued behind queued work. Inside a plain
/// coroutine this is [`Coroutine::yield_now`]; elsewhere it does nothing.
pub fn yield_now() {
    if tls::in_job() {
        tls::set_suspend(Suspend::Yield);
    }
    Coroutine::yield_now();
}

#[derive(Default)]
pub(crate) struct Stats {
    pub jobs_submitted: AtomicU64,
    pub jobs_executed: AtomicU64,
    pub job_panics: AtomicU64,
    pub suspensions: AtomicU64,
    pub yields: AtomicU64,
    pub resumes: AtomicU64,
    pub queue_rejections: AtomicU64,
    pub stack_failures: AtomicU64,
}

/// Snapshot of job system activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobSystemStats {
    pub jobs_submitted: u64,
    /// Jobs that ran to completion (panicked ones included)
    pub jobs_executed: u64,
    pub job_panics: u64,
    /// Times a job suspended in `wait_counter`
    pub suspensions: u64,
    pub yields: u64,
    /// Suspended jobs requeued after their counter completed
    pub resumes: u64,
    /// Submissions refused with `QueueFull`
    pub queue_rejections: u64,
    /// Submissions refused because no coroutine stack could be allocated
    pub stack_failures: u64,
}

/// State shared by the workers and every handle
pub(crate) struct Shared {
    pub id: u64,
    pub workers: Box<[WorkerQueue]>,
    pub capacity: usize,
    pub stacks: StackPool,
    pub stats: Stats,
    /// Round-robin cursor for placement ties and resumes
    cursor: AtomicUsize,
    /// Jobs submitted and not yet finished
    in_flight: AtomicUsize,
    idle_lock: Mutex<()>,
    idle: ConditionSignal,
    /// No new submissions from outside the workers
    closing: AtomicBool,
    /// Workers leave once their queues are empty
    exiting: AtomicBool,
}

impl Shared {
    fn new(config: &JobSystemConfig, num_workers: usize) -> Self {
        Self {
            id: NEXT_SYSTEM_ID.fetch_add(1, Ordering::Relaxed),
            workers: (0..num_workers)
                .map(|_| WorkerQueue::new(config.max_jobs_per_thread))
                .collect(),
            capacity: config.max_jobs_per_thread,
            stacks: StackPool::new(
                Arc::clone(&config.stack_allocator),
                config.stack_size,
                config.stack_pool_size.saturating_mul(num_workers),
            ),
            stats: Stats::default(),
            cursor: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            idle_lock: Mutex::new(()),
            idle: ConditionSignal::new(),
            closing: AtomicBool::new(false),
            exiting: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::Acquire)
    }

    fn submit(&self, jobs: Vec<Job>, counter: Option<&JobCounter>) -> SchedResult<()> {
        let requested = jobs.len();
        if requested == 0 {
            return Ok(());
        }

        // Counted before the closing check so shutdown cannot miss us
        self.in_flight.fetch_add(requested, Ordering::SeqCst);
        if self.is_exiting() || (self.closing.load(Ordering::SeqCst) && tls::worker_of(self.id).is_none()) {
            self.finish_in_flight(requested);
            return Err(SchedError::ShutDown);
        }

        if let Some(counter) = counter {
            if let Err(e) = counter.assign(requested) {
                self.finish_in_flight(requested);
                return Err(e);
            }
        }

        let Some(placement) = self.reserve(requested) else {
            if let Some(counter) = counter {
                counter.unassign(requested);
            }
            self.finish_in_flight(requested);
            self.stats.queue_rejections.fetch_add(1, Ordering::Relaxed);
            return Err(SchedError::QueueFull { requested, capacity: self.capacity });
        };

        let stacks = match self.stacks.take_many(requested) {
            Ok(stacks) => stacks,
            Err(e) => {
                self.unreserve(&placement);
                if let Some(counter) = counter {
                    counter.unassign(requested);
                }
                self.finish_in_flight(requested);
                self.stats.stack_failures.fetch_add(1, Ordering::Relaxed);
                return Err(e.into());
            }
        };

        for ((job, stack), index) in jobs.into_iter().zip(stacks).zip(placement) {
            let worker = &self.workers[index];
            let queued = QueuedJob { job, stack, counter: counter.cloned() };
            if worker.jobs.push(queued).is_err() {
                unreachable!("worker {} queue full despite reservation", index);
            }
            worker.signal.post();
        }
        self.stats.jobs_submitted.fetch_add(requested as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Claim one queue slot per job, all or nothing
    ///
    /// Each job goes to the least-loaded worker with room; ties go to the
    /// first such worker after a rotating cursor.
    fn reserve(&self, jobs: usize) -> Option<Vec<usize>> {
        let count = self.workers.len();
        let mut placed: Vec<usize> = Vec::with_capacity(jobs);

        while placed.len() < jobs {
            let start = self.cursor.fetch_add(1, Ordering::Relaxed) % count;
            let mut best: Option<(usize, usize)> = None;
            for offset in 0..count {
                let index = (start + offset) % count;
                let load = self.workers[index].reserved.load(Ordering::Acquire);
                if load < self.capacity && best.is_none_or(|(_, best_load)| load < best_load) {
                    best = Some((index, load));
                }
            }

            let Some((index, load)) = best else {
                self.unreserve(&placed);
                return None;
            };
            if self.workers[index]
                .reserved
                .compare_exchange(load, load + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                placed.push(index);
            }
        }
        Some(placed)
    }

    fn unreserve(&self, placement: &[usize]) {
        for &index in placement {
            self.workers[index].reserved.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Requeue a suspended job on the next worker in turn
    pub fn schedule_resume(&self, task: Parked) {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.stats.resumes.fetch_add(1, Ordering::Relaxed);
        self.workers[index].push_resume(task);
    }

    /// Park a job until `counter` completes, which may happen on any job system
    pub fn park(self: &Arc<Self>, task: Parked, counter: &JobCounter) {
        if let Some(task) = counter.park(self, task) {
            self.schedule_resume(task);
        }
    }

    pub fn finish_in_flight(&self, jobs: usize) {
        if self.in_flight.fetch_sub(jobs, Ordering::SeqCst) == jobs {
            let _guard = self.idle_lock.lock();
            self.idle.broadcast();
        }
    }

    fn wait_idle(&self) {
        let guard = self.idle_lock.lock();
        let _guard = self
            .idle
            .wait_while(guard, |_| self.in_flight.load(Ordering::SeqCst) != 0);
    }

    /// Tell every worker to leave once its queues are empty
    fn begin_exit(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.exiting.store(true, Ordering::SeqCst);
        for worker in self.workers.iter() {
            worker.signal.post();
        }
    }

    fn stats(&self) -> JobSystemStats {
        let s = &self.stats;
        JobSystemStats {
            jobs_submitted: s.jobs_submitted.load(Ordering::Relaxed),
            jobs_executed: s.jobs_executed.load(Ordering::Relaxed),
            job_panics: s.job_panics.load(Ordering::Relaxed),
            suspensions: s.suspensions.load(Ordering::Relaxed),
            yields: s.yields.load(Ordering::Relaxed),
            resumes: s.resumes.load(Ordering::Relaxed),
            queue_rejections: s.queue_rejections.load(Ordering::Relaxed),
            stack_failures: s.stack_failures.load(Ordering::Relaxed),
        }
    }
}

fn spawn_worker(index: usize, shared: Arc<Shared>) -> SchedResult<Thread> {
    Thread::run(format!("jf-worker-{}", index), move || worker::run(shared, index))
}

/// Start `count` workers with `spawn`
///
/// If one fails, the workers already running are told to exit and joined
/// before the error is returned.
fn spawn_workers<S>(shared: &Arc<Shared>, count: usize, mut spawn: S) -> SchedResult<Vec<Thread>>
where
    S: FnMut(usize, Arc<Shared>) -> SchedResult<Thread>,
{
    let mut threads: Vec<Thread> = Vec::with_capacity(count);
    for index in 0..count {
        match spawn(index, Arc::clone(shared)) {
            Ok(thread) => threads.push(thread),
            Err(e) => {
                kerror!("failed to spawn worker {}: {}", index, e);
                shared.begin_exit();
                for thread in threads {
                    let _ = thread.join();
                }
                return Err(e);
            }
        }
    }
    Ok(threads)
}

/// Cloneable submission handle; lets jobs submit more jobs
#[derive(Clone)]
pub struct JobSystemHandle {
    shared: Arc<Shared>,
}

impl JobSystemHandle {
    /// Enqueue one job, optionally tracked by `counter`
    ///
    /// Fails with `QueueFull` when no worker has room, and with
    /// `MemoryError` when no coroutine stack can be had; either way
    /// nothing is enqueued and the counter is left as it was.
    pub fn execute(&self, job: Job, counter: Option<&JobCounter>) -> SchedResult<()> {
        self.shared.submit(vec![job], counter)
    }

    /// Enqueue a batch: either every job is queued or none is
    pub fn execute_batch<I>(&self, jobs: I, counter: Option<&JobCounter>) -> SchedResult<()>
    where
        I: IntoIterator<Item = Job>,
    {
        self.shared.submit(jobs.into_iter().collect(), counter)
    }

    /// See [`wait_counter`]
    pub fn wait_counter(&self, counter: &JobCounter) {
        wait_counter(counter);
    }

    pub fn stats(&self) -> JobSystemStats {
        self.shared.stats()
    }

    pub fn num_workers(&self) -> usize {
        self.shared.workers.len()
    }

    /// Per-worker queue capacity
    pub fn max_jobs_per_thread(&self) -> usize {
        self.shared.capacity
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.is_exiting()
    }
}

impl std::fmt::Debug for JobSystemHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSystemHandle")
            .field("id", &self.shared.id)
            .field("workers", &self.shared.workers.len())
            .finish()
    }
}

/// Worker pool plus its queues; shut down explicitly or on drop
#[derive(Debug)]
pub struct JobSystem {
    handle: JobSystemHandle,
    threads: Vec<Thread>,
    debug_logging: bool,
}

impl JobSystem {
    /// Validate `config` and start the workers
    ///
    /// If any worker fails to spawn, the ones already running are stopped
    /// and joined before the error is returned.
    pub fn setup(config: JobSystemConfig) -> SchedResult<Self> {
        config.validate()?;
        let num_workers = config.effective_workers();
        let shared = Arc::new(Shared::new(&config, num_workers));
        let threads = spawn_workers(&shared, num_workers, spawn_worker)?;

        if config.debug_logging {
            kinfo!(
                "job system {} up: {} workers, {} jobs per worker",
                shared.id,
                num_workers,
                config.max_jobs_per_thread
            );
        }

        Ok(Self {
            handle: JobSystemHandle { shared },
            threads,
            debug_logging: config.debug_logging,
        })
    }

    pub fn execute(&self, job: Job, counter: Option<&JobCounter>) -> SchedResult<()> {
        self.handle.execute(job, counter)
    }

    pub fn execute_batch<I>(&self, jobs: I, counter: Option<&JobCounter>) -> SchedResult<()>
    where
        I: IntoIterator<Item = Job>,
    {
        self.handle.execute_batch(jobs, counter)
    }

    /// See [`wait_counter`]
    pub fn wait_counter(&self, counter: &JobCounter) {
        wait_counter(counter);
    }

    pub fn handle(&self) -> JobSystemHandle {
        self.handle.clone()
    }

    pub fn stats(&self) -> JobSystemStats {
        self.handle.stats()
    }

    pub fn num_workers(&self) -> usize {
        self.handle.num_workers()
    }

    pub fn max_jobs_per_thread(&self) -> usize {
        self.handle.max_jobs_per_thread()
    }

    /// Finish all submitted work (suspended jobs included), then stop and
    /// join the workers
    ///
    /// Calling it again is a no-op.
    pub fn shutdown(&mut self) -> SchedResult<()> {
        if self.threads.is_empty() {
            return Ok(());
        }
        let shared = &self.handle.shared;

        shared.closing.store(true, Ordering::SeqCst);
        shared.wait_idle();
        shared.begin_exit();

        let panicked = self
            .threads
            .drain(..)
            .map(Thread::join)
            .filter(Result::is_err)
            .count();

        if self.debug_logging {
            let stats = shared.stats();
            kinfo!(
                "job system {} down: {} jobs executed, {} suspensions, {} panics",
                shared.id,
                stats.jobs_executed,
                stats.suspensions,
                stats.job_panics
            );
        }

        if panicked > 0 {
            return Err(WorkerError::PanickedOnShutdown(panicked).into());
        }
        Ok(())
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            kerror!("job system shutdown: {}", e);
        }
    }
}
