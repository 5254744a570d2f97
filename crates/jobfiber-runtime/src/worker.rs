//! Worker threads
//!
//! Each worker owns a bounded job queue, an unbounded queue of coroutines
//! to resume, and a semaphore whose permits equal the items in both. The
//! loop takes one permit per item, prefers resuming woken jobs over
//! starting new ones, and runs every job inside a coroutine (on the stack
//! claimed when it was submitted) so it can be suspended at `wait_counter`
//! without blocking the thread.

use std::any::Any;
use std::collections::VecDeque;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_queue::{ArrayQueue, SegQueue};
use jobfiber_core::{kdebug, kerror, kprint};

use crate::coroutine::Coroutine;
use crate::counter::JobCounter;
use crate::job::Job;
use crate::job_system::Shared;
use crate::stack::FiberStack;
use crate::sync::Semaphore;
use crate::tls::{self, Suspend};

/// A submitted job waiting for a worker
pub(crate) struct QueuedJob {
    pub job: Job,
    pub stack: FiberStack,
    pub counter: Option<JobCounter>,
}

/// A started job whose coroutine is suspended
pub(crate) struct Parked {
    pub coroutine: Coroutine,
    pub counter: Option<JobCounter>,
}

/// Queues of one worker, shared with submitters and other workers
pub(crate) struct WorkerQueue {
    pub jobs: ArrayQueue<QueuedJob>,
    pub resumes: SegQueue<Parked>,
    /// Claimed job slots: queued jobs plus pushes in progress
    pub reserved: AtomicUsize,
    pub signal: Semaphore,
}

impl WorkerQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            jobs: ArrayQueue::new(capacity),
            resumes: SegQueue::new(),
            reserved: AtomicUsize::new(0),
            signal: Semaphore::new(0),
        }
    }

    pub fn push_resume(&self, task: Parked) {
        self.resumes.push(task);
        self.signal.post();
    }
}

/// Thread entry for worker `index`
pub(crate) fn run(shared: Arc<Shared>, index: usize) {
    tls::set_worker(shared.id, index);
    kprint::set_worker_id(index);
    kdebug!("worker started");

    let mut worker = Worker {
        shared,
        index,
        yielded: VecDeque::new(),
    };
    worker.run_loop();

    kdebug!("worker stopped");
    kprint::clear_worker_id();
    tls::clear_worker();
}

struct Worker {
    shared: Arc<Shared>,
    index: usize,
    /// Jobs that yielded; they run after queued work
    yielded: VecDeque<Parked>,
}

impl Worker {
    fn queue(&self) -> &WorkerQueue {
        &self.shared.workers[self.index]
    }

    fn run_loop(&mut self) {
        loop {
            self.queue().signal.wait();

            if let Some(task) = self.queue().resumes.pop() {
                self.drive(task);
                continue;
            }
            if let Some(queued) = self.queue().jobs.pop() {
                self.queue().reserved.fetch_sub(1, Ordering::AcqRel);
                self.start(queued);
                continue;
            }
            if let Some(task) = self.yielded.pop_front() {
                self.drive(task);
                continue;
            }
            if self.shared.is_exiting() {
                break;
            }
        }
    }

    fn start(&mut self, queued: QueuedJob) {
        let QueuedJob { job, stack, counter } = queued;

        let mut coroutine = Coroutine::with_stack(stack, Arc::clone(self.shared.stacks.allocator()));
        if let Err(e) = coroutine.start(job.into_entry()) {
            kerror!("failed to start job coroutine: {}", e);
            self.complete(counter, None);
            return;
        }
        self.drive(Parked { coroutine, counter });
    }

    /// Resume a job's coroutine and deal with how it came back
    fn drive(&mut self, mut task: Parked) {
        tls::set_job_coroutine(task.coroutine.context_ptr());
        task.coroutine.resume();
        tls::set_job_coroutine(ptr::null_mut());

        if task.coroutine.state().is_finished() {
            let panic = task.coroutine.take_panic();
            self.recycle(task.coroutine);
            self.complete(task.counter, panic);
            return;
        }

        match tls::take_suspend() {
            Some(Suspend::Wait(counter)) => {
                self.shared.stats.suspensions.fetch_add(1, Ordering::Relaxed);
                self.shared.park(task, &counter);
            }
            // A bare Coroutine::yield_now counts as a yield too
            Some(Suspend::Yield) | None => {
                self.shared.stats.yields.fetch_add(1, Ordering::Relaxed);
                self.yielded.push_back(task);
                self.queue().signal.post();
            }
        }
    }

    fn recycle(&self, mut coroutine: Coroutine) {
        if let Some(stack) = coroutine.release() {
            self.shared.stacks.give(stack);
        }
    }

    fn complete(&self, counter: Option<JobCounter>, panic: Option<Box<dyn Any + Send>>) {
        if let Some(payload) = panic {
            self.shared.stats.job_panics.fetch_add(1, Ordering::Relaxed);
            kerror!("job panicked: {}", panic_message(payload.as_ref()));
        }
        self.shared.stats.jobs_executed.fetch_add(1, Ordering::Relaxed);

        if let Some(counter) = counter {
            counter.decrement();
        }
        self.shared.finish_in_flight(1);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return msg;
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg;
    }
    "<non-string panic payload>"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "<non-string panic payload>");
    }

    #[test]
    fn test_queue_permits_track_items() {
        let queue = WorkerQueue::new(2);
        let mut co = Coroutine::new();
        co.start(|| {}).unwrap();
        queue.push_resume(Parked { coroutine: co, counter: None });

        assert_eq!(queue.signal.permits(), 1);
        assert!(queue.signal.try_wait());
        let mut task = queue.resumes.pop().unwrap();
        assert!(task.coroutine.resume());
        assert!(queue.resumes.pop().is_none());
    }
}
