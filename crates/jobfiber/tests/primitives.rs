use std::sync::Arc;
use std::time::{Duration, Instant};

use jobfiber::{
    Atomic32, Atomic64, ConditionSignal, Coroutine, CoroutineState, Mutex, Semaphore, Thread,
};

#[test]
fn atomics_across_threads() {
    const THREADS: usize = 4;
    const OPS: i64 = 10_000;
    let cell = Arc::new(Atomic64::new(0));

    let threads: Vec<Thread> = (0..THREADS)
        .map(|i| {
            let cell = Arc::clone(&cell);
            Thread::run(format!("adder-{}", i), move || {
                for _ in 0..OPS {
                    cell.increment();
                }
            })
            .unwrap()
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(cell.load(), THREADS as i64 * OPS);
}

#[test]
fn thread_identity() {
    let me = Thread::current();
    let thread = Thread::run("identity", || {
        let info = Thread::current();
        assert_eq!(info.name.as_deref(), Some("identity"));
    })
    .unwrap();
    assert_ne!(thread.id(), me.id);
    assert_eq!(thread.name(), "identity");
    thread.join().unwrap();
}

#[test]
fn coroutine_keeps_locals_across_yields() {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let mut co = Coroutine::new();
    {
        let trace = Arc::clone(&trace);
        co.start(move || {
            let mut local = 10;
            for _ in 0..3 {
                trace.lock().push(local);
                local += 1;
                Coroutine::yield_now();
            }
        })
        .unwrap();
    }

    assert_eq!(co.state(), CoroutineState::Suspended);
    while co.status() {
        co.resume();
    }
    assert_eq!(co.state(), CoroutineState::Finished);
    assert_eq!(*trace.lock(), vec![10, 11, 12]);
    assert!(!co.resume());
}

#[test]
fn try_lock_on_held_mutex_returns_quickly() {
    let mutex = Arc::new(Mutex::new(0u32));
    let held = Arc::new(Semaphore::new(0));
    let release = Arc::new(Semaphore::new(0));

    let holder = {
        let mutex = Arc::clone(&mutex);
        let held = Arc::clone(&held);
        let release = Arc::clone(&release);
        Thread::run("holder", move || {
            let mut guard = mutex.lock();
            *guard += 1;
            held.post();
            release.wait();
        })
        .unwrap()
    };

    held.wait();
    let start = Instant::now();
    assert!(mutex.try_lock().is_none());
    assert!(start.elapsed() < Duration::from_millis(1));

    release.post();
    holder.join().unwrap();
    assert_eq!(*mutex.try_lock().unwrap(), 1);
}

#[test]
fn condition_hands_off_between_threads() {
    let state = Arc::new((Mutex::new(Vec::new()), ConditionSignal::new()));

    let consumer = {
        let state = Arc::clone(&state);
        Thread::run("consumer", move || {
            let (lock, cond) = &*state;
            let guard = lock.lock();
            let guard = cond.wait_while(guard, |items: &mut Vec<u32>| items.len() < 3);
            assert_eq!(*guard, vec![1, 2, 3]);
        })
        .unwrap()
    };

    for i in 1..=3 {
        let (lock, cond) = &*state;
        lock.lock().push(i);
        cond.signal();
    }
    consumer.join().unwrap();
}

#[test]
fn semaphore_counts_permits() {
    let sem = Arc::new(Semaphore::new(0));
    let done = Arc::new(Atomic32::new(0));

    let waiters: Vec<Thread> = (0..3)
        .map(|i| {
            let sem = Arc::clone(&sem);
            let done = Arc::clone(&done);
            Thread::run(format!("waiter-{}", i), move || {
                sem.wait();
                done.increment();
            })
            .unwrap()
        })
        .collect();

    for _ in 0..3 {
        sem.post();
    }
    for thread in waiters {
        thread.join().unwrap();
    }
    assert_eq!(done.load(), 3);
    assert_eq!(sem.permits(), 0);
    assert!(!sem.try_wait());
}
