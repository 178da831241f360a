//! Stress tests for the scheduler

use parking_lot::Mutex;
use spindle::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

#[test]
#[ignore] // Run with --ignored flag
fn stress_test_many_small_callbacks() {
    let scheduler = Scheduler::new(8, true, "stress-small").unwrap();
    scheduler.start().unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..100_000 {
        let counter = counter.clone();
        scheduler.schedule(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });
    }
    scheduler.stop();

    assert_eq!(counter.load(Ordering::Relaxed), 100_000);
}

#[test]
#[ignore]
fn stress_test_yielding_fibers() {
    let scheduler = Scheduler::new(8, false, "stress-yield").unwrap();
    scheduler.start().unwrap();

    let steps = Arc::new(AtomicUsize::new(0));
    for _ in 0..1_000 {
        let steps = steps.clone();
        scheduler.schedule(move || {
            for _ in 0..100 {
                steps.fetch_add(1, Ordering::Relaxed);
                Handle::current().unwrap().schedule_fiber(Fiber::current());
                yield_now();
            }
        });
    }
    scheduler.stop();

    assert_eq!(steps.load(Ordering::Relaxed), 100_000);
}

#[test]
#[ignore]
fn stress_test_concurrent_submitters() {
    let scheduler = Scheduler::new(4, false, "stress-submit").unwrap();
    scheduler.start().unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    thread::scope(|s| {
        for _ in 0..8 {
            let handle = scheduler.handle();
            let counter = counter.clone();
            s.spawn(move || {
                for _ in 0..10_000 {
                    let counter = counter.clone();
                    handle.schedule(move || {
                        counter.fetch_add(1, Ordering::Relaxed);
                    });
                }
            });
        }
    });
    scheduler.stop();

    assert_eq!(counter.load(Ordering::Relaxed), 80_000);
}

#[test]
#[ignore]
fn stress_test_pinned_round_robin() {
    let scheduler = Scheduler::new(6, false, "stress-pinned").unwrap();
    scheduler.start().unwrap();
    let ids = scheduler.thread_ids();

    let misplaced = Arc::new(AtomicUsize::new(0));
    let per_thread = Arc::new(Mutex::new(vec![0usize; ids.len()]));
    for i in 0..60_000 {
        let slot = i % ids.len();
        let target = ids[slot];
        let misplaced = misplaced.clone();
        let per_thread = per_thread.clone();
        scheduler.submit(
            Task::callback(move || {
                if thread::current().id() != target {
                    misplaced.fetch_add(1, Ordering::Relaxed);
                }
                per_thread.lock()[slot] += 1;
            })
            .pin_to(target),
        );
    }
    scheduler.stop();

    assert_eq!(misplaced.load(Ordering::Relaxed), 0);
    assert!(per_thread.lock().iter().all(|&n| n == 10_000));
}

#[test]
#[ignore]
fn stress_test_scheduler_cycles() {
    for i in 0..50 {
        let scheduler = Scheduler::new(4, i % 2 == 0, format!("cycle-{}", i)).unwrap();
        scheduler.start().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = counter.clone();
            scheduler.schedule(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        scheduler.stop();
        assert_eq!(counter.load(Ordering::Relaxed), 100);
    }
}
