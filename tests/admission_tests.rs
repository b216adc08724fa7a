//! Admission policy tests
//!
//! Array-blocking queues reject once full, linked-blocking queues make the
//! producer wait. Neither may drop a job it admitted.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use rust_pool::prelude::*;

#[test]
fn test_array_queue_rejects_past_capacity() {
    const CAPACITY: usize = 5;
    const WORKERS: usize = 2;

    let scheduler = common::fast_scheduler(QueueType::ArrayBlocking, CAPACITY, WORKERS);
    let (started_tx, started_rx) = unbounded();
    let (release_tx, release_rx) = bounded::<()>(0);

    let blocking_job = |started_tx: Sender<()>, release_rx: Receiver<()>| {
        Job::new(move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
        })
    };

    // Occupy every worker so nothing drains the queue
    for _ in 0..WORKERS {
        assert!(scheduler.add(blocking_job(started_tx.clone(), release_rx.clone())));
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    for _ in 0..CAPACITY {
        assert!(scheduler.add(blocking_job(started_tx.clone(), release_rx.clone())));
    }
    assert_eq!(scheduler.queue_len(), CAPACITY);
    assert!(!scheduler.add(blocking_job(started_tx.clone(), release_rx.clone())));

    let stats = scheduler.stats();
    assert_eq!(stats.jobs_submitted, CAPACITY + WORKERS);
    assert_eq!(stats.jobs_rejected, 1);

    drop(release_tx);
    scheduler.shutdown().unwrap();
    assert_eq!(scheduler.stats().jobs_completed, CAPACITY + WORKERS);
}

#[test]
fn test_array_queue_saturation_scenario() {
    let scheduler = Scheduler::new(QueueType::ArrayBlocking, 10, 5).unwrap();

    let mut admitted = 0;
    for i in 1..50 {
        if scheduler.join(|_: usize| thread::sleep(Duration::from_millis(100)), i) {
            admitted += 1;
        }
        thread::sleep(Duration::from_millis(10));
    }

    assert!(admitted >= 10, "the first 10 jobs fit in the queue, got {}", admitted);
    assert!(admitted < 49, "a saturated pool must reject some jobs");
    assert_eq!(scheduler.stats().jobs_rejected, 49 - admitted);

    scheduler.shutdown_now().unwrap();
}

#[test]
fn test_linked_queue_never_rejects() {
    const WORKERS: usize = 3;
    const JOBS: usize = 30;

    let scheduler = common::fast_scheduler(QueueType::LinkedBlocking, WORKERS, WORKERS);
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..JOBS {
        let counter = Arc::clone(&counter);
        assert!(scheduler.add(Job::new(move || {
            thread::sleep(Duration::from_millis(2));
            counter.fetch_add(1, Ordering::SeqCst);
        })));
    }

    assert!(common::wait_until(Duration::from_secs(10), || {
        counter.load(Ordering::SeqCst) == JOBS
    }));
    assert_eq!(scheduler.stats().jobs_rejected, 0);
    scheduler.shutdown().unwrap();
}

#[test]
fn test_blocking_producers_from_many_threads() {
    let scheduler = Arc::new(common::fast_scheduler(QueueType::LinkedBlocking, 2, 2));
    let counter = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..4)
        .map(|_| {
            let scheduler = Arc::clone(&scheduler);
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                (0..25)
                    .filter(|_| {
                        let counter = Arc::clone(&counter);
                        scheduler.add(Job::new(move || {
                            counter.fetch_add(1, Ordering::SeqCst);
                        }))
                    })
                    .count()
            })
        })
        .collect();

    let admitted: usize = producers.into_iter().map(|p| p.join().unwrap()).sum();
    assert_eq!(admitted, 100);

    scheduler.shutdown().unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 100);
}

#[test]
fn test_zero_capacity_array_queue_hands_off() {
    let scheduler = common::fast_scheduler(QueueType::ArrayBlocking, 0, 1);
    let (done_tx, done_rx) = bounded(1);

    // Rejections count as pressure, so a worker is eventually waiting
    let admitted = common::wait_until(Duration::from_secs(5), || {
        let done_tx = done_tx.clone();
        scheduler.add(Job::new(move || {
            let _ = done_tx.send(());
        }))
    });

    assert!(admitted);
    done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    scheduler.shutdown().unwrap();
}

#[test]
fn test_zero_capacity_linked_queue_hands_off() {
    let scheduler = common::fast_scheduler(QueueType::LinkedBlocking, 0, 1);
    let (done_tx, done_rx) = bounded(1);

    // The blocked producer itself is the pressure that starts a worker
    assert!(scheduler.add(Job::new(move || {
        let _ = done_tx.send(());
    })));

    done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    scheduler.shutdown().unwrap();
}

#[test]
fn test_unsupported_queue_types_are_rejected() {
    for queue_type in [QueueType::Synchronous, QueueType::Priority] {
        match Scheduler::new(queue_type, 10, 10) {
            Err(Error::UnsupportedQueue(rejected)) => assert_eq!(rejected, queue_type),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("{:?} must not build a scheduler", queue_type),
        }
    }
}

#[test]
fn test_invalid_worker_count() {
    assert!(matches!(
        Scheduler::new(QueueType::ArrayBlocking, 10, 0),
        Err(Error::InvalidConfig { .. })
    ));
    assert!(matches!(Scheduler::new_blocking(0), Err(Error::InvalidConfig { .. })));
}
