//! Common test harness for rust-pool tests
//!
//! Schedulers built here use short control intervals so tests observe
//! activation and scale-down in milliseconds instead of seconds.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::thread;
use std::time::{Duration, Instant};
use rust_pool::prelude::*;

/// Initialize the test environment once
static INIT: Once = Once::new();

/// Initialize test environment
pub fn init_test_env() {
    INIT.call_once(|| {
        // Jobs that panic on purpose would otherwise flood the test output
        let default_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let expected = info
                .payload()
                .downcast_ref::<&str>()
                .is_some_and(|msg| msg.starts_with("expected"));
            if !expected {
                default_hook(info);
            }
        }));
    });
}

/// Scheduler configuration with millisecond control intervals
pub fn fast_config(
    queue_type: QueueType,
    queue_capacity: usize,
    num_workers: usize,
) -> SchedulerConfig {
    init_test_env();
    SchedulerConfig {
        fast_interval: Duration::from_millis(5),
        neutral_interval: Duration::from_millis(20),
        slow_interval: Duration::from_millis(40),
        idle_tick: Duration::from_millis(20),
        shutdown_timeout: Duration::from_secs(10),
        ..SchedulerConfig::new(queue_type, queue_capacity, num_workers)
    }
}

/// Build a scheduler from `fast_config`
pub fn fast_scheduler(
    queue_type: QueueType,
    queue_capacity: usize,
    num_workers: usize,
) -> Scheduler {
    Scheduler::with_config(fast_config(queue_type, queue_capacity, num_workers)).unwrap()
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Tracks how many jobs run at the same time
#[derive(Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    /// Mark a job as running until the returned guard is dropped
    pub fn enter(&self) -> GaugeGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard { gauge: self }
    }

    /// Highest number of simultaneous jobs observed
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Leaves the gauge on drop
pub struct GaugeGuard<'a> {
    gauge: &'a ConcurrencyGauge,
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}
