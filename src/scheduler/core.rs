//! Scheduler coordination
//!
//! Owns the admission queue and a fixed set of workers. A control thread
//! samples queue pressure on an adaptive period and activates or deactivates
//! one worker per tick. There is no per-job signal to the control loop, so a
//! burst shorter than the current period can wait up to one period before a
//! worker is started for it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use crossbeam::channel::{bounded, Receiver, Sender};
use crossbeam::select;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use crate::error::{Error, Result};
use super::job::Job;
use super::queue::{JobQueue, Queue, QueueType};
use super::worker::{Worker, WorkerConfig, WorkerId, WorkerState};

/// Process-wide scheduler with the default configuration
pub static GLOBAL_SCHEDULER: Lazy<Scheduler> = Lazy::new(Scheduler::default);

/// Get the process-wide scheduler, creating it on first use
pub fn global() -> &'static Scheduler {
    &GLOBAL_SCHEDULER
}

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Admission policy of the queue
    pub queue_type: QueueType,
    /// Maximum number of buffered jobs
    pub queue_capacity: usize,
    /// Number of workers, the upper bound on concurrently running jobs
    pub num_workers: usize,
    /// Thread name prefix
    pub thread_name_prefix: String,
    /// Control period while load is growing
    pub fast_interval: Duration,
    /// Control period when nothing changed
    pub neutral_interval: Duration,
    /// Control period after a worker was released
    pub slow_interval: Duration,
    /// How long a worker waits for a job before it reports itself idle
    pub idle_tick: Duration,
    /// Default limit for `Scheduler::shutdown`
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_type: QueueType::ArrayBlocking,
            queue_capacity: 1000,
            num_workers: 10,
            thread_name_prefix: "pool-worker".to_string(),
            fast_interval: Duration::from_millis(100),
            neutral_interval: Duration::from_secs(1),
            slow_interval: Duration::from_secs(10),
            idle_tick: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    /// Configuration with the given queue and worker count, defaults elsewhere
    pub fn new(queue_type: QueueType, queue_capacity: usize, num_workers: usize) -> Self {
        Self {
            queue_type,
            queue_capacity,
            num_workers,
            ..Default::default()
        }
    }

    /// Blocking queue sized to the worker count
    pub fn blocking(num_workers: usize) -> Self {
        Self::new(QueueType::LinkedBlocking, num_workers, num_workers)
    }

    /// Blocking queue with one worker per logical CPU
    pub fn per_cpu() -> Self {
        Self::blocking(num_cpus::get())
    }

    /// Check the configuration before anything is spawned
    pub fn validate(&self) -> Result<()> {
        if self.num_workers < 1 {
            return Err(Error::invalid_config(format!(
                "worker count must be at least 1, got {}",
                self.num_workers
            )));
        }
        if !self.queue_type.is_supported() {
            return Err(Error::UnsupportedQueue(self.queue_type));
        }

        let intervals = [
            ("fast_interval", self.fast_interval),
            ("neutral_interval", self.neutral_interval),
            ("slow_interval", self.slow_interval),
            ("idle_tick", self.idle_tick),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(Error::invalid_config(format!("{} must be non-zero", name)));
            }
        }

        Ok(())
    }
}

/// Snapshot of scheduler statistics
#[derive(Debug, Clone)]
pub struct SchedulerStats {
    /// Jobs admitted by the queue
    pub jobs_submitted: usize,
    /// Jobs refused admission
    pub jobs_rejected: usize,
    /// Jobs executed by workers, including ones that panicked
    pub jobs_completed: usize,
    /// Jobs that panicked
    pub jobs_panicked: usize,
    /// Jobs buffered in the queue
    pub queued: usize,
    /// Number of workers owned by the scheduler
    pub total_workers: usize,
    /// Workers with a running thread
    pub active_workers: usize,
    /// Workers currently executing jobs
    pub busy_workers: usize,
}

/// Internal scheduler statistics using atomics
#[derive(Default)]
struct SchedulerStatsInternal {
    jobs_submitted: AtomicUsize,
    jobs_rejected: AtomicUsize,
}

/// State shared between the scheduler handle and its control thread
struct Shared {
    config: SchedulerConfig,
    queue: JobQueue,
    workers: Vec<Worker>,
    stats: SchedulerStatsInternal,
    shutdown: AtomicBool,
}

impl Shared {
    fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        let queue = JobQueue::new(config.queue_type, config.queue_capacity)?;

        let workers = (0..config.num_workers)
            .map(|i| {
                let worker_config = WorkerConfig {
                    id: WorkerId(i),
                    name: format!("{}-{}", config.thread_name_prefix, i),
                    idle_tick: config.idle_tick,
                };
                Worker::new(worker_config, queue.poll().clone())
            })
            .collect();

        Ok(Self {
            config,
            queue,
            workers,
            stats: SchedulerStatsInternal::default(),
            shutdown: AtomicBool::new(false),
        })
    }

    /// One control decision; returns the period until the next one
    fn tick(&self) -> Duration {
        let pressure = self.queue.len()
            + self.queue.pending_producers()
            + self.queue.take_rejections();
        let active = self.active_workers();

        log::trace!("Control tick: pressure {}, {} active workers", pressure, active);

        if pressure > 0 && active < self.workers.len() {
            if let Some(worker) = self.workers.iter().find(|w| !w.is_active()) {
                match worker.start() {
                    Ok(()) => {
                        log::debug!(
                            "Activated worker {} (pressure {}, {} active)",
                            worker.id().0,
                            pressure,
                            active + 1
                        );
                        return self.config.fast_interval;
                    }
                    Err(e) => log::warn!("Failed to activate worker {}: {}", worker.id().0, e),
                }
            }
        } else if pressure == 0 && active > 0 {
            if let Some(worker) = self.workers.iter().find(|w| w.is_idle()) {
                if worker.stop() {
                    log::debug!(
                        "Deactivated worker {} ({} active)",
                        worker.id().0,
                        active - 1
                    );
                    return self.config.slow_interval;
                }
            }
        }

        self.config.neutral_interval
    }

    fn active_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.is_active()).count()
    }

    fn all_stopped(&self) -> bool {
        self.workers.iter().all(|w| !w.is_active())
    }

    /// Close admission; returns `false` if shutdown had already begun
    fn begin_shutdown(&self) -> bool {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.queue.close();
        true
    }

    fn join_workers(&self) -> Result<()> {
        for worker in &self.workers {
            worker.join()?;
        }
        Ok(())
    }
}

/// Control thread main loop
fn control_loop(shared: Arc<Shared>, stop_rx: Receiver<()>) {
    loop {
        let period = shared.tick();
        select! {
            // Only ever disconnected, never sent on
            recv(stop_rx) -> _ => break,
            default(period) => {}
        }
    }
    log::debug!("Control loop stopped");
}

/// A pool of workers draining one admission queue
pub struct Scheduler {
    shared: Arc<Shared>,
    /// Dropping the sender stops the control thread
    control_stop: Mutex<Option<Sender<()>>>,
    control_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler with the given queue type, queue capacity and worker count
    pub fn new(queue_type: QueueType, queue_capacity: usize, num_workers: usize) -> Result<Self> {
        Self::with_config(SchedulerConfig::new(queue_type, queue_capacity, num_workers))
    }

    /// Create a scheduler whose `add` waits for room, with a queue sized to the worker count
    pub fn new_blocking(num_workers: usize) -> Result<Self> {
        Self::with_config(SchedulerConfig::blocking(num_workers))
    }

    /// Create a scheduler with the given configuration
    ///
    /// The control loop is running when this returns. Workers start only once
    /// jobs are queued.
    pub fn with_config(config: SchedulerConfig) -> Result<Self> {
        let shared = Arc::new(Shared::new(config)?);
        let (stop_tx, stop_rx) = bounded(0);

        let control_shared = Arc::clone(&shared);
        let control_handle = thread::Builder::new()
            .name(format!("{}-control", shared.config.thread_name_prefix))
            .spawn(move || control_loop(control_shared, stop_rx))
            .map_err(|e| Error::SpawnError {
                reason: format!("control thread: {}", e),
            })?;

        log::info!(
            "Scheduler created with {} workers and {:?} queue of capacity {}",
            shared.workers.len(),
            shared.config.queue_type,
            shared.config.queue_capacity
        );

        Ok(Self {
            shared,
            control_stop: Mutex::new(Some(stop_tx)),
            control_handle: Mutex::new(Some(control_handle)),
        })
    }

    /// Submit a job, returning whether the queue admitted it
    ///
    /// With an array-blocking queue this never blocks and returns `false` when
    /// the queue is full. With a linked-blocking queue it waits for room.
    /// Always `false` once shutdown has begun.
    pub fn add(&self, job: Job) -> bool {
        let admitted = self.shared.queue.add(job);
        let counter = if admitted {
            &self.shared.stats.jobs_submitted
        } else {
            &self.shared.stats.jobs_rejected
        };
        counter.fetch_add(1, Ordering::Relaxed);
        admitted
    }

    /// Submit `work` to be called with `args`, same admission rules as `add`
    pub fn join<F, A>(&self, work: F, args: A) -> bool
    where
        F: FnOnce(A) + Send + 'static,
        A: Send + 'static,
    {
        self.add(Job::with_args(work, args))
    }

    /// Get a snapshot of the statistics
    pub fn stats(&self) -> SchedulerStats {
        let mut stats = SchedulerStats {
            jobs_submitted: self.shared.stats.jobs_submitted.load(Ordering::Relaxed),
            jobs_rejected: self.shared.stats.jobs_rejected.load(Ordering::Relaxed),
            jobs_completed: 0,
            jobs_panicked: 0,
            queued: self.shared.queue.len(),
            total_workers: self.shared.workers.len(),
            active_workers: 0,
            busy_workers: 0,
        };

        for worker in &self.shared.workers {
            let worker_stats = worker.stats();
            stats.jobs_completed += worker_stats.jobs_executed.load(Ordering::Relaxed);
            stats.jobs_panicked += worker_stats.jobs_panicked.load(Ordering::Relaxed);
            match worker.state() {
                WorkerState::Busy => {
                    stats.active_workers += 1;
                    stats.busy_workers += 1;
                }
                WorkerState::Idle | WorkerState::Stopping => stats.active_workers += 1,
                WorkerState::Stopped => {}
            }
        }

        stats
    }

    /// Current state of every worker, in worker order
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.shared.workers.iter().map(|w| w.state()).collect()
    }

    /// Get the number of workers
    pub fn num_workers(&self) -> usize {
        self.shared.workers.len()
    }

    /// Number of jobs waiting in the queue
    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// The queue's admission policy
    pub fn queue_type(&self) -> QueueType {
        self.shared.queue.queue_type()
    }

    /// The queue's capacity
    pub fn queue_capacity(&self) -> usize {
        self.shared.queue.capacity()
    }

    /// Check if the scheduler is shutting down
    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Shutdown the scheduler, running every admitted job first
    pub fn shutdown(&self) -> Result<()> {
        self.shutdown_timeout(self.shared.config.shutdown_timeout)
    }

    /// Shutdown the scheduler with a timeout
    ///
    /// Admission is closed first, then every stopped worker is started so the
    /// queue drains. Returns `Error::Timeout` if workers are still running
    /// after `timeout`.
    pub fn shutdown_timeout(&self, timeout: Duration) -> Result<()> {
        if !self.shared.begin_shutdown() {
            return Err(Error::SchedulerShutdown);
        }
        self.stop_control_loop()?;

        let start = Instant::now();
        loop {
            // Drain workers exit once the queue is empty and no producer is left
            if !self.shared.queue.is_empty() {
                for worker in self.shared.workers.iter().filter(|w| !w.is_active()) {
                    if let Err(e) = worker.start() {
                        log::debug!("Worker {} not restarted for drain: {}", worker.id().0, e);
                    }
                }
            }

            if self.shared.all_stopped()
                && self.shared.queue.is_empty()
                && self.shared.queue.pending_producers() == 0
            {
                break;
            }

            if start.elapsed() > timeout {
                log::warn!("Scheduler shutdown timed out with {} jobs queued", self.queue_len());
                return Err(Error::Timeout);
            }

            thread::sleep(Duration::from_millis(10));
        }

        self.shared.join_workers()?;
        log::info!("Scheduler shut down successfully");
        Ok(())
    }

    /// Shutdown without running queued jobs
    ///
    /// Jobs already executing run to completion. Returns the number of queued
    /// jobs that were discarded.
    pub fn shutdown_now(&self) -> Result<usize> {
        if !self.shared.begin_shutdown() {
            return Err(Error::SchedulerShutdown);
        }
        self.stop_control_loop()?;

        for worker in &self.shared.workers {
            worker.stop();
        }

        let timeout = self.shared.config.shutdown_timeout;
        if !self.shared.queue.wait_for_producers(timeout) {
            return Err(Error::Timeout);
        }
        let mut discarded = self.shared.queue.drain();

        let start = Instant::now();
        while !self.shared.all_stopped() {
            if start.elapsed() > timeout {
                return Err(Error::Timeout);
            }
            thread::sleep(Duration::from_millis(10));
        }
        self.shared.join_workers()?;

        discarded += self.shared.queue.drain();
        log::info!("Scheduler shut down, discarded {} queued jobs", discarded);
        Ok(discarded)
    }

    fn stop_control_loop(&self) -> Result<()> {
        drop(self.control_stop.lock().take());

        let handle = self.control_handle.lock().take();
        if let Some(handle) = handle {
            handle.join().map_err(|_| Error::RuntimeError {
                reason: "Control thread panicked".to_string(),
            })?;
        }
        Ok(())
    }
}

impl Default for Scheduler {
    /// Array-blocking queue of capacity 1000 with 10 workers
    fn default() -> Self {
        Self::with_config(SchedulerConfig::default())
            .expect("Failed to create default scheduler")
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if !self.shared.begin_shutdown() {
            return;
        }

        // Without an explicit shutdown, queued jobs drain in the background
        drop(self.control_stop.lock().take());
        if !self.shared.queue.is_empty() {
            for worker in self.shared.workers.iter().filter(|w| !w.is_active()) {
                if let Err(e) = worker.start() {
                    log::warn!("Worker {} not restarted for drain: {}", worker.id().0, e);
                }
            }
        }
        log::debug!(
            "Scheduler dropped, draining {} queued jobs in the background",
            self.queue_len()
        );
    }
}
