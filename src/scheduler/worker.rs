//! Worker thread implementation
//!
//! A worker is attached to the scheduler's admission queue for its whole
//! lifetime. Each `start` spawns a fresh OS thread that pulls jobs from the
//! queue until it is stopped or the queue is closed and drained.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use crossbeam::channel::{bounded, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use crate::error::{Error, Result};
use super::job::Job;

/// Unique identifier for a worker within its scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub usize);

impl WorkerId {
    /// Get the numeric ID
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// No thread is running for this worker
    Stopped,
    /// Running and waiting for work
    Idle,
    /// Running and executing jobs
    Busy,
    /// Asked to stop, finishing the current job
    Stopping,
}

impl WorkerState {
    fn as_usize(self) -> usize {
        match self {
            WorkerState::Stopped => 0,
            WorkerState::Idle => 1,
            WorkerState::Busy => 2,
            WorkerState::Stopping => 3,
        }
    }

    fn from_usize(value: usize) -> Self {
        match value {
            1 => WorkerState::Idle,
            2 => WorkerState::Busy,
            3 => WorkerState::Stopping,
            _ => WorkerState::Stopped,
        }
    }

    /// Whether a thread is running for this state
    pub fn is_active(self) -> bool {
        self != WorkerState::Stopped
    }
}

/// Statistics for a worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Number of jobs executed, including ones that panicked
    pub jobs_executed: AtomicUsize,
    /// Number of jobs that panicked
    pub jobs_panicked: AtomicUsize,
    /// Number of times the worker was started
    pub activations: AtomicUsize,
    /// Number of idle ticks observed with no job
    pub idle_ticks: AtomicUsize,
}

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker ID
    pub id: WorkerId,
    /// Thread name
    pub name: String,
    /// How long a worker waits for a job before it reports itself idle
    pub idle_tick: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: WorkerId(0),
            name: "pool-worker-0".to_string(),
            idle_tick: Duration::from_secs(1),
        }
    }
}

/// Worker that executes jobs from an attached queue
pub struct Worker {
    /// Worker configuration
    config: WorkerConfig,
    /// Current state, stored as `WorkerState::as_usize`
    state: Arc<AtomicUsize>,
    /// Receive side of the attached queue
    jobs: Receiver<Job>,
    /// Stop signal for the running thread
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
    /// Statistics
    stats: Arc<WorkerStats>,
    /// Thread handle of the current or last activation
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Create a stopped worker attached to `jobs`
    pub fn new(config: WorkerConfig, jobs: Receiver<Job>) -> Self {
        let (stop_tx, stop_rx) = bounded(1);
        Self {
            config,
            state: Arc::new(AtomicUsize::new(WorkerState::Stopped.as_usize())),
            jobs,
            stop_tx,
            stop_rx,
            stats: Arc::new(WorkerStats::default()),
            thread_handle: Mutex::new(None),
        }
    }

    /// Start the worker thread
    ///
    /// Fails if the worker is already active.
    pub fn start(&self) -> Result<()> {
        let mut handle = self.thread_handle.lock();

        if self.state().is_active() {
            return Err(Error::RuntimeError {
                reason: format!("Worker {} already started", self.config.id.0),
            });
        }

        // The previous thread has already published Stopped
        if let Some(previous) = handle.take() {
            if previous.join().is_err() {
                log::warn!("Worker {} previous thread panicked", self.config.id.0);
            }
        }
        while self.stop_rx.try_recv().is_ok() {}

        if !self.transition(WorkerState::Stopped, WorkerState::Idle) {
            return Err(Error::RuntimeError {
                reason: format!("Worker {} already started", self.config.id.0),
            });
        }

        let id = self.config.id;
        let idle_tick = self.config.idle_tick;
        let state = Arc::clone(&self.state);
        let jobs = self.jobs.clone();
        let stop_rx = self.stop_rx.clone();
        let stop_tx = self.stop_tx.clone();
        let stats = Arc::clone(&self.stats);

        let spawned = thread::Builder::new()
            .name(self.config.name.clone())
            .spawn(move || {
                // A dropped `Worker` must not look like a stop signal
                let _stop_tx = stop_tx;
                worker_loop(id, idle_tick, state, jobs, stop_rx, stats);
            });

        match spawned {
            Ok(thread) => {
                *handle = Some(thread);
                self.stats.activations.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.state.store(WorkerState::Stopped.as_usize(), Ordering::Release);
                Err(Error::SpawnError {
                    reason: format!("{}: {}", self.config.name, e),
                })
            }
        }
    }

    /// Ask the worker thread to exit after its current job
    ///
    /// Returns `false` if the worker was not active or is already stopping.
    pub fn stop(&self) -> bool {
        loop {
            let current = self.state();
            match current {
                WorkerState::Stopped | WorkerState::Stopping => return false,
                WorkerState::Idle | WorkerState::Busy => {
                    if self.transition(current, WorkerState::Stopping) {
                        let _ = self.stop_tx.try_send(());
                        return true;
                    }
                }
            }
        }
    }

    /// Join the thread of the last activation, if it has one
    ///
    /// Blocks until that thread exits, so callers stop the worker first.
    pub fn join(&self) -> Result<()> {
        let handle = self.thread_handle.lock().take();
        if let Some(handle) = handle {
            handle.join().map_err(|_| Error::RuntimeError {
                reason: format!("Worker {} thread panicked", self.config.id.0),
            })?;
        }
        Ok(())
    }

    /// Get the current state of the worker
    pub fn state(&self) -> WorkerState {
        WorkerState::from_usize(self.state.load(Ordering::Acquire))
    }

    /// Whether the worker is active and waiting for work
    pub fn is_idle(&self) -> bool {
        self.state() == WorkerState::Idle
    }

    /// Whether the worker has a running thread
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Get worker ID
    pub fn id(&self) -> WorkerId {
        self.config.id
    }

    /// Get the worker thread name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get worker statistics
    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            jobs_executed: AtomicUsize::new(self.stats.jobs_executed.load(Ordering::Relaxed)),
            jobs_panicked: AtomicUsize::new(self.stats.jobs_panicked.load(Ordering::Relaxed)),
            activations: AtomicUsize::new(self.stats.activations.load(Ordering::Relaxed)),
            idle_ticks: AtomicUsize::new(self.stats.idle_ticks.load(Ordering::Relaxed)),
        }
    }

    fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        transition(&self.state, from, to)
    }
}

fn transition(state: &AtomicUsize, from: WorkerState, to: WorkerState) -> bool {
    state
        .compare_exchange(from.as_usize(), to.as_usize(), Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}

/// Main worker loop
fn worker_loop(
    id: WorkerId,
    idle_tick: Duration,
    state: Arc<AtomicUsize>,
    jobs: Receiver<Job>,
    stop_rx: Receiver<()>,
    stats: Arc<WorkerStats>,
) {
    log::debug!("Worker {} started", id.0);

    loop {
        // Stopped while busy; no further job is dequeued
        if state.load(Ordering::Acquire) == WorkerState::Stopping.as_usize() {
            break;
        }

        select! {
            recv(stop_rx) -> _ => break,
            recv(jobs) -> job => match job {
                Ok(job) => {
                    // Fails when stopping; the dequeued job still runs
                    transition(&state, WorkerState::Idle, WorkerState::Busy);
                    run_job(id, job, &stats);
                }
                // Queue closed and drained
                Err(_) => break,
            },
            default(idle_tick) => {
                transition(&state, WorkerState::Busy, WorkerState::Idle);
                stats.idle_ticks.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    state.store(WorkerState::Stopped.as_usize(), Ordering::Release);
    log::debug!("Worker {} stopped", id.0);
}

/// Run one job, containing any panic it raises
fn run_job(id: WorkerId, job: Job, stats: &WorkerStats) {
    let job_id = job.id();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.run()));

    stats.jobs_executed.fetch_add(1, Ordering::Relaxed);
    if let Err(payload) = outcome {
        stats.jobs_panicked.fetch_add(1, Ordering::Relaxed);
        log::error!(
            "Job {} panicked on worker {}: {}",
            job_id,
            id.0,
            panic_message(payload.as_ref())
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}
