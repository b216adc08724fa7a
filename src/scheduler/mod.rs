//! Bounded-concurrency scheduler
//!
//! A [`Scheduler`] owns one admission [`JobQueue`] and a fixed set of
//! [`Worker`]s attached to it. Workers are started and stopped by the
//! scheduler's control loop as queue pressure rises and falls.

pub mod job;
pub mod queue;
pub mod worker;
pub mod core;

pub use self::core::{global, Scheduler, SchedulerConfig, SchedulerStats, GLOBAL_SCHEDULER};
pub use job::Job;
pub use queue::{ArrayQueue, JobQueue, LinkedQueue, Queue, QueueType};
pub use worker::{Worker, WorkerConfig, WorkerId, WorkerState, WorkerStats};
