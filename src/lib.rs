//! # rust-pool
//!
//! A bounded-concurrency job scheduler: callers submit jobs to an admission
//! queue and a pool of reusable worker threads drains it.
//!
//! ## Features
//!
//! - **Admission policies**: reject when full (`ArrayBlocking`) or wait for
//!   room (`LinkedBlocking`)
//! - **Adaptive workers**: a control loop starts workers while jobs are queued
//!   and releases idle ones when the queue stays empty
//! - **Panic isolation**: a panicking job is logged and counted, its worker
//!   keeps running
//! - **Explicit shutdown**: drain every admitted job, or discard the queue
//!
//! ## Quick Start
//!
//! ```rust
//! use rust_pool::prelude::*;
//! use crossbeam::channel::unbounded;
//!
//! # fn main() -> Result<()> {
//! let scheduler = Scheduler::new_blocking(4)?;
//! let (tx, rx) = unbounded();
//!
//! for start in (1..=100).step_by(10) {
//!     let tx = tx.clone();
//!     scheduler.join(move |first: u32| {
//!         tx.send((first..first + 10).sum::<u32>()).unwrap();
//!     }, start);
//! }
//!
//! let total: u32 = rx.iter().take(10).sum();
//! assert_eq!(total, 5050);
//!
//! scheduler.shutdown()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod error;
pub mod scheduler;

/// Convenient re-exports for common functionality
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::scheduler::{
        global, Job, QueueType, Scheduler, SchedulerConfig, SchedulerStats, WorkerState,
    };
}

pub use error::{Error, Result};
pub use scheduler::{Job, QueueType, Scheduler, SchedulerConfig};
