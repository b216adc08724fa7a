//! Error types for rust-pool
//!
//! Admission failures are not errors: `Scheduler::add` reports them as `false`.
//! Everything here is a configuration or lifecycle failure.

use thiserror::Error;
use crate::scheduler::queue::QueueType;

/// Main error type for rust-pool operations
#[derive(Error, Debug)]
pub enum Error {
    /// Scheduler configuration was rejected
    #[error("Invalid pool configuration: {reason}")]
    InvalidConfig {
        /// Reason the configuration was rejected
        reason: String
    },

    /// Queue type is declared but has no admission policy behind it
    #[error("Queue type {0:?} is not supported")]
    UnsupportedQueue(QueueType),

    /// Worker thread could not be spawned
    #[error("Failed to spawn worker thread: {reason}")]
    SpawnError {
        /// Reason for the spawn failure
        reason: String
    },

    /// Operation refused because the scheduler is shutting down
    #[error("Scheduler is shut down")]
    SchedulerShutdown,

    /// Runtime error
    #[error("Runtime error: {reason}")]
    RuntimeError {
        /// Reason for the runtime error
        reason: String
    },

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,
}

impl Error {
    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Error::InvalidConfig { reason: reason.into() }
    }
}

/// Convenient result type alias
pub type Result<T> = std::result::Result<T, Error>;
