//! Units of work submitted to a scheduler

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

static JOB_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A job that can be executed by a worker
///
/// A job owns its closure and everything the closure captured. It is consumed
/// by [`Job::run`], so it can only ever execute once.
pub struct Job {
    /// The actual work to be done
    work: Box<dyn FnOnce() + Send + 'static>,
    /// Job ID for debugging
    id: u64,
}

impl Job {
    /// Create a new job from a closure
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            work: Box::new(work),
            id: JOB_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Create a job that calls `work` with `args`
    ///
    /// `args` can be any sendable value, a tuple for several arguments.
    pub fn with_args<F, A>(work: F, args: A) -> Self
    where
        F: FnOnce(A) + Send + 'static,
        A: Send + 'static,
    {
        Self::new(move || work(args))
    }

    /// Execute the job
    pub fn run(self) {
        (self.work)();
    }

    /// Get job ID
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[test]
    fn test_job_runs_closure() {
        let executed = Arc::new(AtomicBool::new(false));
        let executed_clone = Arc::clone(&executed);

        let job = Job::new(move || {
            executed_clone.store(true, Ordering::Release);
        });

        job.run();
        assert!(executed.load(Ordering::Acquire));
    }

    #[test]
    fn test_job_with_args() {
        let total = Arc::new(AtomicUsize::new(0));

        let job = Job::with_args(
            |(n, total): (usize, Arc<AtomicUsize>)| {
                total.fetch_add(n, Ordering::Relaxed);
            },
            (7, Arc::clone(&total)),
        );

        job.run();
        assert_eq!(total.load(Ordering::Relaxed), 7);
    }

    #[test]
    fn test_job_ids_are_unique() {
        let a = Job::new(|| {});
        let b = Job::new(|| {});
        assert_ne!(a.id(), b.id());
        assert!(format!("{:?}", a).starts_with("Job"));
    }
}
