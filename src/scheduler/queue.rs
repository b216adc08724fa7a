//! Admission queues
//!
//! Every queue is a bounded crossbeam channel. The variants differ only in
//! what `add` does when the buffer is full: [`ArrayQueue`] rejects the job,
//! [`LinkedQueue`] blocks the producer until a worker makes room.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use crossbeam::channel::{bounded, Receiver, Sender, SendTimeoutError, TrySendError};
use parking_lot::RwLock;
use crate::error::{Error, Result};
use super::job::Job;

/// How often a blocked producer re-checks whether the queue was closed
const ADMISSION_RECHECK: Duration = Duration::from_millis(50);

/// Queue type, selecting the admission policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    /// Synchronous hand-off queue (declared, not supported)
    Synchronous,
    /// Bounded queue, `add` fails immediately when the queue is full
    ArrayBlocking,
    /// Bounded queue, `add` waits until there is room
    LinkedBlocking,
    /// Priority queue (declared, not supported)
    Priority,
}

impl QueueType {
    /// Whether this queue type has an admission policy behind it
    pub fn is_supported(self) -> bool {
        matches!(self, QueueType::ArrayBlocking | QueueType::LinkedBlocking)
    }
}

/// Capability shared by all admission queues
pub trait Queue {
    /// Offer a job to the queue, returning whether it was admitted
    fn add(&self, job: Job) -> bool;

    /// Receive side of the queue; each job is delivered to exactly one receiver
    fn poll(&self) -> &Receiver<Job>;

    /// Number of buffered jobs not yet polled (advisory)
    fn len(&self) -> usize;

    /// Whether the buffer is currently empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Channel and bookkeeping common to every queue variant
struct BaseQueue {
    /// Admission side; `None` once the queue is closed
    sender: RwLock<Option<Sender<Job>>>,
    receiver: Receiver<Job>,
    capacity: usize,
    /// Producers currently inside `add`
    pending_producers: AtomicUsize,
    /// Rejected admissions since the last `take_rejections`
    rejections: AtomicUsize,
}

impl BaseQueue {
    fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender: RwLock::new(Some(sender)),
            receiver,
            capacity,
            pending_producers: AtomicUsize::new(0),
            rejections: AtomicUsize::new(0),
        }
    }

    /// Register a producer and hand it a sender, unless the queue is closed
    fn enter(&self) -> Option<ProducerGuard<'_>> {
        let sender = self.sender.read().clone()?;
        self.pending_producers.fetch_add(1, Ordering::AcqRel);
        Some(ProducerGuard { queue: self, sender })
    }

    fn reject(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }
}

/// Keeps `pending_producers` accurate for the duration of one `add`
struct ProducerGuard<'a> {
    queue: &'a BaseQueue,
    sender: Sender<Job>,
}

impl Drop for ProducerGuard<'_> {
    fn drop(&mut self) {
        self.queue.pending_producers.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bounded queue that rejects jobs when full
pub struct ArrayQueue {
    base: BaseQueue,
}

impl ArrayQueue {
    /// Create a queue holding at most `capacity` jobs
    pub fn new(capacity: usize) -> Self {
        Self { base: BaseQueue::new(capacity) }
    }
}

impl Queue for ArrayQueue {
    fn add(&self, job: Job) -> bool {
        let Some(producer) = self.base.enter() else {
            return false;
        };

        match producer.sender.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                log::debug!("Queue full, rejected job {}", job.id());
                self.base.reject();
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    fn poll(&self) -> &Receiver<Job> {
        &self.base.receiver
    }

    fn len(&self) -> usize {
        self.base.receiver.len()
    }
}

/// Bounded queue that blocks producers until there is room
pub struct LinkedQueue {
    base: BaseQueue,
}

impl LinkedQueue {
    /// Create a queue buffering up to `capacity` jobs before producers block
    pub fn new(capacity: usize) -> Self {
        Self { base: BaseQueue::new(capacity) }
    }
}

impl Queue for LinkedQueue {
    fn add(&self, job: Job) -> bool {
        let Some(producer) = self.base.enter() else {
            return false;
        };

        let mut job = job;
        loop {
            match producer.sender.send_timeout(job, ADMISSION_RECHECK) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(pending)) => {
                    // Closing must also release producers parked on a full buffer
                    if self.base.is_closed() {
                        log::debug!("Queue closed while job {} waited for room", pending.id());
                        return false;
                    }
                    job = pending;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }

    fn poll(&self) -> &Receiver<Job> {
        &self.base.receiver
    }

    fn len(&self) -> usize {
        self.base.receiver.len()
    }
}

/// The admission queue owned by a scheduler
pub enum JobQueue {
    /// Reject-when-full policy
    Array(ArrayQueue),
    /// Block-until-room policy
    Linked(LinkedQueue),
}

impl JobQueue {
    /// Build the queue for `queue_type`
    ///
    /// Synchronous and priority queues are rejected rather than mapped onto
    /// another policy.
    pub fn new(queue_type: QueueType, capacity: usize) -> Result<Self> {
        match queue_type {
            QueueType::ArrayBlocking => Ok(JobQueue::Array(ArrayQueue::new(capacity))),
            QueueType::LinkedBlocking => Ok(JobQueue::Linked(LinkedQueue::new(capacity))),
            QueueType::Synchronous | QueueType::Priority => {
                Err(Error::UnsupportedQueue(queue_type))
            }
        }
    }

    fn base(&self) -> &BaseQueue {
        match self {
            JobQueue::Array(q) => &q.base,
            JobQueue::Linked(q) => &q.base,
        }
    }

    /// The queue type this queue was built for
    pub fn queue_type(&self) -> QueueType {
        match self {
            JobQueue::Array(_) => QueueType::ArrayBlocking,
            JobQueue::Linked(_) => QueueType::LinkedBlocking,
        }
    }

    /// Maximum number of buffered jobs
    pub fn capacity(&self) -> usize {
        self.base().capacity
    }

    /// Number of producers currently inside `add`
    pub fn pending_producers(&self) -> usize {
        self.base().pending_producers.load(Ordering::Acquire)
    }

    /// Return and reset the number of rejections since the previous call
    pub fn take_rejections(&self) -> usize {
        self.base().rejections.swap(0, Ordering::Relaxed)
    }

    /// Stop admitting jobs
    ///
    /// Buffered jobs stay available to `poll`. Once they are drained and all
    /// producers have left `add`, receivers observe a disconnected channel.
    /// Returns `false` if the queue was already closed.
    pub fn close(&self) -> bool {
        self.base().sender.write().take().is_some()
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.base().is_closed()
    }

    /// Wait until no producer is inside `add`, up to `timeout`
    pub fn wait_for_producers(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        while self.pending_producers() > 0 {
            if start.elapsed() > timeout {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        true
    }

    /// Discard every buffered job, returning how many were dropped
    pub fn drain(&self) -> usize {
        self.poll().try_iter().count()
    }
}

impl Queue for JobQueue {
    fn add(&self, job: Job) -> bool {
        match self {
            JobQueue::Array(q) => q.add(job),
            JobQueue::Linked(q) => q.add(job),
        }
    }

    fn poll(&self) -> &Receiver<Job> {
        match self {
            JobQueue::Array(q) => q.poll(),
            JobQueue::Linked(q) => q.poll(),
        }
    }

    fn len(&self) -> usize {
        match self {
            JobQueue::Array(q) => q.len(),
            JobQueue::Linked(q) => q.len(),
        }
    }
}
