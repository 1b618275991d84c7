//! Job scheduler implementation
//!
//! Manages job submission, priority ordering, cancellation and the running
//! job count workers report back through `complete_job`.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::cancel::{CancellationRegistry, CancellationToken};
use crate::priority::{Job, JobId, JobPriority, PriorityQueue};

/// Job scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total jobs submitted
    pub jobs_submitted: u64,

    /// Total jobs completed (including ones skipped because they were cancelled)
    pub jobs_completed: u64,

    /// Total jobs removed from the queue before starting
    pub jobs_cancelled: u64,

    /// Current queue size
    pub queue_size: usize,

    /// Jobs handed to a worker and not yet completed
    pub running: usize,
}

impl SchedulerStats {
    /// Jobs submitted but neither completed nor cancelled
    pub fn pending_jobs(&self) -> u64 {
        self.jobs_submitted
            .saturating_sub(self.jobs_completed + self.jobs_cancelled)
    }
}

/// Job scheduler with priority queue
///
/// Thread-safe. Each submitted job gets a cancellation token registered under
/// its ID until the job completes or is cancelled out of the queue.
///
/// # Example
///
/// ```
/// use photo_atlas_scheduler::{JobPriority, JobScheduler};
///
/// let scheduler = JobScheduler::new();
///
/// let (job_id, token) = scheduler.submit(JobPriority::General, "visible set");
///
/// if let Some(job) = scheduler.next_job() {
///     assert_eq!(job.id, job_id);
///     assert!(!token.is_cancelled());
///     scheduler.complete_job(job.id);
/// }
/// assert!(scheduler.is_idle());
/// ```
pub struct JobScheduler<T> {
    queue: PriorityQueue<T>,
    stats: Mutex<SchedulerStats>,
    cancellation: CancellationRegistry,
}

impl<T> JobScheduler<T> {
    pub fn new() -> Self {
        Self {
            queue: PriorityQueue::new(),
            stats: Mutex::new(SchedulerStats::default()),
            cancellation: CancellationRegistry::new(),
        }
    }

    /// Submit a job with a fresh cancellation token
    ///
    /// Returns `(job_id, token)`.
    pub fn submit(&self, priority: JobPriority, payload: T) -> (JobId, CancellationToken) {
        let token = CancellationToken::new();
        let job_id = self.submit_with_token(priority, payload, token.clone());
        (job_id, token)
    }

    /// Submit a job whose cancellation token the caller already holds
    pub fn submit_with_token(
        &self,
        priority: JobPriority,
        payload: T,
        token: CancellationToken,
    ) -> JobId {
        // Workers pop under the stats lock, so the job is registered and
        // counted before any of them can see it
        let mut stats = self.lock_stats();
        let job_id = self.queue.push(priority, payload);
        self.cancellation.register_token(job_id, token);
        stats.jobs_submitted += 1;
        job_id
    }

    /// Take the highest priority job
    ///
    /// The job counts as running until `complete_job()` is called for it.
    pub fn next_job(&self) -> Option<Job<T>> {
        // Hold the stats lock across the pop so `is_idle()` never observes
        // an empty queue with the job not yet counted as running
        let mut stats = self.lock_stats();
        let job = self.queue.pop()?;
        stats.running += 1;
        Some(job)
    }

    /// Mark a job taken with `next_job()` as finished
    pub fn complete_job(&self, job_id: JobId) {
        {
            let mut stats = self.lock_stats();
            stats.jobs_completed += 1;
            stats.running = stats.running.saturating_sub(1);
        }
        self.cancellation.unregister(job_id);
    }

    /// Cancel a job by ID
    ///
    /// A queued job is removed; a running job only has its token cancelled and
    /// the worker is expected to notice. Returns `true` if the job was found.
    pub fn cancel_job(&self, job_id: JobId) -> bool {
        let mut stats = self.lock_stats();
        let token_cancelled = self.cancellation.cancel(job_id);
        let removed = self.queue.remove_if(|job| job.id == job_id);

        if removed.is_empty() {
            token_cancelled
        } else {
            stats.jobs_cancelled += removed.len() as u64;
            self.cancellation.unregister(job_id);
            true
        }
    }

    /// Cancel and dequeue all queued jobs matching a predicate
    ///
    /// Returns the number of jobs removed.
    pub fn cancel_jobs_if<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Job<T>) -> bool,
    {
        let mut stats = self.lock_stats();
        let removed = self.queue.remove_if(predicate);
        if removed.is_empty() {
            return 0;
        }

        self.cancellation.cancel_many(&removed);
        for job_id in &removed {
            self.cancellation.unregister(*job_id);
        }
        stats.jobs_cancelled += removed.len() as u64;
        removed.len()
    }

    /// Drop every queued job, cancelling their tokens
    pub fn clear(&self) {
        self.cancel_jobs_if(|_| true);
    }

    /// Number of queued jobs
    pub fn pending_jobs(&self) -> usize {
        self.queue.len()
    }

    /// Number of jobs currently executing on a worker
    pub fn running_jobs(&self) -> usize {
        self.lock_stats().running
    }

    /// No queued and no running jobs
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.running_jobs() == 0
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = self.lock_stats().clone();
        stats.queue_size = self.queue.len();
        stats
    }

    /// Cancellation token of a queued or running job
    pub fn get_cancellation_token(&self, job_id: JobId) -> Option<CancellationToken> {
        self.cancellation.get(job_id)
    }

    fn lock_stats(&self) -> MutexGuard<'_, SchedulerStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> JobScheduler<T> {
    /// All queued jobs in arbitrary order (for inspection)
    pub fn pending_jobs_list(&self) -> Vec<Job<T>> {
        self.queue.jobs()
    }
}

impl<T> Default for JobScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}
