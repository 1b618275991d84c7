//! Worker pool for parallel atlas builds.
//!
//! Workers run on their own threads, pulling jobs from the scheduler and
//! executing them. Builds are the only long-running work in the system, so
//! they always happen here and never on the thread that raised a signal.

use crate::{CancellationToken, Job, JobScheduler};
use log::{debug, info};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Callback executing one job.
///
/// Receives the job and its cancellation token. Long builds should poll
/// `token.is_cancelled()` and return early.
pub type JobExecutor<T> = Arc<dyn Fn(&Job<T>, &CancellationToken) + Send + Sync>;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads to spawn.
    /// Default: number of logical CPU cores.
    pub num_workers: usize,

    /// How long an idle worker sleeps before polling again.
    /// Default: 5ms.
    pub poll_interval: Duration,

    /// Thread name prefix; workers are named `{prefix}-{index}`.
    pub thread_name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::new(num_cpus())
    }
}

impl WorkerPoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            poll_interval: Duration::from_millis(5),
            thread_name: "atlas-build-worker".to_string(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// Pool of worker threads executing scheduled jobs.
///
/// # Example
///
/// ```
/// use photo_atlas_scheduler::{CancellationToken, Job, JobPriority, JobScheduler, WorkerPool, WorkerPoolConfig};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let scheduler = Arc::new(JobScheduler::new());
///
/// let executor = Arc::new(|job: &Job<u32>, token: &CancellationToken| {
///     if token.is_cancelled() {
///         return;
///     }
///     let _ = job.payload * 2;
/// });
///
/// let pool = WorkerPool::new(scheduler.clone(), executor, WorkerPoolConfig::new(2));
/// scheduler.submit(JobPriority::General, 21);
///
/// while !scheduler.is_idle() {
///     std::thread::sleep(Duration::from_millis(1));
/// }
/// pool.shutdown();
/// ```
pub struct WorkerPool {
    workers: Vec<Worker>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawn the workers.
    pub fn new<T: Send + Sync + 'static>(
        scheduler: Arc<JobScheduler<T>>,
        executor: JobExecutor<T>,
        config: WorkerPoolConfig,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let workers = (0..config.num_workers)
            .map(|id| {
                Worker::spawn(
                    format!("{}-{}", config.thread_name, id),
                    scheduler.clone(),
                    executor.clone(),
                    shutdown.clone(),
                    config.poll_interval,
                )
            })
            .collect();

        info!("started {} atlas build worker(s)", config.num_workers);
        Self { workers, shutdown }
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop all workers and wait for them to finish their current job.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Release);
        for worker in std::mem::take(&mut self.workers) {
            worker.join();
        }
        info!("atlas build workers stopped");
    }
}

impl Drop for WorkerPool {
    /// Signal shutdown without waiting; workers exit after their current job.
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

struct Worker {
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn<T: Send + Sync + 'static>(
        name: String,
        scheduler: Arc<JobScheduler<T>>,
        executor: JobExecutor<T>,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> Self {
        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || Self::run(scheduler, executor, shutdown, poll_interval))
            .expect("Failed to spawn worker thread");

        Self {
            thread: Some(thread),
        }
    }

    fn run<T>(
        scheduler: Arc<JobScheduler<T>>,
        executor: JobExecutor<T>,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) {
        while !shutdown.load(Ordering::Acquire) {
            let Some(job) = scheduler.next_job() else {
                thread::sleep(poll_interval);
                continue;
            };

            let token = scheduler
                .get_cancellation_token(job.id)
                .unwrap_or_default();

            if token.is_cancelled() {
                debug!("skipping cancelled job {}", job.id);
            } else {
                executor(&job, &token);
            }

            scheduler.complete_job(job.id);
        }
    }

    fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("atlas build worker panicked");
            }
        }
    }
}

/// Number of logical CPU cores, the default worker count.
fn num_cpus() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobPriority;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Instant;

    fn wait_idle<T>(scheduler: &JobScheduler<T>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !scheduler.is_idle() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_worker_pool_config() {
        let config = WorkerPoolConfig::default();
        assert!(config.num_workers > 0);

        let config = WorkerPoolConfig::new(4)
            .with_poll_interval(Duration::from_millis(50))
            .with_thread_name("test-worker");
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.thread_name, "test-worker");
    }

    #[test]
    fn test_worker_pool_executes_jobs() {
        let scheduler = Arc::new(JobScheduler::new());
        let executed = Arc::new(AtomicUsize::new(0));
        let executed_clone = executed.clone();

        let executor: JobExecutor<u32> =
            Arc::new(move |_job: &Job<u32>, _token: &CancellationToken| {
                executed_clone.fetch_add(1, Ordering::SeqCst);
            });

        let pool = WorkerPool::new(scheduler.clone(), executor, WorkerPoolConfig::new(2));
        assert_eq!(pool.num_workers(), 2);

        for i in 0..5 {
            scheduler.submit(JobPriority::General, i);
        }
        wait_idle(&scheduler);

        assert_eq!(executed.load(Ordering::SeqCst), 5);
        assert_eq!(scheduler.stats().jobs_completed, 5);
        pool.shutdown();
    }

    #[test]
    fn test_worker_pool_skips_cancelled_jobs() {
        let scheduler = Arc::new(JobScheduler::new());
        let executed = Arc::new(Mutex::new(Vec::new()));
        let executed_clone = executed.clone();

        let executor: JobExecutor<u32> =
            Arc::new(move |job: &Job<u32>, _token: &CancellationToken| {
                executed_clone.lock().unwrap().push(job.payload);
            });

        // Queue before starting the pool so cancellation happens first
        let (_, token) = scheduler.submit(JobPriority::General, 1);
        scheduler.submit(JobPriority::General, 2);
        token.cancel();

        let pool = WorkerPool::new(scheduler.clone(), executor, WorkerPoolConfig::new(1));
        wait_idle(&scheduler);

        assert_eq!(*executed.lock().unwrap(), vec![2]);
        pool.shutdown();
    }

    #[test]
    fn test_worker_pool_priority_ordering() {
        let scheduler = Arc::new(JobScheduler::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let order_clone = order.clone();

        let executor: JobExecutor<&'static str> =
            Arc::new(move |job: &Job<&'static str>, _token: &CancellationToken| {
                order_clone.lock().unwrap().push(job.payload);
            });

        scheduler.submit(JobPriority::Base, "base");
        scheduler.submit(JobPriority::SelectionContext, "selection");
        scheduler.submit(JobPriority::General, "general");

        let pool = WorkerPool::new(scheduler.clone(), executor, WorkerPoolConfig::new(1));
        wait_idle(&scheduler);

        assert_eq!(*order.lock().unwrap(), vec!["selection", "general", "base"]);
        pool.shutdown();
    }

    #[test]
    fn test_worker_pool_shutdown() {
        let scheduler: Arc<JobScheduler<()>> = Arc::new(JobScheduler::new());
        let executor: JobExecutor<()> = Arc::new(|_job: &Job<()>, _token: &CancellationToken| {});

        let pool = WorkerPool::new(scheduler, executor, WorkerPoolConfig::new(2));
        assert!(!pool.is_shutting_down());
        pool.shutdown();
    }

    #[test]
    fn test_num_cpus() {
        let cpus = num_cpus();
        assert!(cpus > 0);
        assert!(cpus <= 1024);
    }
}
