//! Photo Atlas Scheduler Library
//!
//! Job scheduler with priority queue and cancellable workers.
//!
//! Atlas builds for the four cache buckets compete for a shared pool of
//! worker threads. Jobs are ordered by the bucket they target (selection,
//! focused cell, visible set, base tier) and run FIFO within each priority
//! level. Every job carries a cancellation token so a build superseded by a
//! newer signal can stop early and will never be installed.
//!
//! # Example
//!
//! ```
//! use photo_atlas_scheduler::{JobPriority, JobScheduler};
//!
//! #[derive(Clone)]
//! struct BuildRequest {
//!     photo_ids: Vec<u64>,
//! }
//!
//! let scheduler = JobScheduler::new();
//!
//! let (job_id, token) = scheduler.submit(
//!     JobPriority::FocusedContext,
//!     BuildRequest { photo_ids: vec![1, 2, 3] },
//! );
//!
//! // A newer focus signal arrives before the build starts
//! token.cancel();
//!
//! if let Some(job) = scheduler.next_job() {
//!     assert_eq!(job.id, job_id);
//!     assert_eq!(job.payload.photo_ids.len(), 3);
//!     let token = scheduler.get_cancellation_token(job.id).unwrap();
//!     assert!(token.is_cancelled());
//!     scheduler.complete_job(job.id);
//! }
//! ```

mod cancel;
mod priority;
mod scheduler;
mod worker;

// Re-export public API
pub use cancel::{CancellationRegistry, CancellationToken};
pub use priority::{Job, JobId, JobPriority, PriorityQueue};
pub use scheduler::{JobScheduler, SchedulerStats};
pub use worker::{JobExecutor, WorkerPool, WorkerPoolConfig};
