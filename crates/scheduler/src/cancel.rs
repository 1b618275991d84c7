//! Cancellation tokens for atlas build jobs
//!
//! A build that has been superseded by a newer context signal is cancelled
//! cooperatively: the builder may poll the token and stop early, and whoever
//! installs results checks the token before installing.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use crate::JobId;

/// Cancellation token for cooperative job cancellation
///
/// Clones share the same underlying flag, so the signal router can keep one
/// clone while the worker executing the build holds another.
///
/// # Example
///
/// ```
/// use photo_atlas_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// // A newer signal supersedes the build
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel this token
    ///
    /// All clones observe the cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether `cancel()` has been called on this token or any clone
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether two tokens share the same flag
    pub fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

/// Registry associating job IDs with their cancellation tokens
///
/// # Example
///
/// ```
/// use photo_atlas_scheduler::{CancellationRegistry, JobId};
///
/// let registry = CancellationRegistry::new();
///
/// let job_id: JobId = 1;
/// let token = registry.register(job_id);
///
/// registry.cancel(job_id);
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
}

impl CancellationRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job with a fresh token and return a clone of it
    pub fn register(&self, job_id: JobId) -> CancellationToken {
        let token = CancellationToken::new();
        self.register_token(job_id, token.clone());
        token
    }

    /// Register a job with a token created by the caller
    ///
    /// Used when the submitter already handed the token to someone else
    /// (the signal router keeps it to supersede the build later).
    pub fn register_token(&self, job_id: JobId, token: CancellationToken) {
        self.lock().insert(job_id, token);
    }

    /// Cancel a job by ID
    ///
    /// Returns `true` if the job was registered.
    pub fn cancel(&self, job_id: JobId) -> bool {
        match self.lock().get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel several jobs, returning how many were registered
    pub fn cancel_many(&self, job_ids: &[JobId]) -> usize {
        let tokens = self.lock();
        job_ids
            .iter()
            .filter_map(|job_id| tokens.get(job_id))
            .map(CancellationToken::cancel)
            .count()
    }

    /// Cancel every registered job, returning how many there were
    pub fn cancel_all(&self) -> usize {
        let tokens = self.lock();
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }

    /// Remove a job (completed or dropped from the queue)
    pub fn unregister(&self, job_id: JobId) -> bool {
        self.lock().remove(&job_id).is_some()
    }

    /// Token for a job, if still registered
    pub fn get(&self, job_id: JobId) -> Option<CancellationToken> {
        self.lock().get(&job_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forget all tokens without cancelling them
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
