//! Priority queue for atlas build jobs
//!
//! Builds for different buckets compete for the same workers. A build for the
//! selected photo matters most, then the focused cell, then the visible set,
//! then base-tier bootstrap work. Equal priorities run FIFO.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Job priority levels
///
/// Higher values are executed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPriority {
    /// Base-tier bootstrap (lowest priority)
    Base = 0,

    /// Visible-set generation for the general bucket
    General = 1,

    /// Focused grid cell
    FocusedContext = 2,

    /// The explicitly selected photo (highest priority)
    SelectionContext = 3,
}

/// Unique job identifier
pub type JobId = u64;

/// A scheduled job carrying a payload
///
/// Ordered by priority, then by insertion order (earlier first).
#[derive(Debug, Clone)]
pub struct Job<T> {
    /// Unique job identifier
    pub id: JobId,

    /// Job priority level
    pub priority: JobPriority,

    /// What to execute
    pub payload: T,

    insertion_order: u64,
}

impl<T> Job<T> {
    pub fn new(id: JobId, priority: JobPriority, payload: T, insertion_order: u64) -> Self {
        Self {
            id,
            priority,
            payload,
            insertion_order,
        }
    }
}

impl<T> PartialEq for Job<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Job<T> {}

impl<T> PartialOrd for Job<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Job<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            // BinaryHeap is a max heap: reverse insertion order for FIFO
            Ordering::Equal => other.insertion_order.cmp(&self.insertion_order),
            other => other,
        }
    }
}

/// Thread-safe priority queue of jobs
pub struct PriorityQueue<T> {
    state: Mutex<QueueState<T>>,
}

struct QueueState<T> {
    heap: BinaryHeap<Job<T>>,
    next_job_id: JobId,
    insertion_counter: u64,
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_job_id: 1,
                insertion_counter: 0,
            }),
        }
    }

    /// Push a job, returning its assigned ID
    pub fn push(&self, priority: JobPriority, payload: T) -> JobId {
        let mut state = self.lock();
        let job_id = state.next_job_id;
        state.next_job_id += 1;

        let insertion_order = state.insertion_counter;
        state.insertion_counter += 1;

        state
            .heap
            .push(Job::new(job_id, priority, payload, insertion_order));
        job_id
    }

    /// Pop the highest priority job
    pub fn pop(&self) -> Option<Job<T>> {
        self.lock().heap.pop()
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    /// Drop every queued job
    pub fn clear(&self) {
        self.lock().heap.clear();
    }

    /// Remove all jobs matching a predicate, returning their IDs
    pub fn remove_if<F>(&self, predicate: F) -> Vec<JobId>
    where
        F: Fn(&Job<T>) -> bool,
    {
        let mut state = self.lock();
        let (removed, remaining): (Vec<_>, Vec<_>) =
            state.heap.drain().partition(|job| predicate(job));
        state.heap = remaining.into_iter().collect();
        removed.into_iter().map(|job| job.id).collect()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> PriorityQueue<T> {
    /// Peek at the highest priority job without removing it
    pub fn peek(&self) -> Option<Job<T>> {
        self.lock().heap.peek().cloned()
    }

    /// All queued jobs in arbitrary order (for inspection)
    pub fn jobs(&self) -> Vec<Job<T>> {
        self.lock().heap.iter().cloned().collect()
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_priority_ordering() {
        assert!(JobPriority::SelectionContext > JobPriority::FocusedContext);
        assert!(JobPriority::FocusedContext > JobPriority::General);
        assert!(JobPriority::General > JobPriority::Base);
    }

    #[test]
    fn test_priority_queue_basic() {
        let queue = PriorityQueue::new();
        assert!(queue.is_empty());

        let id = queue.push(JobPriority::General, "visible");
        assert_eq!(queue.len(), 1);

        let job = queue.pop().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.payload, "visible");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_priority_queue_ordering() {
        let queue = PriorityQueue::new();

        queue.push(JobPriority::Base, "base");
        queue.push(JobPriority::General, "general");
        queue.push(JobPriority::SelectionContext, "selection");
        queue.push(JobPriority::FocusedContext, "focused");

        assert_eq!(queue.pop().unwrap().payload, "selection");
        assert_eq!(queue.pop().unwrap().payload, "focused");
        assert_eq!(queue.pop().unwrap().payload, "general");
        assert_eq!(queue.pop().unwrap().payload, "base");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_fifo_within_priority() {
        let queue = PriorityQueue::new();

        let first = queue.push(JobPriority::General, 1);
        let second = queue.push(JobPriority::General, 2);
        let third = queue.push(JobPriority::General, 3);

        assert_eq!(queue.pop().unwrap().id, first);
        assert_eq!(queue.pop().unwrap().id, second);
        assert_eq!(queue.pop().unwrap().id, third);
    }

    #[test]
    fn test_remove_if() {
        let queue = PriorityQueue::new();

        queue.push(JobPriority::General, 1);
        let focused = queue.push(JobPriority::FocusedContext, 2);
        queue.push(JobPriority::General, 3);

        let removed = queue.remove_if(|job| job.priority == JobPriority::FocusedContext);
        assert_eq!(removed, vec![focused]);
        assert_eq!(queue.len(), 2);
        assert!(queue
            .jobs()
            .iter()
            .all(|job| job.priority == JobPriority::General));
    }

    #[test]
    fn test_peek_and_clear() {
        let queue = PriorityQueue::new();
        queue.push(JobPriority::Base, 'a');
        queue.push(JobPriority::SelectionContext, 'b');

        assert_eq!(queue.peek().unwrap().payload, 'b');
        assert_eq!(queue.len(), 2);

        queue.clear();
        assert!(queue.is_empty());
    }
}
