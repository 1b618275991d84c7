//! Result publisher
//!
//! After every install or clear the publisher takes a fresh cache snapshot and
//! sends it to every subscriber, together with the build failures currently
//! attached to each bucket kind. The UI renders from these events; a debug
//! overlay can serialize the snapshot directly.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::error;
use photo_atlas_cache::{BucketKind, BucketManager, CacheSnapshot};
use serde::Serialize;

use crate::builder::BuildError;

/// A build failure attached to the bucket it was meant for
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildFailureRecord {
    pub bucket: BucketKind,
    pub message: String,
    pub fatal: bool,
    pub at: SystemTime,
}

/// What subscribers receive
#[derive(Debug, Clone)]
pub struct AtlasEvent {
    /// Increases with snapshot time
    pub sequence: u64,
    pub snapshot: Arc<CacheSnapshot>,
    /// Failures not yet superseded by a successful install, in bucket order
    pub failures: Vec<BuildFailureRecord>,
}

impl AtlasEvent {
    pub fn has_fatal(&self) -> bool {
        self.failures.iter().any(|failure| failure.fatal)
    }
}

struct PublisherState {
    sequence: u64,
    failures: BTreeMap<BucketKind, BuildFailureRecord>,
    subscribers: Vec<Sender<AtlasEvent>>,
    latest: Option<AtlasEvent>,
    fatal_reported: bool,
}

/// Fans cache snapshots and failure records out to subscribers
pub struct ResultPublisher {
    manager: Arc<BucketManager>,
    state: Mutex<PublisherState>,
}

impl ResultPublisher {
    pub fn new(manager: Arc<BucketManager>) -> Self {
        Self {
            manager,
            state: Mutex::new(PublisherState {
                sequence: 0,
                failures: BTreeMap::new(),
                subscribers: Vec::new(),
                latest: None,
                fatal_reported: false,
            }),
        }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> Receiver<AtlasEvent> {
        let (tx, rx) = unbounded();
        self.lock().subscribers.push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Snapshot the cache and emit an event.
    pub fn publish(&self) -> AtlasEvent {
        let mut state = self.lock();
        self.emit(&mut state)
    }

    /// A build for `kind` was installed: drop its failure record and emit.
    pub fn record_install(&self, kind: BucketKind) -> AtlasEvent {
        let mut state = self.lock();
        state.failures.remove(&kind);
        self.emit(&mut state)
    }

    /// Attach a build failure to `kind` and emit.
    pub fn report_failure(&self, kind: BucketKind, err: &BuildError) -> AtlasEvent {
        let record = BuildFailureRecord {
            bucket: kind,
            message: err.to_string(),
            fatal: err.is_fatal(),
            at: SystemTime::now(),
        };
        if record.fatal {
            error!("fatal build failure for {} bucket: {}", kind, record.message);
        }

        let mut state = self.lock();
        state.fatal_reported |= record.fatal;
        state.failures.insert(kind, record);
        self.emit(&mut state)
    }

    /// Most recent event, if anything has been published.
    pub fn latest(&self) -> Option<AtlasEvent> {
        self.lock().latest.clone()
    }

    /// Current failure records in bucket order.
    pub fn failures(&self) -> Vec<BuildFailureRecord> {
        self.lock().failures.values().cloned().collect()
    }

    /// Whether an out-of-memory failure has ever been reported.
    pub fn has_fatal(&self) -> bool {
        self.lock().fatal_reported
    }

    // The snapshot is taken under the publisher lock so sequence order
    // matches snapshot order
    fn emit(&self, state: &mut PublisherState) -> AtlasEvent {
        state.sequence += 1;
        let event = AtlasEvent {
            sequence: state.sequence,
            snapshot: Arc::new(self.manager.snapshot()),
            failures: state.failures.values().cloned().collect(),
        };

        state
            .subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
        state.latest = Some(event.clone());
        event
    }

    fn lock(&self) -> MutexGuard<'_, PublisherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
