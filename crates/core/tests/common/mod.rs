//! Shared fixtures for router integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use photo_atlas_cache::{AtlasSurface, BucketManager, LodLevel, PhotoId, PhotoRegion, Rect, TextureAtlas};
use photo_atlas_core::{AtlasBuilder, BuildError, BuildResult, ContextSignalRouter, EngineConfig};
use photo_atlas_scheduler::CancellationToken;

pub const TILE: u32 = 16;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn photos(ids: impl IntoIterator<Item = u64>) -> Vec<PhotoId> {
    ids.into_iter().map(PhotoId).collect()
}

/// Builder that records its calls and lays photos out in a row.
///
/// Failures can be injected for every following build, and a build touching
/// a held photo blocks until the hold is released.
pub struct FakeBuilder {
    calls: AtomicUsize,
    builds: Mutex<Vec<(Vec<PhotoId>, LodLevel)>>,
    failure: Mutex<Option<BuildError>>,
    holds: Mutex<HashMap<PhotoId, Receiver<()>>>,
    started_tx: Sender<Vec<PhotoId>>,
    started_rx: Receiver<Vec<PhotoId>>,
}

impl FakeBuilder {
    pub fn new() -> Arc<Self> {
        let (started_tx, started_rx) = unbounded();
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            builds: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            holds: Mutex::new(HashMap::new()),
            started_tx,
            started_rx,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn builds(&self) -> Vec<(Vec<PhotoId>, LodLevel)> {
        self.builds.lock().unwrap().clone()
    }

    pub fn fail_with(&self, failure: Option<BuildError>) {
        *self.failure.lock().unwrap() = failure;
    }

    /// Block the next build containing `photo_id` until the returned sender
    /// fires or is dropped.
    pub fn hold(&self, photo_id: PhotoId) -> Sender<()> {
        let (tx, rx) = bounded(1);
        self.holds.lock().unwrap().insert(photo_id, rx);
        tx
    }

    /// Photo sets of builds as they start.
    pub fn started(&self) -> &Receiver<Vec<PhotoId>> {
        &self.started_rx
    }
}

impl AtlasBuilder for FakeBuilder {
    fn build(
        &self,
        photo_ids: &[PhotoId],
        lod: LodLevel,
        _cancel: &CancellationToken,
    ) -> BuildResult<TextureAtlas> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.builds.lock().unwrap().push((photo_ids.to_vec(), lod));
        let _ = self.started_tx.send(photo_ids.to_vec());

        let hold = {
            let mut holds = self.holds.lock().unwrap();
            photo_ids.iter().find_map(|id| holds.remove(id))
        };
        if let Some(release) = hold {
            let _ = release.recv_timeout(Duration::from_secs(5));
        }

        if let Some(failure) = self.failure.lock().unwrap().clone() {
            return Err(failure);
        }

        let regions = photo_ids
            .iter()
            .enumerate()
            .map(|(i, id)| PhotoRegion::new(*id, Rect::new(i as u32 * TILE, 0, TILE, TILE)));
        let width = photo_ids.len().max(1) as u32 * TILE;
        Ok(TextureAtlas::new(
            lod,
            AtlasSurface::new((), width, TILE, (width * TILE * 4) as usize),
            regions,
        ))
    }
}

/// Base bucket holding `library` at LOD 0, one atlas per photo.
pub fn manager_with_base(library: &[PhotoId]) -> Arc<BucketManager> {
    let manager = Arc::new(BucketManager::new());
    let builder = FakeBuilder::new();
    photo_atlas_core::populate_base(&manager, builder.as_ref(), library, 1).unwrap();
    manager
}

pub fn inline_router(manager: Arc<BucketManager>) -> (ContextSignalRouter, Arc<FakeBuilder>) {
    let builder = FakeBuilder::new();
    let router = ContextSignalRouter::new(manager, builder.clone(), &EngineConfig::inline());
    (router, builder)
}

pub fn pooled_config(workers: usize) -> EngineConfig {
    EngineConfig::default()
        .with_workers(workers)
        .with_poll_interval(Duration::from_millis(1))
}

pub fn pooled_router(
    manager: Arc<BucketManager>,
    workers: usize,
) -> (ContextSignalRouter, Arc<FakeBuilder>) {
    router_with_config(manager, &pooled_config(workers))
}

pub fn router_with_config(
    manager: Arc<BucketManager>,
    config: &EngineConfig,
) -> (ContextSignalRouter, Arc<FakeBuilder>) {
    let builder = FakeBuilder::new();
    let router = ContextSignalRouter::new(manager, builder.clone(), config);
    (router, builder)
}

/// Every builder call stayed within one atlas worth of photos.
pub fn builds_fit_atlas(builder: &FakeBuilder, config: &EngineConfig) -> bool {
    builder
        .builds()
        .iter()
        .all(|(ids, lod)| !ids.is_empty() && ids.len() <= config.photos_per_atlas(*lod))
}

/// Poll `condition` until it holds or five seconds pass.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}
