//! Context signal router
//!
//! Turns view-state signals (focus, selection, mode, zoom, visible set) into
//! atlas builds for the focused, selection and general buckets.
//!
//! Each target bucket has a lane holding its dedup guard and the token of the
//! build in flight. A newer signal cancels that token under the lane lock,
//! and a finished build installs under the same lock only if its token is
//! still live, so a superseded result is never installed late and a clear is
//! never followed by a stale install.
//!
//! Lock order is view context, then lane, then bucket.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use photo_atlas_cache::{AtlasSet, BucketKind, BucketManager, LodLevel, PhotoId, SlotState};
use photo_atlas_scheduler::{
    CancellationToken, Job, JobExecutor, JobPriority, JobScheduler, WorkerPool,
};
use serde::{Deserialize, Serialize};

use crate::builder::{AtlasBuilder, BuildError, BuildResult};
use crate::config::EngineConfig;
use crate::fingerprint::{DedupGuard, GenerationFingerprint, TriggerKind};
use crate::publisher::ResultPublisher;

/// Identity of a grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellId(pub u64);

/// The grid cell under focus and the photos it shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusedCell {
    pub cell_id: CellId,
    /// Sorted, without duplicates
    pub photo_ids: Vec<PhotoId>,
}

impl FocusedCell {
    pub fn new(cell_id: CellId, photo_ids: impl IntoIterator<Item = PhotoId>) -> Self {
        Self {
            cell_id,
            photo_ids: sorted_unique(photo_ids),
        }
    }
}

/// Whether the UI shows the grid or a single photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UiMode {
    #[default]
    CellMode,
    PhotoMode,
}

/// How a build ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BuildOutcome {
    Installed,
    /// Superseded before it could be installed
    Discarded,
    Failed { fatal: bool },
}

/// Build counters for one bucket
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BucketBuildStats {
    /// Signals that asked for a generation
    pub requested: u64,
    /// Requests skipped because the same generation was already requested
    /// or is already installed
    pub deduplicated: u64,
    /// In-flight builds cancelled by a newer signal or a clear
    pub superseded: u64,
    pub installed: u64,
    /// Finished builds dropped because they had been superseded
    pub discarded: u64,
    pub failed: u64,
    /// Time spent inside the builder
    pub build_time: Duration,
    pub last_outcome: Option<BuildOutcome>,
}

impl BucketBuildStats {
    /// Builds that ran to completion, whatever their outcome.
    pub fn completed(&self) -> u64 {
        self.installed + self.discarded + self.failed
    }

    pub fn average_build_time(&self) -> Option<Duration> {
        let completed = u32::try_from(self.completed()).ok().filter(|n| *n > 0)?;
        Some(self.build_time / completed)
    }
}

/// Build counters for every routed bucket
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouterStats {
    pub focused_context: BucketBuildStats,
    pub selection_context: BucketBuildStats,
    pub general: BucketBuildStats,
}

impl RouterStats {
    /// Counters for a bucket, `None` for the base bucket (not routed).
    pub fn bucket(&self, kind: BucketKind) -> Option<&BucketBuildStats> {
        match kind {
            BucketKind::Base => None,
            BucketKind::FocusedContext => Some(&self.focused_context),
            BucketKind::SelectionContext => Some(&self.selection_context),
            BucketKind::General => Some(&self.general),
        }
    }

    /// Builds that reached the builder and finished, across all buckets.
    pub fn total_completed(&self) -> u64 {
        [&self.focused_context, &self.selection_context, &self.general]
            .iter()
            .map(|stats| stats.completed())
            .sum()
    }

    /// Pretty-printed JSON for the debug overlay.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Buckets the router builds for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    FocusedContext,
    SelectionContext,
    General,
}

impl Target {
    fn kind(self) -> BucketKind {
        match self {
            Target::FocusedContext => BucketKind::FocusedContext,
            Target::SelectionContext => BucketKind::SelectionContext,
            Target::General => BucketKind::General,
        }
    }

    fn trigger(self) -> TriggerKind {
        match self {
            Target::FocusedContext => TriggerKind::FocusedCell,
            Target::SelectionContext => TriggerKind::SelectedPhoto,
            Target::General => TriggerKind::VisibleSet,
        }
    }

    fn priority(self) -> JobPriority {
        match self {
            Target::FocusedContext => JobPriority::FocusedContext,
            Target::SelectionContext => JobPriority::SelectionContext,
            Target::General => JobPriority::General,
        }
    }
}

enum Plan {
    Build {
        target: Target,
        lod: LodLevel,
        photo_ids: Vec<PhotoId>,
        working_set: Option<usize>,
    },
    Clear(Target),
}

/// Everything the router knows about the view
#[derive(Debug, Default)]
struct ViewContext {
    lod: LodLevel,
    mode: UiMode,
    focused: Option<FocusedCell>,
    selected: Option<PhotoId>,
    visible: Vec<PhotoId>,
}

impl ViewContext {
    fn plan_focused(&self) -> Plan {
        match &self.focused {
            Some(cell) if !cell.photo_ids.is_empty() => Plan::Build {
                target: Target::FocusedContext,
                lod: self.lod.saturating_higher(),
                photo_ids: cell.photo_ids.clone(),
                working_set: None,
            },
            _ => Plan::Clear(Target::FocusedContext),
        }
    }

    fn plan_selection(&self) -> Plan {
        match (self.mode, self.selected) {
            (UiMode::PhotoMode, Some(photo_id)) => Plan::Build {
                target: Target::SelectionContext,
                lod: LodLevel::MAX,
                photo_ids: vec![photo_id],
                working_set: None,
            },
            _ => Plan::Clear(Target::SelectionContext),
        }
    }

    fn plan_general(&self) -> Option<Plan> {
        if self.visible.is_empty() {
            return None;
        }
        Some(Plan::Build {
            target: Target::General,
            lod: self.lod,
            photo_ids: self.visible.clone(),
            working_set: Some(self.visible.len()),
        })
    }
}

/// Payload of one scheduled build
struct BuildRequest {
    target: Target,
    photo_ids: Vec<PhotoId>,
    lod: LodLevel,
    working_set: Option<usize>,
    fingerprint: GenerationFingerprint,
    token: CancellationToken,
}

struct InFlight {
    fingerprint: GenerationFingerprint,
    token: CancellationToken,
}

#[derive(Default)]
struct LaneState {
    guard: DedupGuard,
    in_flight: Option<InFlight>,
    stats: BucketBuildStats,
}

/// State shared between the router and its build workers
struct RouterShared {
    manager: Arc<BucketManager>,
    builder: Arc<dyn AtlasBuilder>,
    publisher: Arc<ResultPublisher>,
    config: EngineConfig,
    focused: Mutex<LaneState>,
    selection: Mutex<LaneState>,
    general: Mutex<LaneState>,
}

impl RouterShared {
    fn lane(&self, target: Target) -> MutexGuard<'_, LaneState> {
        lock(match target {
            Target::FocusedContext => &self.focused,
            Target::SelectionContext => &self.selection,
            Target::General => &self.general,
        })
    }

    /// Register a build unless the same generation is already requested or
    /// installed.
    fn request(
        &self,
        target: Target,
        lod: LodLevel,
        photo_ids: Vec<PhotoId>,
        working_set: Option<usize>,
    ) -> Option<BuildRequest> {
        let fingerprint = GenerationFingerprint::new(target.trigger(), lod, &photo_ids);
        let mut lane = self.lane(target);
        lane.stats.requested += 1;

        // Back to what the bucket already shows: drop the detour
        if lane.guard.is_installed(&fingerprint) {
            if let Some(previous) = lane.in_flight.take() {
                previous.token.cancel();
                lane.stats.superseded += 1;
                debug!(
                    "{} bucket: generation at {} already installed, cancelling build at {}",
                    target.kind(),
                    lod,
                    previous.fingerprint.lod
                );
            }
            lane.guard.mark_requested(fingerprint);
            lane.stats.deduplicated += 1;
            return None;
        }

        if !lane.guard.should_build(&fingerprint) {
            lane.stats.deduplicated += 1;
            debug!(
                "{} bucket: {} generation at {} already requested",
                target.kind(),
                photo_ids.len(),
                lod
            );
            return None;
        }

        if let Some(previous) = lane.in_flight.take() {
            previous.token.cancel();
            lane.stats.superseded += 1;
            debug!(
                "{} bucket: superseding in-flight build at {}",
                target.kind(),
                previous.fingerprint.lod
            );
        }

        let token = CancellationToken::new();
        lane.guard.mark_requested(fingerprint);
        lane.in_flight = Some(InFlight {
            fingerprint,
            token: token.clone(),
        });

        Some(BuildRequest {
            target,
            photo_ids,
            lod,
            working_set,
            fingerprint,
            token,
        })
    }

    /// Cancel anything in flight for `target` and empty its bucket.
    fn clear(&self, target: Target) {
        let kind = target.kind();
        let mut lane = self.lane(target);

        if let Some(previous) = lane.in_flight.take() {
            previous.token.cancel();
            lane.stats.superseded += 1;
        }
        lane.guard.reset();

        if self.manager.state(kind) == SlotState::Empty {
            return;
        }
        let cleared = self.manager.clear(kind);
        drop(lane);

        match cleared {
            Ok(()) => {
                info!("{} bucket cleared", kind);
                self.publisher.publish();
            }
            Err(err) => warn!("failed to clear {} bucket: {}", kind, err),
        }
    }

    fn execute(&self, request: &BuildRequest) -> BuildOutcome {
        let started = Instant::now();
        let result = self.build_generation(request);
        self.complete(request, result, started.elapsed())
    }

    /// Build the requested photos as one generation, split into as many
    /// atlases as the surface limit at that LOD requires.
    fn build_generation(&self, request: &BuildRequest) -> BuildResult<AtlasSet> {
        let per_atlas = self.config.photos_per_atlas(request.lod);
        let mut atlases = Vec::new();
        for chunk in request.photo_ids.chunks(per_atlas) {
            if request.token.is_cancelled() {
                return Err(BuildError::Cancelled);
            }
            atlases.push(self.builder.build(chunk, request.lod, &request.token)?);
        }

        let set = AtlasSet::new(request.lod, atlases)?;
        Ok(match request.working_set {
            Some(working_set) => set.with_working_set(working_set),
            None => set,
        })
    }

    fn complete(
        &self,
        request: &BuildRequest,
        result: BuildResult<AtlasSet>,
        elapsed: Duration,
    ) -> BuildOutcome {
        let kind = request.target.kind();
        let mut lane = self.lane(request.target);
        lane.stats.build_time += elapsed;

        if request.token.is_cancelled() {
            lane.stats.discarded += 1;
            lane.stats.last_outcome = Some(BuildOutcome::Discarded);
            drop(lane);
            debug!(
                "{} bucket: discarding superseded build of {} photo(s) at {}",
                kind,
                request.photo_ids.len(),
                request.lod
            );
            return BuildOutcome::Discarded;
        }
        lane.in_flight = None;

        let installed = result.and_then(|set| {
            let atlases = set.atlases().len();
            self.manager
                .insert_or_replace(kind, set)
                .map(|()| atlases)
                .map_err(BuildError::from)
        });

        let outcome = match &installed {
            Ok(_) => {
                lane.guard.mark_installed(request.fingerprint);
                lane.stats.installed += 1;
                BuildOutcome::Installed
            }
            Err(err) => {
                lane.guard.mark_failed();
                lane.stats.failed += 1;
                BuildOutcome::Failed {
                    fatal: err.is_fatal(),
                }
            }
        };
        lane.stats.last_outcome = Some(outcome);
        drop(lane);

        match installed {
            Ok(atlases) => {
                info!(
                    "{} bucket: installed {} photo(s) in {} atlas(es) at {} ({:?})",
                    kind,
                    request.photo_ids.len(),
                    atlases,
                    request.lod,
                    elapsed
                );
                self.publisher.record_install(kind);
            }
            Err(err) => {
                error!("{} bucket: build at {} failed: {}", kind, request.lod, err);
                self.publisher.report_failure(kind, &err);
            }
        }
        outcome
    }
}

enum Dispatch {
    /// Builds run on the signalling thread
    Inline,
    Pooled {
        scheduler: Arc<JobScheduler<BuildRequest>>,
        pool: Mutex<Option<WorkerPool>>,
        poll_interval: Duration,
    },
}

/// Routes view-state signals to atlas builds
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use photo_atlas_cache::{BucketManager, LodLevel, PhotoId};
/// use photo_atlas_core::{
///     BuildResult, ContextSignalRouter, EngineConfig, PackingAtlasBuilder, PhotoSource,
///     ShelfPacker,
/// };
///
/// struct Grey;
///
/// impl PhotoSource for Grey {
///     fn dimensions(&self, _photo_id: PhotoId) -> BuildResult<(u32, u32)> {
///         Ok((640, 480))
///     }
///
///     fn render_into(&self, _: PhotoId, _: u32, _: u32, target: &mut [u8]) -> BuildResult<()> {
///         target.fill(128);
///         Ok(())
///     }
/// }
///
/// let config = EngineConfig::default();
/// let manager = Arc::new(BucketManager::new());
/// let builder = Arc::new(PackingAtlasBuilder::new(Grey, ShelfPacker::new(8192, 1)));
/// let router = ContextSignalRouter::new(manager.clone(), builder, &config);
///
/// router.on_visible_set_changed((1..=20).map(PhotoId));
/// router.on_zoom_crossed_lod_boundary(LodLevel::Lod1);
/// router.shutdown();
/// ```
pub struct ContextSignalRouter {
    shared: Arc<RouterShared>,
    view: Mutex<ViewContext>,
    dispatch: Dispatch,
}

impl ContextSignalRouter {
    /// Create a router; `config.workers == 0` builds inline.
    pub fn new(
        manager: Arc<BucketManager>,
        builder: Arc<dyn AtlasBuilder>,
        config: &EngineConfig,
    ) -> Self {
        let publisher = Arc::new(ResultPublisher::new(manager.clone()));
        let shared = Arc::new(RouterShared {
            manager,
            builder,
            publisher,
            config: config.clone(),
            focused: Mutex::default(),
            selection: Mutex::default(),
            general: Mutex::default(),
        });

        let dispatch = match config.worker_pool_config() {
            None => Dispatch::Inline,
            Some(pool_config) => {
                let scheduler = Arc::new(JobScheduler::new());
                let worker_shared = shared.clone();
                let executor: JobExecutor<BuildRequest> =
                    Arc::new(move |job: &Job<BuildRequest>, _token: &CancellationToken| {
                        worker_shared.execute(&job.payload);
                    });
                let pool = WorkerPool::new(scheduler.clone(), executor, pool_config);
                Dispatch::Pooled {
                    scheduler,
                    pool: Mutex::new(Some(pool)),
                    poll_interval: config.poll_interval(),
                }
            }
        };

        Self {
            shared,
            view: Mutex::new(ViewContext {
                lod: config.initial_lod,
                ..ViewContext::default()
            }),
            dispatch,
        }
    }

    pub fn manager(&self) -> &Arc<BucketManager> {
        &self.shared.manager
    }

    pub fn publisher(&self) -> &Arc<ResultPublisher> {
        &self.shared.publisher
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.dispatch, Dispatch::Inline)
    }

    pub fn current_lod(&self) -> LodLevel {
        lock(&self.view).lod
    }

    pub fn mode(&self) -> UiMode {
        lock(&self.view).mode
    }

    pub fn focused_cell(&self) -> Option<FocusedCell> {
        lock(&self.view).focused.clone()
    }

    pub fn selected_photo(&self) -> Option<PhotoId> {
        lock(&self.view).selected
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            focused_context: self.shared.lane(Target::FocusedContext).stats.clone(),
            selection_context: self.shared.lane(Target::SelectionContext).stats.clone(),
            general: self.shared.lane(Target::General).stats.clone(),
        }
    }

    /// The focused cell changed or went away.
    pub fn on_focused_cell_changed(&self, cell: Option<FocusedCell>) {
        self.apply(|view| {
            view.focused = cell;
            vec![view.plan_focused()]
        });
    }

    /// The selected photo changed or was deselected.
    pub fn on_selected_photo_changed(&self, photo_id: Option<PhotoId>) {
        self.apply(|view| {
            view.selected = photo_id;
            vec![view.plan_selection()]
        });
    }

    /// Switching to cell mode drops the selection atlas but remembers the
    /// selected photo for the next switch back.
    pub fn on_mode_changed(&self, mode: UiMode) {
        self.apply(|view| {
            view.mode = mode;
            vec![view.plan_selection()]
        });
    }

    /// The visible LOD changed: rebuild the focused cell one level up and the
    /// visible set at the new level.
    pub fn on_zoom_crossed_lod_boundary(&self, lod: LodLevel) {
        self.apply(|view| {
            view.lod = lod;
            let mut plans = Vec::new();
            if view.focused.is_some() {
                plans.push(view.plan_focused());
            }
            plans.extend(view.plan_general());
            plans
        });
    }

    /// The set of visible photos changed. An empty set builds nothing.
    pub fn on_visible_set_changed(&self, photo_ids: impl IntoIterator<Item = PhotoId>) {
        let visible = sorted_unique(photo_ids);
        self.apply(|view| {
            view.visible = visible;
            view.plan_general().into_iter().collect()
        });
    }

    /// Wait until no build is queued or running.
    ///
    /// Always `true` for inline dispatch.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        match &self.dispatch {
            Dispatch::Inline => true,
            Dispatch::Pooled {
                scheduler,
                poll_interval,
                ..
            } => {
                let deadline = Instant::now() + timeout;
                loop {
                    if scheduler.is_idle() {
                        return true;
                    }
                    if Instant::now() >= deadline {
                        return false;
                    }
                    thread::sleep(*poll_interval);
                }
            }
        }
    }

    /// Drop queued builds and stop the workers. Idempotent.
    pub fn shutdown(&self) {
        if let Dispatch::Pooled {
            scheduler, pool, ..
        } = &self.dispatch
        {
            let Some(pool) = lock(pool).take() else {
                return;
            };
            let dropped = scheduler.cancel_jobs_if(|_| true);
            pool.shutdown();
            info!("router shut down, {} queued build(s) dropped", dropped);
        }
    }

    fn apply(&self, update: impl FnOnce(&mut ViewContext) -> Vec<Plan>) {
        let requests: Vec<BuildRequest> = {
            let mut view = lock(&self.view);
            update(&mut view)
                .into_iter()
                .filter_map(|plan| match plan {
                    Plan::Build {
                        target,
                        lod,
                        photo_ids,
                        working_set,
                    } => self.shared.request(target, lod, photo_ids, working_set),
                    Plan::Clear(target) => {
                        self.shared.clear(target);
                        None
                    }
                })
                .collect()
        };

        for request in requests {
            self.dispatch(request);
        }
    }

    fn dispatch(&self, request: BuildRequest) {
        match &self.dispatch {
            Dispatch::Inline => {
                self.shared.execute(&request);
            }
            Dispatch::Pooled {
                scheduler, pool, ..
            } => {
                if lock(pool).is_none() {
                    warn!(
                        "{} build requested after shutdown, dropping",
                        request.target.kind()
                    );
                    request.token.cancel();
                    return;
                }
                let priority = request.target.priority();
                let token = request.token.clone();
                scheduler.submit_with_token(priority, request, token);
            }
        }
    }
}

impl Drop for ContextSignalRouter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sorted_unique(photo_ids: impl IntoIterator<Item = PhotoId>) -> Vec<PhotoId> {
    let mut ids: Vec<PhotoId> = photo_ids.into_iter().collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
