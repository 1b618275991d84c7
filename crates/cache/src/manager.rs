//! Bucket manager: lock-per-bucket ownership of all atlas buckets
//!
//! The manager owns the four buckets, each behind its own `RwLock`. There is
//! no manager-wide lock: a lookup against the base bucket never waits on a swap
//! in the general bucket. Cross-bucket operations take one bucket lock at a
//! time and release it before touching the next.
//!
//! Swaps follow generate-then-replace: callers hand over finished atlases,
//! the write lock is held only for the swap itself, and the displaced atlases
//! are dropped (their surfaces released) after the lock is released.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use log::{debug, warn};

use crate::atlas::{AtlasId, AtlasSet, PhotoId, PhotoRegion, TextureAtlas};
use crate::bucket::{BaseBucket, BucketKind, ContextBucket, SlotState};
use crate::error::{CacheError, CacheResult};
use crate::general::GeneralBucket;
use crate::lod::LodLevel;
use crate::snapshot::{CacheSnapshot, CacheUsage, GeneralView};

/// A successful lookup: where the photo is and which bucket served it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LookupHit {
    pub region: PhotoRegion,
    pub lod: LodLevel,
    pub bucket: BucketKind,
    pub atlas_id: AtlasId,
    /// Surface size, for turning the region into texture coordinates
    pub surface_size: (u32, u32),
}

impl LookupHit {
    fn new(bucket: BucketKind, atlas: &TextureAtlas, region: &PhotoRegion) -> Self {
        Self {
            region: *region,
            lod: atlas.lod(),
            bucket,
            atlas_id: atlas.id(),
            surface_size: (atlas.surface().width, atlas.surface().height),
        }
    }

    pub fn uv(&self) -> [f32; 4] {
        self.region.uv(self.surface_size.0, self.surface_size.1)
    }
}

/// Owner of all atlas buckets
///
/// Thread-safe: generation workers call [`insert_or_replace`](Self::insert_or_replace)
/// concurrently while the render loop calls [`lookup`](Self::lookup).
///
/// # Example
///
/// ```
/// use photo_atlas_cache::{
///     AtlasSet, AtlasSurface, BucketKind, BucketManager, LodLevel, PhotoId, PhotoRegion, Rect,
///     TextureAtlas,
/// };
///
/// let manager = BucketManager::new();
///
/// let surface = AtlasSurface::new((), 32, 32, 32 * 32 * 4);
/// let region = PhotoRegion::new(PhotoId(1), Rect::new(0, 0, 32, 32));
/// let atlas = TextureAtlas::new(LodLevel::Lod0, surface, [region]);
/// manager.insert_or_replace(BucketKind::Base, AtlasSet::single(atlas)).unwrap();
///
/// let hit = manager.lookup(PhotoId(1)).unwrap();
/// assert_eq!(hit.lod, LodLevel::Lod0);
/// assert_eq!(hit.bucket, BucketKind::Base);
/// ```
#[derive(Debug)]
pub struct BucketManager {
    base: RwLock<BaseBucket>,
    focused: RwLock<ContextBucket>,
    selection: RwLock<ContextBucket>,
    general: RwLock<GeneralBucket>,
}

impl BucketManager {
    pub fn new() -> Self {
        Self {
            base: RwLock::new(BaseBucket::default()),
            focused: RwLock::new(ContextBucket::new(BucketKind::FocusedContext)),
            selection: RwLock::new(ContextBucket::new(BucketKind::SelectionContext)),
            general: RwLock::new(GeneralBucket::default()),
        }
    }

    /// Atomically swap a bucket's contents for a finished atlas set.
    ///
    /// For the general bucket the set is merged per the two-tier policy; for
    /// the base bucket it is added. The displaced atlases are released after
    /// the swap completes.
    ///
    /// # Errors
    /// Returns [`CacheError::InvalidOperation`] if the set is empty, a base set
    /// is not at LOD 0, or a selection set is not at LOD 7. Nothing changes.
    pub fn insert_or_replace(&self, kind: BucketKind, set: AtlasSet) -> CacheResult<()> {
        Self::validate(kind, &set)?;

        let lod = set.lod();
        let incoming = set.atlases().len();
        let displaced = match kind {
            BucketKind::Base => write(&self.base).insert(set),
            BucketKind::FocusedContext => write(&self.focused).replace(set),
            BucketKind::SelectionContext => write(&self.selection).replace(set),
            BucketKind::General => write(&self.general).insert(set),
        };

        debug!(
            "{} bucket: installed {} atlas(es) at {}, releasing {}",
            kind,
            incoming,
            lod,
            displaced.len()
        );
        release(displaced);
        Ok(())
    }

    /// Empty a bucket immediately.
    ///
    /// # Errors
    /// The base bucket cannot be cleared and returns [`CacheError::InvalidOperation`].
    pub fn clear(&self, kind: BucketKind) -> CacheResult<()> {
        let removed = match kind {
            BucketKind::Base => {
                warn!("rejected clear of the base bucket");
                return Err(CacheError::InvalidOperation {
                    bucket: kind,
                    reason: "the base bucket is never cleared",
                });
            }
            BucketKind::FocusedContext => write(&self.focused).clear(),
            BucketKind::SelectionContext => write(&self.selection).clear(),
            BucketKind::General => write(&self.general).clear(),
        };

        if !removed.is_empty() {
            debug!("{} bucket: cleared {} atlas(es)", kind, removed.len());
        }
        release(removed);
        Ok(())
    }

    /// Find the best available region for a photo.
    ///
    /// Checks selection, focused, general (current then previous tier) and
    /// finally base, returning the first hit.
    pub fn lookup(&self, photo_id: PhotoId) -> Option<LookupHit> {
        self.lookup_with(photo_id, |kind, atlas, region| {
            LookupHit::new(kind, atlas, region)
        })
    }

    /// Like [`lookup`](Self::lookup), but runs `f` while the serving bucket's
    /// read lock is held.
    ///
    /// The atlas passed to `f` cannot be released until `f` returns, so the
    /// renderer can bind its surface handle safely. Keep `f` short: it delays
    /// swaps into that bucket.
    pub fn lookup_with<R>(
        &self,
        photo_id: PhotoId,
        f: impl FnOnce(BucketKind, &TextureAtlas, &PhotoRegion) -> R,
    ) -> Option<R> {
        let mut f = Some(f);
        for kind in BucketKind::LOOKUP_ORDER {
            let result = self.with_atlas_in(kind, photo_id, |atlas, region| {
                f.take().map(|f| f(kind, atlas, region))
            });
            if let Some(result) = result {
                return result;
            }
        }
        None
    }

    /// Search a single bucket, holding only that bucket's lock.
    fn with_atlas_in<R>(
        &self,
        kind: BucketKind,
        photo_id: PhotoId,
        f: impl FnOnce(&TextureAtlas, &PhotoRegion) -> R,
    ) -> Option<R> {
        let resolve = |atlas: Option<&TextureAtlas>| {
            let atlas = atlas?;
            let region = atlas.region(photo_id)?;
            Some(f(atlas, region))
        };
        match kind {
            BucketKind::Base => resolve(read(&self.base).find(photo_id)),
            BucketKind::FocusedContext => resolve(read(&self.focused).find(photo_id)),
            BucketKind::SelectionContext => resolve(read(&self.selection).find(photo_id)),
            BucketKind::General => resolve(read(&self.general).find(photo_id)),
        }
    }

    /// Per-bucket read-only view of everything held.
    pub fn snapshot(&self) -> CacheSnapshot {
        let base = read(&self.base).view();
        let focused_context = read(&self.focused).view();
        let selection_context = read(&self.selection).view();
        let general = {
            let general = read(&self.general);
            let (current_tier, previous_tier) = general.views();
            GeneralView {
                revision: general.revision(),
                current_tier,
                previous_tier,
            }
        };

        CacheSnapshot {
            base,
            focused_context,
            selection_context,
            general,
            taken_at: SystemTime::now(),
        }
    }

    /// Bytes and atlas counts per bucket, without copying region tables.
    pub fn usage(&self) -> CacheUsage {
        fn sum<'a>(atlases: impl Iterator<Item = &'a TextureAtlas>) -> (usize, usize) {
            atlases.fold((0, 0), |(bytes, count), atlas| {
                (bytes + atlas.byte_size(), count + 1)
            })
        }

        let (base_bytes, base_count) = sum(read(&self.base).atlases().iter());
        let (focused_bytes, focused_count) = sum(read(&self.focused).atlases().iter());
        let (selection_bytes, selection_count) = sum(read(&self.selection).atlases().iter());
        let (general_bytes, general_count) = sum(read(&self.general).atlases());

        CacheUsage {
            base_bytes,
            focused_bytes,
            selection_bytes,
            general_bytes,
            atlas_count: base_count + focused_count + selection_count + general_count,
        }
    }

    /// Occupancy of a bucket.
    pub fn state(&self, kind: BucketKind) -> SlotState {
        let populated = match kind {
            BucketKind::Base => !read(&self.base).atlases().is_empty(),
            BucketKind::FocusedContext => read(&self.focused).state() == SlotState::Populated,
            BucketKind::SelectionContext => read(&self.selection).state() == SlotState::Populated,
            BucketKind::General => read(&self.general).tier_count() > 0,
        };
        if populated {
            SlotState::Populated
        } else {
            SlotState::Empty
        }
    }

    /// Number of LOD tiers the general bucket holds (never more than two).
    pub fn general_tier_count(&self) -> usize {
        read(&self.general).tier_count()
    }

    /// LOD of the general bucket's current and previous tiers.
    pub fn general_tiers(&self) -> (Option<LodLevel>, Option<LodLevel>) {
        let general = read(&self.general);
        (general.current_lod(), general.previous_lod())
    }

    fn validate(kind: BucketKind, set: &AtlasSet) -> CacheResult<()> {
        let reason = if set.is_empty() {
            Some("an atlas set must hold at least one atlas")
        } else {
            match kind {
                BucketKind::Base if set.lod() != LodLevel::MIN => {
                    Some("the base bucket only holds LOD0 atlases")
                }
                BucketKind::SelectionContext if set.lod() != LodLevel::MAX => {
                    Some("the selection bucket only holds LOD7 atlases")
                }
                _ => None,
            }
        };

        match reason {
            Some(reason) => {
                warn!("rejected insert into {} bucket: {}", kind, reason);
                Err(CacheError::InvalidOperation { bucket: kind, reason })
            }
            None => Ok(()),
        }
    }
}

impl Default for BucketManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Release displaced atlases. Runs after the bucket lock has been dropped.
fn release(atlases: Vec<TextureAtlas>) {
    drop(atlases);
}

// A panic while a bucket lock was held cannot leave a bucket half-swapped:
// every mutation is a single move. Recover the guard instead of propagating.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
