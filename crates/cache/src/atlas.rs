//! Packed texture atlases and their photo region tables
//!
//! A [`TextureAtlas`] packs many photos at one level of detail into a single
//! renderable surface, plus a table mapping each photo to its sub-rectangle.
//! Atlases are immutable once built and are exclusively owned by the bucket
//! slot holding them; the backing surface is released when the atlas drops.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CacheError;
use crate::lod::LodLevel;

/// Identity of a photo in the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PhotoId(pub u64);

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "photo#{}", self.0)
    }
}

/// Unique identity of one built atlas instance.
///
/// Two atlases holding the same photos at the same LOD in different buckets
/// still have distinct ids; they are independent copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AtlasId(pub Uuid);

impl AtlasId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AtlasId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AtlasId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pixel rectangle within an atlas surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Right edge (exclusive).
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Bottom edge (exclusive).
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether two rectangles share any pixel.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

/// Where one photo lives inside an atlas surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhotoRegion {
    pub photo_id: PhotoId,
    pub rect: Rect,
}

impl PhotoRegion {
    pub fn new(photo_id: PhotoId, rect: Rect) -> Self {
        Self { photo_id, rect }
    }

    /// Normalized texture coordinates `[u0, v0, u1, v1]` for a surface of the given size.
    pub fn uv(&self, surface_width: u32, surface_height: u32) -> [f32; 4] {
        if surface_width == 0 || surface_height == 0 {
            return [0.0; 4];
        }
        let w = surface_width as f32;
        let h = surface_height as f32;
        [
            self.rect.x as f32 / w,
            self.rect.y as f32 / h,
            self.rect.right() as f32 / w,
            self.rect.bottom() as f32 / h,
        ]
    }
}

/// Backing surface of an atlas
///
/// Stores the platform-specific texture handle type-erased, the way the
/// renderer hands it over (a wgpu texture, a Metal texture, a CPU bitmap...).
/// Dropping the surface releases the handle.
pub struct AtlasSurface {
    /// Width of the surface in pixels
    pub width: u32,

    /// Height of the surface in pixels
    pub height: u32,

    /// Estimated memory held by the surface in bytes
    byte_size: usize,

    handle: Box<dyn Any + Send + Sync>,
}

impl AtlasSurface {
    /// Wrap a backend handle.
    ///
    /// # Arguments
    ///
    /// * `handle` - Platform-specific surface handle
    /// * `width` - Width in pixels
    /// * `height` - Height in pixels
    /// * `byte_size` - Estimated memory usage in bytes
    pub fn new<T: Any + Send + Sync>(handle: T, width: u32, height: u32, byte_size: usize) -> Self {
        Self {
            width,
            height,
            byte_size,
            handle: Box::new(handle),
        }
    }

    /// Estimated memory held by this surface in bytes
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Get a reference to the underlying handle
    ///
    /// Returns `None` if the type doesn't match.
    pub fn handle<T: Any>(&self) -> Option<&T> {
        self.handle.downcast_ref::<T>()
    }
}

impl fmt::Debug for AtlasSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtlasSurface")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("byte_size", &self.byte_size)
            .finish_non_exhaustive()
    }
}

/// A packed surface plus its photo → region table.
#[derive(Debug)]
pub struct TextureAtlas {
    id: AtlasId,
    lod: LodLevel,
    surface: AtlasSurface,
    regions: HashMap<PhotoId, PhotoRegion>,
    created_at: SystemTime,
}

impl TextureAtlas {
    pub fn new(
        lod: LodLevel,
        surface: AtlasSurface,
        regions: impl IntoIterator<Item = PhotoRegion>,
    ) -> Self {
        let regions = regions
            .into_iter()
            .map(|region| (region.photo_id, region))
            .collect();
        Self {
            id: AtlasId::new(),
            lod,
            surface,
            regions,
            created_at: SystemTime::now(),
        }
    }

    pub fn id(&self) -> AtlasId {
        self.id
    }

    pub fn lod(&self) -> LodLevel {
        self.lod
    }

    pub fn surface(&self) -> &AtlasSurface {
        &self.surface
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn region(&self, photo_id: PhotoId) -> Option<&PhotoRegion> {
        self.regions.get(&photo_id)
    }

    pub fn contains(&self, photo_id: PhotoId) -> bool {
        self.regions.contains_key(&photo_id)
    }

    pub fn regions(&self) -> impl Iterator<Item = &PhotoRegion> {
        self.regions.values()
    }

    pub fn photo_ids(&self) -> impl Iterator<Item = PhotoId> + '_ {
        self.regions.keys().copied()
    }

    /// Number of photos packed into this atlas.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn byte_size(&self) -> usize {
        self.surface.byte_size()
    }

    /// True when every photo in this atlas is also in `covered`.
    pub(crate) fn is_covered_by(&self, covered: &HashSet<PhotoId>) -> bool {
        self.regions.keys().all(|photo_id| covered.contains(photo_id))
    }
}

/// One generation of atlases handed to the bucket manager in a single swap.
#[derive(Debug)]
pub struct AtlasSet {
    lod: LodLevel,
    atlases: Vec<TextureAtlas>,
    working_set: Option<usize>,
}

impl AtlasSet {
    /// Group finished atlases that were all built at `lod`.
    ///
    /// # Errors
    /// Returns [`CacheError::LodMismatch`] if any atlas was built at another level.
    pub fn new(lod: LodLevel, atlases: Vec<TextureAtlas>) -> Result<Self, CacheError> {
        if let Some(stray) = atlases.iter().find(|atlas| atlas.lod() != lod) {
            return Err(CacheError::LodMismatch {
                expected: lod,
                found: stray.lod(),
            });
        }
        Ok(Self {
            lod,
            atlases,
            working_set: None,
        })
    }

    /// A set holding a single atlas, at that atlas's level.
    pub fn single(atlas: TextureAtlas) -> Self {
        Self {
            lod: atlas.lod(),
            atlases: vec![atlas],
            working_set: None,
        }
    }

    /// Record how many photo slots the current view actually needs.
    ///
    /// Only the general bucket reads this; it bounds in-tier eviction.
    pub fn with_working_set(mut self, photos: usize) -> Self {
        self.working_set = Some(photos);
        self
    }

    pub fn lod(&self) -> LodLevel {
        self.lod
    }

    pub fn atlases(&self) -> &[TextureAtlas] {
        &self.atlases
    }

    pub fn is_empty(&self) -> bool {
        self.atlases.is_empty()
    }

    /// Total photo regions across the set.
    pub fn region_count(&self) -> usize {
        self.atlases.iter().map(TextureAtlas::len).sum()
    }

    /// Working set size, defaulting to the set's own region count.
    pub fn working_set(&self) -> usize {
        self.working_set.unwrap_or_else(|| self.region_count())
    }

    pub fn photo_ids(&self) -> HashSet<PhotoId> {
        self.atlases
            .iter()
            .flat_map(|atlas| atlas.photo_ids())
            .collect()
    }

    pub fn into_atlases(self) -> Vec<TextureAtlas> {
        self.atlases
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandle(Arc<AtomicUsize>);

    impl Drop for CountingHandle {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn region(id: u64, x: u32) -> PhotoRegion {
        PhotoRegion::new(PhotoId(id), Rect::new(x, 0, 32, 32))
    }

    #[test]
    fn test_region_table() {
        let surface = AtlasSurface::new((), 64, 32, 64 * 32 * 4);
        let atlas = TextureAtlas::new(LodLevel::Lod0, surface, [region(1, 0), region(2, 32)]);

        assert_eq!(atlas.len(), 2);
        assert!(atlas.contains(PhotoId(1)));
        assert!(!atlas.contains(PhotoId(3)));
        assert_eq!(atlas.region(PhotoId(2)).unwrap().rect.x, 32);
        assert_eq!(atlas.byte_size(), 64 * 32 * 4);
    }

    #[test]
    fn test_surface_released_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let surface = AtlasSurface::new(CountingHandle(released.clone()), 32, 32, 4096);
        let atlas = TextureAtlas::new(LodLevel::Lod1, surface, [region(1, 0)]);

        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(atlas);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_surface_handle_downcast() {
        let surface = AtlasSurface::new(42u32, 1, 1, 4);
        assert_eq!(surface.handle::<u32>(), Some(&42));
        assert!(surface.handle::<String>().is_none());
    }

    #[test]
    fn test_distinct_ids_for_identical_content() {
        let a = TextureAtlas::new(LodLevel::Lod0, AtlasSurface::new((), 32, 32, 0), [region(1, 0)]);
        let b = TextureAtlas::new(LodLevel::Lod0, AtlasSurface::new((), 32, 32, 0), [region(1, 0)]);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_uv() {
        let region = PhotoRegion::new(PhotoId(1), Rect::new(32, 0, 32, 64));
        assert_eq!(region.uv(64, 128), [0.5, 0.0, 1.0, 0.5]);
        assert_eq!(region.uv(0, 0), [0.0; 4]);
    }

    #[test]
    fn test_rect_intersects() {
        let a = Rect::new(0, 0, 10, 10);
        assert!(a.intersects(&Rect::new(5, 5, 10, 10)));
        assert!(!a.intersects(&Rect::new(10, 0, 10, 10)));
    }

    #[test]
    fn test_atlas_set_rejects_mixed_lod() {
        let a = TextureAtlas::new(LodLevel::Lod2, AtlasSurface::new((), 1, 1, 0), [region(1, 0)]);
        let b = TextureAtlas::new(LodLevel::Lod3, AtlasSurface::new((), 1, 1, 0), [region(2, 0)]);

        let err = AtlasSet::new(LodLevel::Lod2, vec![a, b]).unwrap_err();
        assert!(matches!(
            err,
            CacheError::LodMismatch {
                expected: LodLevel::Lod2,
                found: LodLevel::Lod3
            }
        ));
    }

    #[test]
    fn test_atlas_set_working_set_default() {
        let a = TextureAtlas::new(
            LodLevel::Lod2,
            AtlasSurface::new((), 1, 1, 0),
            [region(1, 0), region(2, 32)],
        );
        let set = AtlasSet::single(a);
        assert_eq!(set.working_set(), 2);
        assert_eq!(set.with_working_set(10).working_set(), 10);
    }
}
