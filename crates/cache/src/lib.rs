//! Photo Atlas Cache Library
//!
//! Bounded-memory atlas buckets for a zoomable multi-resolution photo grid:
//! a permanent LOD 0 base tier, focused-cell and selected-photo context
//! buckets, and a two-tier general bucket for the visible set.

pub mod atlas;
pub mod bucket;
pub mod error;
mod general;
pub mod lod;
pub mod manager;
pub mod snapshot;

pub use atlas::{AtlasId, AtlasSet, AtlasSurface, PhotoId, PhotoRegion, Rect, TextureAtlas};
pub use bucket::{BucketKind, SlotState};
pub use error::{CacheError, CacheResult};
pub use lod::LodLevel;
pub use manager::{BucketManager, LookupHit};
pub use snapshot::{AtlasSummary, BucketView, CacheSnapshot, CacheUsage, GeneralView, TierView};
