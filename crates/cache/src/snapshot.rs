//! Read-only views of bucket contents
//!
//! Views copy out the metadata and region tables of the atlases a bucket holds,
//! never the surfaces themselves. They are what the result publisher hands to
//! the UI and what a debug overlay renders per-bucket occupancy from.

use std::collections::HashMap;
use std::time::SystemTime;

use serde::Serialize;

use crate::atlas::{AtlasId, PhotoId, PhotoRegion, TextureAtlas};
use crate::bucket::{BucketKind, SlotState};
use crate::lod::LodLevel;

/// Metadata and region table of one held atlas.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AtlasSummary {
    pub id: AtlasId,
    pub lod: LodLevel,
    pub width: u32,
    pub height: u32,
    pub byte_size: usize,
    pub created_at: SystemTime,
    pub regions: Vec<PhotoRegion>,
}

impl From<&TextureAtlas> for AtlasSummary {
    fn from(atlas: &TextureAtlas) -> Self {
        let mut regions: Vec<PhotoRegion> = atlas.regions().copied().collect();
        regions.sort_by_key(|region| region.photo_id);
        Self {
            id: atlas.id(),
            lod: atlas.lod(),
            width: atlas.surface().width,
            height: atlas.surface().height,
            byte_size: atlas.byte_size(),
            created_at: atlas.created_at(),
            regions,
        }
    }
}

/// Contents of a single-level bucket at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketView {
    pub kind: BucketKind,
    pub state: SlotState,
    pub lod: Option<LodLevel>,
    pub revision: u64,
    pub atlases: Vec<AtlasSummary>,
}

impl BucketView {
    pub(crate) fn new(
        kind: BucketKind,
        lod: Option<LodLevel>,
        revision: u64,
        atlases: &[TextureAtlas],
    ) -> Self {
        let state = if atlases.is_empty() {
            SlotState::Empty
        } else {
            SlotState::Populated
        };
        Self {
            kind,
            state,
            lod,
            revision,
            atlases: atlases.iter().map(AtlasSummary::from).collect(),
        }
    }

    pub fn byte_size(&self) -> usize {
        self.atlases.iter().map(|atlas| atlas.byte_size).sum()
    }

    pub fn photo_count(&self) -> usize {
        self.atlases.iter().map(|atlas| atlas.regions.len()).sum()
    }
}

/// One LOD tier of the general bucket, oldest entry first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierView {
    pub lod: LodLevel,
    pub atlases: Vec<AtlasSummary>,
}

impl TierView {
    pub(crate) fn new<'a>(lod: LodLevel, atlases: impl Iterator<Item = &'a TextureAtlas>) -> Self {
        Self {
            lod,
            atlases: atlases.map(AtlasSummary::from).collect(),
        }
    }

    pub fn byte_size(&self) -> usize {
        self.atlases.iter().map(|atlas| atlas.byte_size).sum()
    }
}

/// Both tiers of the general bucket, read under one lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneralView {
    pub revision: u64,
    pub current_tier: Option<TierView>,
    pub previous_tier: Option<TierView>,
}

impl GeneralView {
    pub fn tier_count(&self) -> usize {
        self.current_tier.is_some() as usize + self.previous_tier.is_some() as usize
    }

    pub fn byte_size(&self) -> usize {
        self.tiers().map(TierView::byte_size).sum()
    }

    /// Current tier first.
    pub fn tiers(&self) -> impl Iterator<Item = &TierView> {
        self.current_tier.iter().chain(self.previous_tier.iter())
    }
}

/// Snapshot of every bucket
///
/// Each bucket view is taken under that bucket's own lock, so every view is
/// either entirely before or entirely after any concurrent swap.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheSnapshot {
    pub base: BucketView,
    pub focused_context: BucketView,
    pub selection_context: BucketView,
    pub general: GeneralView,
    pub taken_at: SystemTime,
}

impl CacheSnapshot {
    /// View of a single-level bucket, `None` for `General` (use [`Self::general`]).
    pub fn bucket(&self, kind: BucketKind) -> Option<&BucketView> {
        match kind {
            BucketKind::Base => Some(&self.base),
            BucketKind::FocusedContext => Some(&self.focused_context),
            BucketKind::SelectionContext => Some(&self.selection_context),
            BucketKind::General => None,
        }
    }

    /// Best region per photo, resolved in lookup priority order.
    pub fn renderable_regions(&self) -> HashMap<PhotoId, (PhotoRegion, LodLevel, BucketKind)> {
        let mut resolved = HashMap::new();

        let mut claim = |kind: BucketKind, atlases: &[AtlasSummary]| {
            // Newest atlas wins within a bucket
            for atlas in atlases.iter().rev() {
                for region in &atlas.regions {
                    resolved
                        .entry(region.photo_id)
                        .or_insert((*region, atlas.lod, kind));
                }
            }
        };

        claim(BucketKind::SelectionContext, &self.selection_context.atlases);
        claim(BucketKind::FocusedContext, &self.focused_context.atlases);
        for tier in self.general.tiers() {
            claim(BucketKind::General, &tier.atlases);
        }
        claim(BucketKind::Base, &self.base.atlases);

        resolved
    }

    /// Distinct LOD tiers held by the general bucket (never more than two).
    pub fn tier_count(&self) -> usize {
        self.general.tier_count()
    }

    pub fn usage(&self) -> CacheUsage {
        let general_atlases: usize = self.general.tiers().map(|tier| tier.atlases.len()).sum();
        CacheUsage {
            base_bytes: self.base.byte_size(),
            focused_bytes: self.focused_context.byte_size(),
            selection_bytes: self.selection_context.byte_size(),
            general_bytes: self.general.byte_size(),
            atlas_count: self.base.atlases.len()
                + self.focused_context.atlases.len()
                + self.selection_context.atlases.len()
                + general_atlases,
        }
    }

    /// Serialize for a debug overlay or log export.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Memory held per bucket
///
/// Reporting only; the engine never evicts across buckets in response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheUsage {
    pub base_bytes: usize,
    pub focused_bytes: usize,
    pub selection_bytes: usize,
    pub general_bytes: usize,
    pub atlas_count: usize,
}

impl CacheUsage {
    pub fn total_bytes(&self) -> usize {
        self.base_bytes + self.focused_bytes + self.selection_bytes + self.general_bytes
    }

    pub fn bytes_for(&self, kind: BucketKind) -> usize {
        match kind {
            BucketKind::Base => self.base_bytes,
            BucketKind::FocusedContext => self.focused_bytes,
            BucketKind::SelectionContext => self.selection_bytes,
            BucketKind::General => self.general_bytes,
        }
    }
}
