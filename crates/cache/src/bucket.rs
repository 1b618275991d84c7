//! Bucket kinds and the slot buckets behind them
//!
//! Four bucket kinds exist, each with its own replace/clear policy:
//!
//! - **Base**: the whole library at LOD 0, additive, never cleared
//! - **FocusedContext**: one generation for the focused grid cell
//! - **SelectionContext**: one generation at LOD 7 for the selected photo
//! - **General**: two LOD tiers for the visible set (see [`crate::general`])
//!
//! Bucket structs here are plain data; locking lives in
//! [`BucketManager`](crate::BucketManager).

use std::fmt;
use std::mem;

use serde::{Deserialize, Serialize};

use crate::atlas::{AtlasSet, PhotoId, TextureAtlas};
use crate::lod::LodLevel;
use crate::snapshot::BucketView;

/// The four kinds of atlas bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BucketKind {
    Base,
    FocusedContext,
    SelectionContext,
    General,
}

impl BucketKind {
    /// Lookup order: most intentional quality first.
    pub const LOOKUP_ORDER: [BucketKind; 4] = [
        BucketKind::SelectionContext,
        BucketKind::FocusedContext,
        BucketKind::General,
        BucketKind::Base,
    ];

    pub const ALL: [BucketKind; 4] = [
        BucketKind::Base,
        BucketKind::FocusedContext,
        BucketKind::SelectionContext,
        BucketKind::General,
    ];

    /// Whether a context change may empty this bucket.
    pub fn is_clearable(self) -> bool {
        !matches!(self, BucketKind::Base)
    }

    pub fn name(self) -> &'static str {
        match self {
            BucketKind::Base => "base",
            BucketKind::FocusedContext => "focused-context",
            BucketKind::SelectionContext => "selection-context",
            BucketKind::General => "general",
        }
    }
}

impl fmt::Display for BucketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Occupancy of a bucket slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    Empty,
    Populated,
}

/// Permanently resident LOD 0 coverage of the library.
///
/// Insertions are additive. An older atlas is released only once every photo
/// it covers is also present in the incoming set, so coverage never shrinks.
#[derive(Debug, Default)]
pub(crate) struct BaseBucket {
    atlases: Vec<TextureAtlas>,
    revision: u64,
}

impl BaseBucket {
    pub(crate) fn insert(&mut self, set: AtlasSet) -> Vec<TextureAtlas> {
        let incoming = set.photo_ids();
        let (displaced, kept): (Vec<_>, Vec<_>) = mem::take(&mut self.atlases)
            .into_iter()
            .partition(|atlas| atlas.is_covered_by(&incoming));

        self.atlases = kept;
        self.atlases.extend(set.into_atlases());
        self.revision += 1;
        displaced
    }

    /// Newest atlas holding the photo.
    pub(crate) fn find(&self, photo_id: PhotoId) -> Option<&TextureAtlas> {
        self.atlases.iter().rev().find(|atlas| atlas.contains(photo_id))
    }

    pub(crate) fn view(&self) -> BucketView {
        let lod = (!self.atlases.is_empty()).then_some(LodLevel::MIN);
        BucketView::new(BucketKind::Base, lod, self.revision, &self.atlases)
    }

    pub(crate) fn atlases(&self) -> &[TextureAtlas] {
        &self.atlases
    }
}

/// One built generation held by a context bucket.
#[derive(Debug)]
struct Generation {
    lod: LodLevel,
    atlases: Vec<TextureAtlas>,
}

/// Single-generation bucket used for FocusedContext and SelectionContext.
#[derive(Debug)]
pub(crate) struct ContextBucket {
    kind: BucketKind,
    generation: Option<Generation>,
    revision: u64,
}

impl ContextBucket {
    pub(crate) fn new(kind: BucketKind) -> Self {
        Self {
            kind,
            generation: None,
            revision: 0,
        }
    }

    /// Swap in a finished generation, returning the one it displaced.
    pub(crate) fn replace(&mut self, set: AtlasSet) -> Vec<TextureAtlas> {
        let next = Generation {
            lod: set.lod(),
            atlases: set.into_atlases(),
        };
        self.revision += 1;
        self.generation
            .replace(next)
            .map(|previous| previous.atlases)
            .unwrap_or_default()
    }

    pub(crate) fn clear(&mut self) -> Vec<TextureAtlas> {
        match self.generation.take() {
            Some(previous) => {
                self.revision += 1;
                previous.atlases
            }
            None => Vec::new(),
        }
    }

    /// Newest atlas of the generation holding the photo.
    pub(crate) fn find(&self, photo_id: PhotoId) -> Option<&TextureAtlas> {
        self.generation
            .as_ref()?
            .atlases
            .iter()
            .rev()
            .find(|atlas| atlas.contains(photo_id))
    }

    pub(crate) fn state(&self) -> SlotState {
        if self.generation.is_some() {
            SlotState::Populated
        } else {
            SlotState::Empty
        }
    }

    pub(crate) fn view(&self) -> BucketView {
        match &self.generation {
            Some(generation) => BucketView::new(
                self.kind,
                Some(generation.lod),
                self.revision,
                &generation.atlases,
            ),
            None => BucketView::new(self.kind, None, self.revision, &[]),
        }
    }

    pub(crate) fn atlases(&self) -> &[TextureAtlas] {
        self.generation
            .as_ref()
            .map(|generation| generation.atlases.as_slice())
            .unwrap_or(&[])
    }
}
