//! Level-of-detail ladder for packed photo atlases
//!
//! LOD 0 is the coarsest representation (a thumbnail-sized tile for every photo
//! in the library) and LOD 7 is maximum quality. The ladder is totally ordered.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Level of detail a photo is packed at.
///
/// Ordered from coarsest (`Lod0`) to finest (`Lod7`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LodLevel {
    Lod0 = 0,
    Lod1 = 1,
    Lod2 = 2,
    Lod3 = 3,
    Lod4 = 4,
    Lod5 = 5,
    Lod6 = 6,
    Lod7 = 7,
}

impl LodLevel {
    /// Coarsest level, used by the permanently resident base tier.
    pub const MIN: LodLevel = LodLevel::Lod0;

    /// Finest level, used for an explicitly selected photo.
    pub const MAX: LodLevel = LodLevel::Lod7;

    const LADDER: [LodLevel; 8] = [
        LodLevel::Lod0,
        LodLevel::Lod1,
        LodLevel::Lod2,
        LodLevel::Lod3,
        LodLevel::Lod4,
        LodLevel::Lod5,
        LodLevel::Lod6,
        LodLevel::Lod7,
    ];

    /// All levels, coarsest first.
    pub fn all() -> [LodLevel; 8] {
        Self::LADDER
    }

    /// Numeric index of this level (0..=7).
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Level for a numeric index, or `None` if the index is past `Lod7`.
    pub fn from_index(index: u8) -> Option<LodLevel> {
        Self::LADDER.get(index as usize).copied()
    }

    /// Next finer level, `None` at `Lod7`.
    pub fn higher(self) -> Option<LodLevel> {
        Self::from_index(self.index() + 1)
    }

    /// Next coarser level, `None` at `Lod0`.
    pub fn lower(self) -> Option<LodLevel> {
        self.index().checked_sub(1).and_then(Self::from_index)
    }

    /// Next finer level, staying at `Lod7` when already at the top.
    pub fn saturating_higher(self) -> LodLevel {
        self.higher().unwrap_or(LodLevel::MAX)
    }

    /// Nominal edge length in pixels a photo tile is packed at for this level.
    ///
    /// 32 px at `Lod0`, doubling per level up to 4096 px at `Lod7`.
    pub fn tile_side(self) -> u32 {
        32 << self.index()
    }
}

impl Default for LodLevel {
    fn default() -> Self {
        LodLevel::MIN
    }
}

impl fmt::Display for LodLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LOD{}", self.index())
    }
}
