//! General bucket with two-tier LOD eviction
//!
//! The general bucket serves the visible photo set. It holds at most two LOD
//! tiers: `current`, the level being displayed, and `previous`, the level that
//! was displayed before the last LOD crossing. Keeping the previous tier means
//! a zoom never exposes an empty frame while the new level is generated.
//!
//! Inserting a set at the current tier's level merges into that tier. Inserting
//! at any other level demotes `current` to `previous` and releases whatever
//! `previous` held.
//!
//! Within a tier entries are FIFO. Capacity is demand-defined: the insertion
//! carries the working set size (how many photo slots the view needs) and the
//! oldest entries are evicted only while the tier holds more than that.

use std::collections::VecDeque;

use crate::atlas::{AtlasSet, PhotoId, TextureAtlas};
use crate::lod::LodLevel;
use crate::snapshot::TierView;

/// Atlases built at one LOD, oldest at the front.
#[derive(Debug)]
pub(crate) struct Tier {
    lod: LodLevel,
    entries: VecDeque<TextureAtlas>,
}

impl Tier {
    fn new(set: AtlasSet) -> Self {
        Self {
            lod: set.lod(),
            entries: set.into_atlases().into(),
        }
    }

    pub(crate) fn lod(&self) -> LodLevel {
        self.lod
    }

    /// Photo slots currently held by the tier.
    fn region_count(&self) -> usize {
        self.entries.iter().map(TextureAtlas::len).sum()
    }

    /// Merge a same-LOD set into the tier, returning evicted atlases.
    fn merge(&mut self, set: AtlasSet) -> Vec<TextureAtlas> {
        let incoming_photos = set.photo_ids();
        let working_set = set.working_set();
        let incoming = set.into_atlases();
        let incoming_len = incoming.len();

        // Entries entirely superseded by the incoming atlases are redundant.
        let mut evicted = Vec::new();
        let mut kept = VecDeque::with_capacity(self.entries.len() + incoming_len);
        for entry in self.entries.drain(..) {
            if entry.is_covered_by(&incoming_photos) {
                evicted.push(entry);
            } else {
                kept.push_back(entry);
            }
        }
        kept.extend(incoming);
        self.entries = kept;

        while self.region_count() > working_set && self.entries.len() > incoming_len {
            match self.entries.pop_front() {
                Some(oldest) => evicted.push(oldest),
                None => break,
            }
        }

        evicted
    }

    /// Newest entry holding the photo.
    fn find(&self, photo_id: PhotoId) -> Option<&TextureAtlas> {
        self.entries.iter().rev().find(|atlas| atlas.contains(photo_id))
    }

    fn view(&self) -> TierView {
        TierView::new(self.lod, self.entries.iter())
    }

    fn into_entries(self) -> Vec<TextureAtlas> {
        self.entries.into()
    }
}

/// Two-tier general bucket.
#[derive(Debug, Default)]
pub(crate) struct GeneralBucket {
    current: Option<Tier>,
    previous: Option<Tier>,
    revision: u64,
}

impl GeneralBucket {
    /// Insert a finished set, returning every atlas that left the bucket.
    pub(crate) fn insert(&mut self, set: AtlasSet) -> Vec<TextureAtlas> {
        self.revision += 1;

        match self.current.as_mut() {
            Some(current) if current.lod() == set.lod() => current.merge(set),
            Some(_) => {
                let discarded = self.previous.take();
                self.previous = self.current.take();
                self.current = Some(Tier::new(set));
                discarded.map(Tier::into_entries).unwrap_or_default()
            }
            None => {
                self.current = Some(Tier::new(set));
                Vec::new()
            }
        }
    }

    pub(crate) fn clear(&mut self) -> Vec<TextureAtlas> {
        let mut removed = Vec::new();
        if let Some(tier) = self.current.take() {
            removed.extend(tier.into_entries());
        }
        if let Some(tier) = self.previous.take() {
            removed.extend(tier.into_entries());
        }
        if !removed.is_empty() {
            self.revision += 1;
        }
        removed
    }

    /// Search `current` before `previous`.
    pub(crate) fn find(&self, photo_id: PhotoId) -> Option<&TextureAtlas> {
        self.current
            .as_ref()
            .and_then(|tier| tier.find(photo_id))
            .or_else(|| self.previous.as_ref().and_then(|tier| tier.find(photo_id)))
    }

    pub(crate) fn tier_count(&self) -> usize {
        self.current.is_some() as usize + self.previous.is_some() as usize
    }

    pub(crate) fn current_lod(&self) -> Option<LodLevel> {
        self.current.as_ref().map(Tier::lod)
    }

    pub(crate) fn previous_lod(&self) -> Option<LodLevel> {
        self.previous.as_ref().map(Tier::lod)
    }

    pub(crate) fn revision(&self) -> u64 {
        self.revision
    }

    pub(crate) fn views(&self) -> (Option<TierView>, Option<TierView>) {
        (
            self.current.as_ref().map(Tier::view),
            self.previous.as_ref().map(Tier::view),
        )
    }

    pub(crate) fn atlases(&self) -> impl Iterator<Item = &TextureAtlas> {
        self.current
            .iter()
            .chain(self.previous.iter())
            .flat_map(|tier| tier.entries.iter())
    }
}
