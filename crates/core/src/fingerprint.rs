//! Generation fingerprints and the dedup guard
//!
//! Small pans and zooms fire the same signals over and over. A fingerprint
//! captures what a generation would contain; if it matches the last one
//! requested for that bucket, nothing is rebuilt.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use photo_atlas_cache::{LodLevel, PhotoId};
use serde::Serialize;

/// The context a generation is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TriggerKind {
    FocusedCell,
    SelectedPhoto,
    VisibleSet,
}

/// Identity of one requested generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct GenerationFingerprint {
    pub trigger: TriggerKind,
    pub lod: LodLevel,
    /// Order-independent hash of the photo-id set
    pub identity_hash: u64,
}

impl GenerationFingerprint {
    pub fn new(trigger: TriggerKind, lod: LodLevel, photo_ids: &[PhotoId]) -> Self {
        Self {
            trigger,
            lod,
            identity_hash: identity_hash(photo_ids),
        }
    }
}

/// Hash a photo-id set, ignoring order and duplicates.
pub fn identity_hash(photo_ids: &[PhotoId]) -> u64 {
    let mut ids = photo_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();

    let mut hasher = DefaultHasher::new();
    ids.hash(&mut hasher);
    hasher.finish()
}

/// Tracks the last requested and last installed generation of one bucket
#[derive(Debug, Clone, Default)]
pub struct DedupGuard {
    last_requested: Option<GenerationFingerprint>,
    last_installed: Option<GenerationFingerprint>,
}

impl DedupGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// False when `fingerprint` is already built or being built.
    pub fn should_build(&self, fingerprint: &GenerationFingerprint) -> bool {
        self.last_requested.as_ref() != Some(fingerprint)
    }

    /// True when `fingerprint` is what the bucket currently holds.
    pub fn is_installed(&self, fingerprint: &GenerationFingerprint) -> bool {
        self.last_installed.as_ref() == Some(fingerprint)
    }

    pub fn mark_requested(&mut self, fingerprint: GenerationFingerprint) {
        self.last_requested = Some(fingerprint);
    }

    pub fn mark_installed(&mut self, fingerprint: GenerationFingerprint) {
        self.last_installed = Some(fingerprint);
        self.last_requested = Some(fingerprint);
    }

    /// The requested build failed; the bucket still holds the last install,
    /// so asking for the failed generation again must retry it.
    pub fn mark_failed(&mut self) {
        self.last_requested = self.last_installed;
    }

    /// The bucket was cleared.
    pub fn reset(&mut self) {
        self.last_requested = None;
        self.last_installed = None;
    }

    pub fn last_requested(&self) -> Option<&GenerationFingerprint> {
        self.last_requested.as_ref()
    }

    pub fn last_installed(&self) -> Option<&GenerationFingerprint> {
        self.last_installed.as_ref()
    }
}
