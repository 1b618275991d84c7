//! Atlas builder contract
//!
//! Building an atlas (decode, scale, pack) is the only long-running operation
//! in the engine. It always runs outside every bucket lock, on a worker thread
//! or on the signalling thread in inline mode.

use std::sync::Arc;

use photo_atlas_cache::{CacheError, LodLevel, PhotoId, TextureAtlas};
use photo_atlas_scheduler::CancellationToken;

/// Why a build produced no atlas
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("failed to decode {photo_id}: {reason}")]
    Decode { photo_id: PhotoId, reason: String },

    #[error("malformed source: {0}")]
    MalformedSource(String),

    #[error("atlas needs a {required}px surface, limit is {max}px")]
    SurfaceTooLarge { required: u32, max: u32 },

    #[error("out of memory allocating {requested_bytes} bytes")]
    OutOfMemory { requested_bytes: usize },

    #[error("build cancelled")]
    Cancelled,

    /// The finished atlas violates the target bucket's contract
    #[error("bucket rejected atlas: {0}")]
    Rejected(#[from] CacheError),
}

impl BuildError {
    /// Allocation exhaustion is the only failure allowed to escalate.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BuildError::OutOfMemory { .. })
    }
}

pub type BuildResult<T> = Result<T, BuildError>;

/// Produces a packed atlas for a set of photos at one LOD
///
/// Implementations may poll `cancel` and return [`BuildError::Cancelled`]
/// early; a result that arrives after cancellation is discarded anyway.
pub trait AtlasBuilder: Send + Sync {
    fn build(
        &self,
        photo_ids: &[PhotoId],
        lod: LodLevel,
        cancel: &CancellationToken,
    ) -> BuildResult<TextureAtlas>;
}

impl<B: AtlasBuilder + ?Sized> AtlasBuilder for Arc<B> {
    fn build(
        &self,
        photo_ids: &[PhotoId],
        lod: LodLevel,
        cancel: &CancellationToken,
    ) -> BuildResult<TextureAtlas> {
        (**self).build(photo_ids, lod, cancel)
    }
}

impl<B: AtlasBuilder + ?Sized> AtlasBuilder for &B {
    fn build(
        &self,
        photo_ids: &[PhotoId],
        lod: LodLevel,
        cancel: &CancellationToken,
    ) -> BuildResult<TextureAtlas> {
        (**self).build(photo_ids, lod, cancel)
    }
}
