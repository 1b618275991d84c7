//! Base tier bootstrap
//!
//! At startup the whole library is built at LOD 0 so every photo has at least
//! one renderable region. The base tier is rebuilt on every launch rather
//! than persisted.

use std::time::{Duration, Instant};

use log::{error, info};
use photo_atlas_cache::{AtlasSet, BucketKind, BucketManager, LodLevel, PhotoId};
use photo_atlas_scheduler::CancellationToken;

use crate::builder::{AtlasBuilder, BuildResult};

/// Summary of a completed bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseBootstrap {
    pub atlases: usize,
    pub photos: usize,
    pub elapsed: Duration,
}

/// Build `library` at LOD 0 in chunks of `photos_per_atlas` and add each
/// chunk to the base bucket.
///
/// Chunks inserted before a failure stay installed.
///
/// # Errors
/// The first build failure aborts the bootstrap and is returned.
pub fn populate_base<B: AtlasBuilder + ?Sized>(
    manager: &BucketManager,
    builder: &B,
    library: &[PhotoId],
    photos_per_atlas: usize,
) -> BuildResult<BaseBootstrap> {
    let started = Instant::now();
    let token = CancellationToken::new();
    let mut report = BaseBootstrap {
        atlases: 0,
        photos: 0,
        elapsed: Duration::ZERO,
    };

    for chunk in library.chunks(photos_per_atlas.max(1)) {
        let atlas = builder.build(chunk, LodLevel::Lod0, &token).map_err(|err| {
            error!("base bootstrap failed after {} atlas(es): {}", report.atlases, err);
            err
        })?;
        report.photos += atlas.len();
        manager.insert_or_replace(BucketKind::Base, AtlasSet::single(atlas))?;
        report.atlases += 1;
    }

    report.elapsed = started.elapsed();
    info!(
        "base tier ready: {} photo(s) in {} atlas(es) ({:?})",
        report.photos, report.atlases, report.elapsed
    );
    Ok(report)
}
