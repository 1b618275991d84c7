//! Router behaviour with builds running on worker threads

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{
    builds_fit_atlas, init_logging, manager_with_base, photos, pooled_config, pooled_router,
    router_with_config, wait_until,
};
use photo_atlas_cache::{BucketKind, BucketManager, LodLevel, PhotoId};
use photo_atlas_core::{BuildOutcome, CellId, FocusedCell, UiMode};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn test_late_superseded_build_is_discarded() {
    init_logging();
    let manager = Arc::new(BucketManager::new());
    let (router, builder) = pooled_router(manager.clone(), 2);
    let release = builder.hold(PhotoId(1));

    router.on_visible_set_changed(photos([1]));
    assert_eq!(
        builder.started().recv_timeout(IDLE_TIMEOUT).unwrap(),
        photos([1])
    );

    router.on_visible_set_changed(photos([2]));
    assert!(wait_until(|| manager.lookup(PhotoId(2)).is_some()));

    release.send(()).unwrap();
    assert!(router.wait_idle(IDLE_TIMEOUT));

    assert!(manager.lookup(PhotoId(1)).is_none());
    assert_eq!(manager.lookup(PhotoId(2)).unwrap().bucket, BucketKind::General);
    let stats = router.stats();
    assert_eq!(stats.general.superseded, 1);
    assert_eq!(stats.general.installed, 1);
    assert_eq!(stats.general.discarded, 1);
    assert_eq!(stats.general.last_outcome, Some(BuildOutcome::Discarded));
}

#[test]
fn test_bucket_kinds_build_independently() {
    init_logging();
    let manager = Arc::new(BucketManager::new());
    let (router, builder) = pooled_router(manager.clone(), 2);
    let release = builder.hold(PhotoId(1));

    router.on_visible_set_changed(photos([1, 2]));
    builder.started().recv_timeout(IDLE_TIMEOUT).unwrap();

    router.on_focused_cell_changed(Some(FocusedCell::new(CellId(4), photos([7]))));
    assert!(wait_until(|| manager.lookup(PhotoId(7)).is_some()));
    assert!(manager.lookup(PhotoId(1)).is_none());

    drop(release);
    assert!(router.wait_idle(IDLE_TIMEOUT));
    assert_eq!(manager.lookup(PhotoId(1)).unwrap().bucket, BucketKind::General);
}

#[test]
fn test_clear_while_building_leaves_bucket_empty() {
    init_logging();
    let manager = manager_with_base(&photos([3]));
    let (router, builder) = pooled_router(manager.clone(), 1);
    let release = builder.hold(PhotoId(3));

    router.on_mode_changed(UiMode::PhotoMode);
    router.on_selected_photo_changed(Some(PhotoId(3)));
    builder.started().recv_timeout(IDLE_TIMEOUT).unwrap();
    router.on_selected_photo_changed(None);

    drop(release);
    assert!(router.wait_idle(IDLE_TIMEOUT));

    let hit = manager.lookup(PhotoId(3)).unwrap();
    assert_eq!(hit.bucket, BucketKind::Base);
    assert_eq!(router.stats().selection_context.discarded, 1);
}

#[test]
fn test_last_signal_wins() {
    init_logging();
    let manager = Arc::new(BucketManager::new());
    let (router, _builder) = pooled_router(manager.clone(), 1);

    router.on_zoom_crossed_lod_boundary(LodLevel::Lod2);
    for start in 0..20u64 {
        router.on_visible_set_changed(photos(start * 10..start * 10 + 5));
    }
    assert!(router.wait_idle(IDLE_TIMEOUT));

    for photo in photos(190..195) {
        let hit = manager.lookup(photo).unwrap();
        assert_eq!(hit.bucket, BucketKind::General);
        assert_eq!(hit.lod, LodLevel::Lod2);
    }
    assert!(manager.general_tier_count() <= 2);
}

#[test]
fn test_concurrent_signals_and_lookups() {
    init_logging();
    let library = photos(1..=64);
    let manager = manager_with_base(&library);
    let (router, builder) = pooled_router(manager.clone(), 4);
    let router = Arc::new(router);

    let mut handles = Vec::new();
    for seed in 0..4u64 {
        let router = router.clone();
        handles.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(seed);
            for _ in 0..100 {
                match rng.gen_range(0..4) {
                    0 => {
                        let start = rng.gen_range(1..=48);
                        router.on_visible_set_changed(photos(start..start + 16));
                    }
                    1 => {
                        let lod = LodLevel::from_index(rng.gen_range(0..8)).unwrap();
                        router.on_zoom_crossed_lod_boundary(lod);
                    }
                    2 => {
                        let start = rng.gen_range(1..=60);
                        router.on_focused_cell_changed(Some(FocusedCell::new(
                            CellId(start),
                            photos(start..start + 4),
                        )));
                    }
                    _ => router.on_selected_photo_changed(Some(PhotoId(rng.gen_range(1..=64)))),
                }
            }
        }));
    }
    for _ in 0..2 {
        let manager = manager.clone();
        let library = library.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..200 {
                for photo in &library {
                    let hit = manager.lookup_with(*photo, |_, atlas, region| {
                        assert!(atlas.contains(region.photo_id));
                        region.rect
                    });
                    assert!(hit.is_some());
                }
                assert!(manager.general_tier_count() <= 2);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    router.on_mode_changed(UiMode::PhotoMode);
    assert!(router.wait_idle(IDLE_TIMEOUT));

    let stats = router.stats();
    let general = &stats.general;
    assert!(general.requested - general.deduplicated >= general.completed());
    assert!(builds_fit_atlas(&builder, &pooled_config(4)));
    assert!(manager.general_tier_count() <= 2);
}

#[test]
fn test_signals_after_shutdown_do_not_build() {
    init_logging();
    let (router, builder) = pooled_router(Arc::new(BucketManager::new()), 2);

    router.on_visible_set_changed(photos(1..=3));
    assert!(router.wait_idle(IDLE_TIMEOUT));
    assert_eq!(builder.calls(), 1);

    router.shutdown();
    router.shutdown();
    router.on_visible_set_changed(photos(4..=6));

    assert!(router.wait_idle(IDLE_TIMEOUT));
    assert_eq!(builder.calls(), 1);
}

#[test]
fn test_large_visible_set_spans_several_atlases() {
    init_logging();
    let manager = Arc::new(BucketManager::new());
    // Four LOD 0 tiles per atlas
    let config = pooled_config(2).with_max_atlas_side(64);
    let (router, builder) = router_with_config(manager.clone(), &config);

    router.on_visible_set_changed(photos(1..=10));
    assert!(router.wait_idle(IDLE_TIMEOUT));

    let chunks: Vec<Vec<PhotoId>> = builder.builds().into_iter().map(|(ids, _)| ids).collect();
    assert_eq!(chunks, vec![photos(1..=4), photos(5..=8), photos(9..=10)]);

    let general = manager.snapshot().general;
    let tier = general.current_tier.unwrap();
    assert_eq!(tier.lod, LodLevel::Lod0);
    assert_eq!(tier.atlases.len(), 3);
    for photo in photos(1..=10) {
        assert_eq!(manager.lookup(photo).unwrap().bucket, BucketKind::General);
    }
    let stats = router.stats();
    assert_eq!(stats.general.installed, 1);
    assert_eq!(stats.general.last_outcome, Some(BuildOutcome::Installed));
}

#[test]
fn test_returning_to_installed_set_skips_rebuild() {
    init_logging();
    let manager = Arc::new(BucketManager::new());
    let (router, builder) = pooled_router(manager.clone(), 1);

    router.on_visible_set_changed(photos([1, 2]));
    assert!(router.wait_idle(IDLE_TIMEOUT));
    assert_eq!(
        builder.started().recv_timeout(IDLE_TIMEOUT).unwrap(),
        photos([1, 2])
    );

    let release = builder.hold(PhotoId(3));
    router.on_visible_set_changed(photos([3]));
    assert_eq!(
        builder.started().recv_timeout(IDLE_TIMEOUT).unwrap(),
        photos([3])
    );
    router.on_visible_set_changed(photos([2, 1]));

    release.send(()).unwrap();
    assert!(router.wait_idle(IDLE_TIMEOUT));

    assert_eq!(builder.calls(), 2);
    assert!(manager.lookup(PhotoId(3)).is_none());
    assert_eq!(manager.lookup(PhotoId(1)).unwrap().bucket, BucketKind::General);
    let stats = router.stats();
    assert_eq!(stats.general.installed, 1);
    assert_eq!(stats.general.superseded, 1);
    assert_eq!(stats.general.deduplicated, 1);
    assert_eq!(stats.general.discarded, 1);
}
