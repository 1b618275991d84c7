//! Photo Atlas Core Library
//!
//! Context-aware atlas generation for a zoomable photo grid: view-state
//! signals go in, deduplicated and cancellable builds come out, and every
//! install or clear is published as a cache snapshot.
//!
//! ```no_run
//! use std::sync::Arc;
//! use photo_atlas_cache::{BucketManager, PhotoId};
//! use photo_atlas_core::{
//!     populate_base, BuildResult, ContextSignalRouter, EngineConfig, PackingAtlasBuilder,
//!     PhotoSource, ShelfPacker, UiMode,
//! };
//!
//! struct Decoder;
//!
//! impl PhotoSource for Decoder {
//!     fn dimensions(&self, _photo_id: PhotoId) -> BuildResult<(u32, u32)> {
//!         Ok((4000, 3000))
//!     }
//!
//!     fn render_into(&self, _: PhotoId, _: u32, _: u32, target: &mut [u8]) -> BuildResult<()> {
//!         target.fill(255);
//!         Ok(())
//!     }
//! }
//!
//! let config = EngineConfig::from_env().unwrap_or_default();
//! let manager = Arc::new(BucketManager::new());
//! let builder = Arc::new(PackingAtlasBuilder::new(
//!     Decoder,
//!     ShelfPacker::new(config.max_atlas_side, config.padding),
//! ));
//!
//! let library: Vec<PhotoId> = (1..=500).map(PhotoId).collect();
//! populate_base(&manager, builder.as_ref(), &library, config.base_chunk).unwrap();
//!
//! let router = ContextSignalRouter::new(manager, builder, &config);
//! let events = router.publisher().subscribe();
//! router.on_selected_photo_changed(Some(PhotoId(42)));
//! router.on_mode_changed(UiMode::PhotoMode);
//! let _ = events.recv();
//! ```

pub mod base;
pub mod builder;
pub mod config;
pub mod fingerprint;
pub mod packer;
pub mod publisher;
pub mod router;

pub use base::{populate_base, BaseBootstrap};
pub use builder::{AtlasBuilder, BuildError, BuildResult};
pub use config::{ConfigError, EngineConfig};
pub use fingerprint::{identity_hash, DedupGuard, GenerationFingerprint, TriggerKind};
pub use packer::{CpuSurface, PackedLayout, PackingAtlasBuilder, PhotoSource, ShelfPacker};
pub use publisher::{AtlasEvent, BuildFailureRecord, ResultPublisher};
pub use router::{
    BucketBuildStats, BuildOutcome, CellId, ContextSignalRouter, FocusedCell, RouterStats, UiMode,
};
