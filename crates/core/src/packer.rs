//! Shelf packing and a CPU-surface atlas builder
//!
//! Photos are sorted by height and laid out on horizontal shelves. The first
//! shelf that still has room takes the photo; otherwise a new shelf opens
//! below the last one. The surface width grows in powers of two up to a
//! configured limit; the height is the next power of two covering the
//! shelves actually used.

use std::time::Instant;

use log::debug;
use photo_atlas_cache::{AtlasSurface, LodLevel, PhotoId, PhotoRegion, Rect, TextureAtlas};
use photo_atlas_scheduler::CancellationToken;

use crate::builder::{AtlasBuilder, BuildError, BuildResult};

/// RGBA8 bytes per pixel.
const BYTES_PER_PIXEL: usize = 4;

/// Result of packing: the surface extent and one region per photo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedLayout {
    pub width: u32,
    pub height: u32,
    pub regions: Vec<PhotoRegion>,
}

impl PackedLayout {
    /// Fraction of the surface covered by photos.
    pub fn occupancy(&self) -> f64 {
        if self.width == 0 || self.height == 0 {
            return 0.0;
        }
        let used: u64 = self.regions.iter().map(|region| region.rect.area()).sum();
        used as f64 / (self.width as f64 * self.height as f64)
    }
}

#[derive(Debug, Clone, Copy)]
struct Shelf {
    y: u32,
    height: u32,
    cursor_x: u32,
}

/// Shelf packer for power-of-two surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShelfPacker {
    pub max_side: u32,
    pub padding: u32,
}

impl ShelfPacker {
    pub fn new(max_side: u32, padding: u32) -> Self {
        Self { max_side, padding }
    }

    /// Pack `(photo, width, height)` entries.
    ///
    /// # Errors
    /// [`BuildError::MalformedSource`] for an empty input or a zero-sized
    /// photo; [`BuildError::SurfaceTooLarge`] when no surface up to
    /// `max_side` holds every photo.
    pub fn pack(&self, items: &[(PhotoId, u32, u32)]) -> BuildResult<PackedLayout> {
        if items.is_empty() {
            return Err(BuildError::MalformedSource("nothing to pack".to_string()));
        }
        if let Some((photo_id, _, _)) = items.iter().find(|(_, w, h)| *w == 0 || *h == 0) {
            return Err(BuildError::MalformedSource(format!(
                "{photo_id} has an empty extent"
            )));
        }

        let mut sorted = items.to_vec();
        // Tallest first; ties by id keep the layout deterministic
        sorted.sort_by(|a, b| b.2.cmp(&a.2).then(a.0.cmp(&b.0)));

        let mut side = self.initial_side(&sorted);
        loop {
            if side > self.max_side {
                return Err(BuildError::SurfaceTooLarge {
                    required: side,
                    max: self.max_side,
                });
            }
            if let Some((regions, used_height)) = self.try_pack(side, &sorted) {
                return Ok(PackedLayout {
                    width: side,
                    height: used_height.next_power_of_two().min(side),
                    regions,
                });
            }
            side = match side.checked_mul(2) {
                Some(next) => next,
                None => {
                    return Err(BuildError::SurfaceTooLarge {
                        required: u32::MAX,
                        max: self.max_side,
                    })
                }
            };
        }
    }

    /// Smallest power of two that fits the widest photo and the total area.
    fn initial_side(&self, items: &[(PhotoId, u32, u32)]) -> u32 {
        let pad = u64::from(self.padding) * 2;
        let widest = items
            .iter()
            .map(|(_, w, h)| u64::from(*w).max(u64::from(*h)) + pad)
            .max()
            .unwrap_or(1);
        let area: u64 = items
            .iter()
            .map(|(_, w, h)| (u64::from(*w) + pad) * (u64::from(*h) + pad))
            .sum();
        let min_side = widest.max((area as f64).sqrt().ceil() as u64);
        u32::try_from(min_side.next_power_of_two()).unwrap_or(u32::MAX)
    }

    /// Regions and the height of the shelves used, or `None` if `side` is too small.
    fn try_pack(
        &self,
        side: u32,
        items: &[(PhotoId, u32, u32)],
    ) -> Option<(Vec<PhotoRegion>, u32)> {
        let pad = self.padding;
        let mut shelves: Vec<Shelf> = Vec::new();
        let mut regions = Vec::with_capacity(items.len());

        for &(photo_id, width, height) in items {
            let slot_w = width.checked_add(pad * 2)?;
            let slot_h = height.checked_add(pad * 2)?;
            if slot_w > side || slot_h > side {
                return None;
            }

            let fit = shelves
                .iter()
                .position(|shelf| slot_h <= shelf.height && shelf.cursor_x + slot_w <= side);

            let index = match fit {
                Some(index) => index,
                None => {
                    let y = shelves.last().map_or(0, |last| last.y + last.height);
                    if y + slot_h > side {
                        return None;
                    }
                    shelves.push(Shelf {
                        y,
                        height: slot_h,
                        cursor_x: 0,
                    });
                    shelves.len() - 1
                }
            };

            let shelf = &mut shelves[index];
            let rect = Rect::new(shelf.cursor_x + pad, shelf.y + pad, width, height);
            shelf.cursor_x += slot_w;
            regions.push(PhotoRegion::new(photo_id, rect));
        }

        let used_height = shelves.last().map_or(0, |last| last.y + last.height);
        Some((regions, used_height))
    }
}

/// Where photo pixels come from
///
/// Implemented by the host's decoder. Both calls run on build workers.
pub trait PhotoSource: Send + Sync {
    /// Native pixel size of a photo.
    fn dimensions(&self, photo_id: PhotoId) -> BuildResult<(u32, u32)>;

    /// Decode and scale a photo into `target`, a tightly packed RGBA8 buffer
    /// of exactly `width * height * 4` bytes.
    fn render_into(
        &self,
        photo_id: PhotoId,
        width: u32,
        height: u32,
        target: &mut [u8],
    ) -> BuildResult<()>;
}

/// RGBA8 pixels in main memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuSurface {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl CpuSurface {
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let px = self.pixels.get(offset..offset + BYTES_PER_PIXEL)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

/// [`AtlasBuilder`] that scales photos to the LOD tile size, shelf-packs them
/// and renders into a [`CpuSurface`]
pub struct PackingAtlasBuilder<S> {
    source: S,
    packer: ShelfPacker,
}

impl<S: PhotoSource> PackingAtlasBuilder<S> {
    pub fn new(source: S, packer: ShelfPacker) -> Self {
        Self { source, packer }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn packer(&self) -> &ShelfPacker {
        &self.packer
    }

    fn render_region(
        &self,
        region: &PhotoRegion,
        stride_px: u32,
        pixels: &mut [u8],
        scratch: &mut Vec<u8>,
    ) -> BuildResult<()> {
        let Rect {
            x,
            y,
            width,
            height,
        } = region.rect;
        let len = width as usize * height as usize * BYTES_PER_PIXEL;

        scratch.clear();
        scratch
            .try_reserve_exact(len)
            .map_err(|_| BuildError::OutOfMemory {
                requested_bytes: len,
            })?;
        scratch.resize(len, 0);
        self.source
            .render_into(region.photo_id, width, height, scratch)?;

        let row_len = width as usize * BYTES_PER_PIXEL;
        let stride = stride_px as usize * BYTES_PER_PIXEL;
        for (row, src) in scratch.chunks_exact(row_len).enumerate() {
            let start = (y as usize + row) * stride + x as usize * BYTES_PER_PIXEL;
            pixels[start..start + row_len].copy_from_slice(src);
        }
        Ok(())
    }
}

impl<S: PhotoSource> AtlasBuilder for PackingAtlasBuilder<S> {
    fn build(
        &self,
        photo_ids: &[PhotoId],
        lod: LodLevel,
        cancel: &CancellationToken,
    ) -> BuildResult<TextureAtlas> {
        let started = Instant::now();
        let mut ids = photo_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        // Padding comes out of the tile so a full-size tile still fits its level
        let tile = lod
            .tile_side()
            .saturating_sub(self.packer.padding * 2)
            .max(1);
        let mut items = Vec::with_capacity(ids.len());
        for photo_id in ids {
            if cancel.is_cancelled() {
                return Err(BuildError::Cancelled);
            }
            let (width, height) = self.source.dimensions(photo_id)?;
            if width == 0 || height == 0 {
                return Err(BuildError::MalformedSource(format!(
                    "{photo_id} reports a {width}x{height} image"
                )));
            }
            let (w, h) = fit_within(width, height, tile);
            items.push((photo_id, w, h));
        }

        let layout = self.packer.pack(&items)?;
        let (width, height) = (layout.width, layout.height);

        let bytes = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(BYTES_PER_PIXEL))
            .ok_or(BuildError::OutOfMemory {
                requested_bytes: usize::MAX,
            })?;
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(bytes)
            .map_err(|_| BuildError::OutOfMemory {
                requested_bytes: bytes,
            })?;
        pixels.resize(bytes, 0);

        let mut scratch = Vec::new();
        for region in &layout.regions {
            if cancel.is_cancelled() {
                return Err(BuildError::Cancelled);
            }
            self.render_region(region, width, &mut pixels, &mut scratch)?;
        }

        debug!(
            "packed {} photo(s) at {} into {}x{} ({:.0}% used) in {:?}",
            layout.regions.len(),
            lod,
            width,
            height,
            layout.occupancy() * 100.0,
            started.elapsed()
        );

        let surface = AtlasSurface::new(
            CpuSurface {
                width,
                height,
                pixels,
            },
            width,
            height,
            bytes,
        );
        Ok(TextureAtlas::new(lod, surface, layout.regions))
    }
}

/// Scale so the longer edge equals `tile`, keeping the aspect ratio.
fn fit_within(width: u32, height: u32, tile: u32) -> (u32, u32) {
    let (w, h, t) = (u64::from(width), u64::from(height), u64::from(tile));
    if w >= h {
        (tile, ((h * t + w / 2) / w).max(1) as u32)
    } else {
        (((w * t + h / 2) / h).max(1) as u32, tile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overlaps(regions: &[PhotoRegion]) -> bool {
        regions.iter().enumerate().any(|(i, a)| {
            regions[i + 1..]
                .iter()
                .any(|b| a.rect.intersects(&b.rect))
        })
    }

    /// Every photo is a solid colour derived from its id.
    struct SolidSource {
        sizes: HashMap<PhotoId, (u32, u32)>,
    }

    impl SolidSource {
        fn new(sizes: &[(u64, u32, u32)]) -> Self {
            Self {
                sizes: sizes
                    .iter()
                    .map(|&(id, w, h)| (PhotoId(id), (w, h)))
                    .collect(),
            }
        }
    }

    impl PhotoSource for SolidSource {
        fn dimensions(&self, photo_id: PhotoId) -> BuildResult<(u32, u32)> {
            self.sizes.get(&photo_id).copied().ok_or(BuildError::Decode {
                photo_id,
                reason: "unknown photo".to_string(),
            })
        }

        fn render_into(
            &self,
            photo_id: PhotoId,
            _width: u32,
            _height: u32,
            target: &mut [u8],
        ) -> BuildResult<()> {
            let shade = photo_id.0 as u8;
            for px in target.chunks_exact_mut(4) {
                px.copy_from_slice(&[shade, shade, shade, 255]);
            }
            Ok(())
        }
    }

    #[test]
    fn test_fit_within() {
        assert_eq!(fit_within(4000, 3000, 32), (32, 24));
        assert_eq!(fit_within(3000, 4000, 32), (24, 32));
        assert_eq!(fit_within(100, 100, 64), (64, 64));
        assert_eq!(fit_within(10_000, 1, 32), (32, 1));
    }

    #[test]
    fn test_pack_single() {
        let packer = ShelfPacker::new(1024, 0);
        let layout = packer.pack(&[(PhotoId(1), 32, 24)]).unwrap();

        assert_eq!((layout.width, layout.height), (32, 32));
        assert_eq!(layout.regions[0].rect, Rect::new(0, 0, 32, 24));
    }

    #[test]
    fn test_pack_tallest_first_on_shelves() {
        let packer = ShelfPacker::new(1024, 0);
        let layout = packer
            .pack(&[
                (PhotoId(1), 32, 16),
                (PhotoId(2), 32, 32),
                (PhotoId(3), 32, 16),
                (PhotoId(4), 32, 32),
            ])
            .unwrap();

        assert_eq!((layout.width, layout.height), (64, 64));
        let by_id: HashMap<_, _> = layout
            .regions
            .iter()
            .map(|region| (region.photo_id, region.rect))
            .collect();
        // The two tall photos share the first shelf
        assert_eq!(by_id[&PhotoId(2)].y, 0);
        assert_eq!(by_id[&PhotoId(4)].y, 0);
        assert_eq!(by_id[&PhotoId(1)].y, 32);
        assert_eq!(by_id[&PhotoId(3)].y, 32);
        assert!(!overlaps(&layout.regions));
    }

    #[test]
    fn test_pack_respects_padding() {
        let packer = ShelfPacker::new(1024, 2);
        let layout = packer
            .pack(&[(PhotoId(1), 10, 10), (PhotoId(2), 10, 10)])
            .unwrap();

        for region in &layout.regions {
            assert!(region.rect.x >= 2 && region.rect.y >= 2);
            assert!(region.rect.right() + 2 <= layout.width);
            assert!(region.rect.bottom() + 2 <= layout.height);
        }
        let a = layout.regions[0].rect;
        let b = layout.regions[1].rect;
        assert!(b.x >= a.right() + 4 || a.x >= b.right() + 4 || b.y >= a.bottom() + 4);
    }

    #[test]
    fn test_pack_grows_surface() {
        let packer = ShelfPacker::new(4096, 0);
        let items: Vec<_> = (0..40).map(|i| (PhotoId(i), 64, 48)).collect();
        let layout = packer.pack(&items).unwrap();

        assert!(layout.width.is_power_of_two());
        assert!(layout.height.is_power_of_two());
        assert!(layout.height <= layout.width);
        assert_eq!(layout.regions.len(), 40);
        assert!(!overlaps(&layout.regions));
        assert!(layout
            .regions
            .iter()
            .all(|r| r.rect.right() <= layout.width && r.rect.bottom() <= layout.height));
        assert!(layout.occupancy() > 0.0 && layout.occupancy() <= 1.0);
    }

    #[test]
    fn test_pack_trims_unused_height() {
        let packer = ShelfPacker::new(1024, 0);
        let layout = packer
            .pack(&[(PhotoId(1), 32, 8), (PhotoId(2), 32, 8)])
            .unwrap();

        // Two 8px shelves on a 32px wide surface
        assert_eq!((layout.width, layout.height), (32, 16));
        assert_eq!(layout.regions[0].rect.y, 0);
        assert_eq!(layout.regions[1].rect.y, 8);
    }

    #[test]
    fn test_pack_too_large() {
        let packer = ShelfPacker::new(64, 0);
        let items: Vec<_> = (0..8).map(|i| (PhotoId(i), 32, 32)).collect();

        assert_eq!(
            packer.pack(&items).unwrap_err(),
            BuildError::SurfaceTooLarge {
                required: 128,
                max: 64
            }
        );
    }

    #[test]
    fn test_pack_rejects_empty() {
        let packer = ShelfPacker::new(64, 0);
        assert!(matches!(
            packer.pack(&[]),
            Err(BuildError::MalformedSource(_))
        ));
        assert!(matches!(
            packer.pack(&[(PhotoId(1), 0, 10)]),
            Err(BuildError::MalformedSource(_))
        ));
    }

    #[test]
    fn test_builder_renders_photos() {
        let source = SolidSource::new(&[(10, 400, 300), (20, 300, 400)]);
        let builder = PackingAtlasBuilder::new(source, ShelfPacker::new(1024, 0));

        let atlas = builder
            .build(&[PhotoId(10), PhotoId(20)], LodLevel::Lod0, &CancellationToken::new())
            .unwrap();

        assert_eq!(atlas.lod(), LodLevel::Lod0);
        assert_eq!(atlas.len(), 2);
        assert_eq!(atlas.region(PhotoId(10)).unwrap().rect.width, 32);
        assert_eq!(atlas.region(PhotoId(10)).unwrap().rect.height, 24);
        assert_eq!(atlas.region(PhotoId(20)).unwrap().rect.width, 24);

        let surface = atlas.surface().handle::<CpuSurface>().unwrap();
        assert_eq!(atlas.byte_size(), surface.pixels.len());
        let rect = atlas.region(PhotoId(20)).unwrap().rect;
        assert_eq!(surface.pixel(rect.x, rect.y), Some([20, 20, 20, 255]));
    }

    #[test]
    fn test_builder_scales_with_lod() {
        let source = SolidSource::new(&[(1, 1000, 1000)]);
        let builder = PackingAtlasBuilder::new(source, ShelfPacker::new(4096, 0));
        let token = CancellationToken::new();

        let low = builder.build(&[PhotoId(1)], LodLevel::Lod0, &token).unwrap();
        let high = builder.build(&[PhotoId(1)], LodLevel::Lod2, &token).unwrap();

        assert_eq!(low.region(PhotoId(1)).unwrap().rect.width, 32);
        assert_eq!(high.region(PhotoId(1)).unwrap().rect.width, 128);
    }

    #[test]
    fn test_builder_top_level_photo_fits_one_tile() {
        let source = SolidSource::new(&[(1, 4096, 3072)]);
        let builder = PackingAtlasBuilder::new(source, ShelfPacker::new(8192, 1));

        let atlas = builder
            .build(&[PhotoId(1)], LodLevel::Lod7, &CancellationToken::new())
            .unwrap();

        let rect = atlas.region(PhotoId(1)).unwrap().rect;
        assert_eq!((rect.width, rect.height), (4094, 3071));
        let surface = atlas.surface().handle::<CpuSurface>().unwrap();
        assert_eq!((surface.width, surface.height), (4096, 4096));
        assert_eq!(atlas.byte_size(), 4096 * 4096 * 4);
    }

    #[test]
    fn test_builder_padding_comes_out_of_tile() {
        let source = SolidSource::new(&[(1, 400, 300)]);
        let builder = PackingAtlasBuilder::new(source, ShelfPacker::new(1024, 2));

        let atlas = builder
            .build(&[PhotoId(1)], LodLevel::Lod0, &CancellationToken::new())
            .unwrap();

        let rect = atlas.region(PhotoId(1)).unwrap().rect;
        assert_eq!((rect.x, rect.y, rect.width, rect.height), (2, 2, 28, 21));
        let surface = atlas.surface().handle::<CpuSurface>().unwrap();
        assert_eq!((surface.width, surface.height), (32, 32));
    }

    #[test]
    fn test_builder_propagates_decode_error() {
        let source = SolidSource::new(&[(1, 10, 10)]);
        let builder = PackingAtlasBuilder::new(source, ShelfPacker::new(1024, 0));

        let err = builder
            .build(&[PhotoId(1), PhotoId(2)], LodLevel::Lod0, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, BuildError::Decode { photo_id: PhotoId(2), .. }));
    }

    #[test]
    fn test_builder_honours_cancellation() {
        let source = SolidSource::new(&[(1, 10, 10)]);
        let builder = PackingAtlasBuilder::new(source, ShelfPacker::new(1024, 0));
        let token = CancellationToken::new();
        token.cancel();

        assert_eq!(
            builder.build(&[PhotoId(1)], LodLevel::Lod0, &token).unwrap_err(),
            BuildError::Cancelled
        );
    }
}
