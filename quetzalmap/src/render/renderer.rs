//! Tile rendering from decoded region data.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};

use super::color::ColorMapper;
use super::pool::{PixelBufferPool, PoolStats};
use crate::tile::{ChunkPos, TileCoord, TileImage, TileImageError, CHUNKS_PER_TILE};
use crate::world::{RegionCache, RegionDocument, RegionError};

/// Errors that fail a whole render.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("region error: {0}")]
    Region(#[from] RegionError),

    #[error("tile image error: {0}")]
    Image(#[from] TileImageError),

    #[error("chunk {chunk} is not inside tile {tile}")]
    ChunkOutsideTile { chunk: ChunkPos, tile: TileCoord },
}

/// Point-in-time renderer statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderStats {
    pub tiles_rendered: u64,
    pub chunks_rendered: u64,
    pub chunk_failures: u64,
    pub pool: PoolStats,
}

impl fmt::Display for RenderStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tiles={} chunks={} chunk_failures={} {}",
            self.tiles_rendered, self.chunks_rendered, self.chunk_failures, self.pool
        )
    }
}

/// Composes chunk surfaces into tile images.
///
/// A tile spans exactly one region, so a full render walks that region's
/// 32×32 chunk grid. Every zoom level currently renders at full detail.
pub struct TileRenderer {
    regions: Arc<RegionCache>,
    colors: ColorMapper,
    pool: PixelBufferPool,
    tiles_rendered: AtomicU64,
    chunks_rendered: AtomicU64,
    chunk_failures: AtomicU64,
}

impl TileRenderer {
    pub fn new(regions: Arc<RegionCache>, colors: ColorMapper, pool: PixelBufferPool) -> Self {
        Self {
            regions,
            colors,
            pool,
            tiles_rendered: AtomicU64::new(0),
            chunks_rendered: AtomicU64::new(0),
            chunk_failures: AtomicU64::new(0),
        }
    }

    pub fn regions(&self) -> &Arc<RegionCache> {
        &self.regions
    }

    /// Renders a whole tile from its region file.
    ///
    /// A missing region file yields a blank tile. Chunks that fail to read are
    /// left blank and counted; they do not fail the tile. The returned tile is
    /// clean.
    pub fn render_full(&self, coord: &TileCoord) -> Result<TileImage, RenderError> {
        let started = Instant::now();
        let tile = TileImage::new(coord.clone());
        let (region_x, region_z) = coord.region();
        let document = self.regions.get(&coord.world, region_x, region_z)?;

        if document.exists() {
            let span = CHUNKS_PER_TILE as usize;
            let drawn: usize = (0..span * span)
                .into_par_iter()
                .map(|slot| self.draw_chunk(&document, &tile, slot % span, slot / span))
                .filter(|drawn| *drawn)
                .count();

            debug!(
                tile = %coord,
                chunks = drawn,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Tile rendered"
            );
        } else {
            debug!(tile = %coord, "No region file, tile left blank");
        }

        tile.mark_clean();
        self.tiles_rendered.fetch_add(1, Ordering::Relaxed);
        Ok(tile)
    }

    /// Re-renders one chunk of a resident tile in place.
    ///
    /// Returns `Ok(false)` when the chunk is not present in the region, in
    /// which case the tile is left untouched. On success the tile is dirty.
    pub fn render_chunk(&self, tile: &TileImage, chunk: ChunkPos) -> Result<bool, RenderError> {
        let coord = tile.coord();
        if chunk.region() != coord.region() {
            return Err(RenderError::ChunkOutsideTile {
                chunk,
                tile: coord.clone(),
            });
        }

        let (region_x, region_z) = coord.region();
        let document = self.regions.get(&coord.world, region_x, region_z)?;

        let mut pixels = self.pool.acquire();
        let Some(surface) = document.chunk_at(chunk)? else {
            return Ok(false);
        };
        let (local_x, local_z) = chunk.local();
        self.colors.fill(surface.samples(), &mut pixels);
        tile.patch_chunk(local_x, local_z, &pixels)?;

        self.chunks_rendered.fetch_add(1, Ordering::Relaxed);
        debug!(tile = %coord, chunk = %chunk, "Chunk patched into tile");
        Ok(true)
    }

    /// Draws one chunk of a full render. Returns whether anything was drawn.
    fn draw_chunk(
        &self,
        document: &RegionDocument,
        tile: &TileImage,
        local_x: usize,
        local_z: usize,
    ) -> bool {
        let mut pixels = self.pool.acquire();
        let surface = match document.chunk(local_x, local_z) {
            Ok(Some(surface)) => surface,
            Ok(None) => return false,
            Err(e) => {
                self.chunk_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    tile = %tile.coord(),
                    local_x,
                    local_z,
                    error = %e,
                    "Chunk read failed, left blank"
                );
                return false;
            }
        };

        self.colors.fill(surface.samples(), &mut pixels);
        match tile.patch_chunk(local_x, local_z, &pixels) {
            Ok(()) => {
                self.chunks_rendered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.chunk_failures.fetch_add(1, Ordering::Relaxed);
                warn!(tile = %tile.coord(), error = %e, "Chunk patch failed");
                false
            }
        }
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn stats(&self) -> RenderStats {
        RenderStats {
            tiles_rendered: self.tiles_rendered.load(Ordering::Relaxed),
            chunks_rendered: self.chunks_rendered.load(Ordering::Relaxed),
            chunk_failures: self.chunk_failures.load(Ordering::Relaxed),
            pool: self.pool.stats(),
        }
    }
}

impl fmt::Debug for TileRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileRenderer")
            .field("stats", &self.stats())
            .finish()
    }
}
