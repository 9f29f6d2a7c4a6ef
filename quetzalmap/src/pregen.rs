//! Background pre-rendering of an area of tiles.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::PipelineError;
use crate::pipeline::TilePipeline;
use crate::tile::TileCoord;

/// Counters of a pre-generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PregenStats {
    pub total: u64,
    pub generated: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Whether the run stopped early.
    pub cancelled: bool,
    pub duration: Duration,
}

impl PregenStats {
    /// Tiles processed so far, whatever the outcome.
    pub fn processed(&self) -> u64 {
        self.generated + self.skipped + self.failed
    }

    pub fn tiles_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.generated as f64 / secs
    }
}

impl fmt::Display for PregenStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={} generated={} skipped={} failed={} duration={}ms rate={:.1} tiles/s",
            self.total,
            self.generated,
            self.skipped,
            self.failed,
            self.duration.as_millis(),
            self.tiles_per_second()
        )
    }
}

/// Tile coordinates of a square area in spiral order.
///
/// Starts at the center, then walks each ring `r` along its right, top, left
/// and bottom edges. The result covers `(2 * radius + 1)²` tiles exactly once.
pub fn spiral_coords(
    world: &str,
    zoom: u8,
    center_x: i32,
    center_z: i32,
    radius: u32,
) -> Vec<TileCoord> {
    let side = 2 * radius as usize + 1;
    let mut coords = Vec::with_capacity(side * side);
    let tile = |x: i32, z: i32| TileCoord::new(world, zoom, center_x + x, center_z + z);

    coords.push(tile(0, 0));
    for r in 1..=radius as i32 {
        for z in (-r + 1)..=r {
            coords.push(tile(r, z));
        }
        for x in (-r..r).rev() {
            coords.push(tile(x, r));
        }
        for z in (-r..r).rev() {
            coords.push(tile(-r, z));
        }
        for x in (-r + 1)..=r {
            coords.push(tile(x, -r));
        }
    }
    coords
}

#[derive(Debug, Default)]
struct Progress {
    total: AtomicU64,
    generated: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl Progress {
    fn reset(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.generated.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
    }
}

/// Clears the running flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Renders every tile of an area ahead of client requests.
pub struct TilePreGenerator {
    pipeline: Arc<TilePipeline>,
    concurrency: usize,
    running: AtomicBool,
    progress: Progress,
}

impl TilePreGenerator {
    pub fn new(pipeline: Arc<TilePipeline>, concurrency: usize) -> Self {
        Self {
            pipeline,
            concurrency: concurrency.max(1),
            running: AtomicBool::new(false),
            progress: Progress::default(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Counters of the current or last run. Duration is not tracked mid-run.
    pub fn progress(&self) -> PregenStats {
        PregenStats {
            total: self.progress.total.load(Ordering::Relaxed),
            generated: self.progress.generated.load(Ordering::Relaxed),
            skipped: self.progress.skipped.load(Ordering::Relaxed),
            failed: self.progress.failed.load(Ordering::Relaxed),
            cancelled: false,
            duration: Duration::ZERO,
        }
    }

    /// Renders the `(2 * radius + 1)²` tiles around a center tile.
    ///
    /// Tiles already stored clean are skipped. Only one run may be active;
    /// a second call fails with [`PipelineError::PregenRunning`]. Cancelling
    /// stops new tiles from starting and returns the partial counts.
    #[instrument(skip(self, cancellation))]
    pub async fn pregenerate(
        &self,
        world: &str,
        center_x: i32,
        center_z: i32,
        radius: u32,
        zoom: u8,
        cancellation: &CancellationToken,
    ) -> Result<PregenStats, PipelineError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PipelineError::PregenRunning);
        }
        let _guard = RunGuard(&self.running);

        let started = Instant::now();
        let coords = spiral_coords(world, zoom, center_x, center_z, radius);
        self.progress.reset(coords.len() as u64);
        info!(tiles = coords.len(), "Pre-generation started");

        stream::iter(coords)
            .map(|coord| self.pregenerate_tile(coord, cancellation))
            .buffer_unordered(self.concurrency)
            .collect::<Vec<()>>()
            .await;

        let stats = PregenStats {
            cancelled: cancellation.is_cancelled(),
            duration: started.elapsed(),
            ..self.progress()
        };
        if stats.cancelled {
            info!(%stats, "Pre-generation cancelled");
        } else {
            info!(%stats, "Pre-generation complete");
        }
        Ok(stats)
    }

    async fn pregenerate_tile(&self, coord: TileCoord, cancellation: &CancellationToken) {
        if cancellation.is_cancelled() {
            return;
        }

        match self.pipeline.cached_tile(&coord).await {
            Ok(Some(tile)) if !tile.is_dirty() => {
                self.progress.skipped.fetch_add(1, Ordering::Relaxed);
                debug!(tile = %coord, "Tile already generated");
                return;
            }
            Ok(_) => {}
            Err(e) => warn!(tile = %coord, error = %e, "Tile lookup failed, rendering"),
        }

        match self.pipeline.render_tile(&coord).await {
            Ok(_) => {
                let generated = self.progress.generated.fetch_add(1, Ordering::Relaxed) + 1;
                if generated % 10 == 0 {
                    let total = self.progress.total.load(Ordering::Relaxed);
                    debug!(generated, total, "Pre-generation progress");
                }
            }
            Err(e) => {
                self.progress.failed.fetch_add(1, Ordering::Relaxed);
                warn!(tile = %coord, error = %e, "Pre-generation of tile failed");
            }
        }
    }
}

impl fmt::Debug for TilePreGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TilePreGenerator")
            .field("concurrency", &self.concurrency)
            .field("running", &self.is_running())
            .field("progress", &self.progress())
            .finish()
    }
}
