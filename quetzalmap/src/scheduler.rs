//! Debounced re-rendering of edited chunks.
//!
//! World edits arrive as chunk coordinates, often many per tick for the same
//! area. The scheduler collects them in a set and, once per debounce window,
//! turns the batch into dirty tiles across every configured zoom level,
//! re-renders each tile once and announces it to live subscribers.

use std::collections::HashSet;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::{MapConfig, MIN_INTERVAL};
use crate::live::SubscriberHub;
use crate::pipeline::TilePipeline;
use crate::tile::ChunkPos;

/// One edited chunk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkUpdate {
    pub world: String,
    pub chunk_x: i32,
    pub chunk_z: i32,
}

impl ChunkUpdate {
    pub fn new(world: impl Into<String>, chunk_x: i32, chunk_z: i32) -> Self {
        Self {
            world: world.into(),
            chunk_x,
            chunk_z,
        }
    }

    pub fn chunk(&self) -> ChunkPos {
        ChunkPos::new(self.chunk_x, self.chunk_z)
    }
}

/// Outcome of one processed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchReport {
    /// Distinct chunk edits drained from the queue.
    pub edits: usize,
    /// Dirty tiles submitted for rendering.
    pub tiles: usize,
    pub rendered: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn is_empty(&self) -> bool {
        self.edits == 0 && self.tiles == 0
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} edits -> {} tiles ({} rendered, {} failed) in {}ms",
            self.edits,
            self.tiles,
            self.rendered,
            self.failed,
            self.elapsed.as_millis()
        )
    }
}

/// Collects chunk edits and re-renders the affected tiles once per window.
pub struct UpdateScheduler {
    pending: Mutex<HashSet<ChunkUpdate>>,
    pipeline: Arc<TilePipeline>,
    hub: Arc<SubscriberHub>,
    zoom_levels: Vec<u8>,
    debounce: Duration,
    batches: AtomicU64,
}

impl UpdateScheduler {
    pub fn new(
        pipeline: Arc<TilePipeline>,
        hub: Arc<SubscriberHub>,
        zoom_levels: Vec<u8>,
        debounce: Duration,
    ) -> Self {
        Self {
            pending: Mutex::new(HashSet::new()),
            pipeline,
            hub,
            zoom_levels,
            debounce: debounce.max(MIN_INTERVAL),
            batches: AtomicU64::new(0),
        }
    }

    pub fn from_config(
        pipeline: Arc<TilePipeline>,
        hub: Arc<SubscriberHub>,
        config: &MapConfig,
    ) -> Self {
        Self::new(pipeline, hub, config.zoom_levels.clone(), config.debounce)
    }

    /// Queues an edit. Returns `false` if the same chunk is already queued.
    pub fn schedule_chunk_update(&self, world: &str, chunk_x: i32, chunk_z: i32) -> bool {
        self.pending
            .lock()
            .insert(ChunkUpdate::new(world, chunk_x, chunk_z))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn batches_processed(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Drains the queue and re-renders every affected tile.
    ///
    /// Renders within the batch run concurrently. Each successful render is
    /// announced with a `tile_update` event once it completes.
    #[instrument(skip_all)]
    pub async fn process_batch(&self) -> BatchReport {
        let started = Instant::now();
        let edits = mem::take(&mut *self.pending.lock());
        let dirty = self.pipeline.dirty();
        if edits.is_empty() && dirty.is_empty() {
            return BatchReport::default();
        }

        // Edited regions must be decoded again, not served from cache
        let regions = self.pipeline.renderer().regions();
        let mut invalidated = HashSet::new();
        for edit in &edits {
            let (region_x, region_z) = edit.chunk().region();
            if invalidated.insert((edit.world.as_str(), region_x, region_z)) {
                regions.invalidate(&edit.world, region_x, region_z);
            }
        }

        for edit in &edits {
            for &zoom in &self.zoom_levels {
                dirty.mark_chunk_dirty(&edit.world, edit.chunk_x, edit.chunk_z, zoom);
            }
        }

        let tiles = dirty.drain();
        debug!(edits = edits.len(), tiles = tiles.len(), "Processing update batch");

        let renders = tiles.iter().map(|coord| async move {
            let outcome = self.pipeline.render_tile(coord).await;
            if outcome.is_ok() {
                self.hub.broadcast_tile_update(coord);
            }
            outcome.is_ok()
        });
        let results = join_all(renders).await;

        let rendered = results.iter().filter(|ok| **ok).count();
        let report = BatchReport {
            edits: edits.len(),
            tiles: tiles.len(),
            rendered,
            failed: results.len() - rendered,
            elapsed: started.elapsed(),
        };
        self.batches.fetch_add(1, Ordering::Relaxed);

        if report.failed > 0 {
            warn!(%report, "Update batch finished with failures");
        } else {
            debug!(%report, "Update batch finished");
        }
        report
    }

    /// Processes a batch every debounce window until cancelled, then runs one
    /// final batch so queued edits are not lost.
    pub async fn run(self: Arc<Self>, cancellation: CancellationToken) {
        info!(
            debounce_ms = self.debounce.as_millis() as u64,
            zoom_levels = ?self.zoom_levels,
            "Update scheduler started"
        );

        let mut ticker = tokio::time::interval(self.debounce);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => break,

                _ = ticker.tick() => {
                    self.process_batch().await;
                }
            }
        }

        let remaining = self.pending_count();
        if remaining > 0 {
            info!(remaining, "Processing remaining updates before shutdown");
        }
        self.process_batch().await;
        info!("Update scheduler stopped");
    }

    /// Spawns [`run`](Self::run) onto the runtime.
    pub fn spawn(self: &Arc<Self>, cancellation: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(cancellation))
    }
}

impl fmt::Debug for UpdateScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateScheduler")
            .field("pending", &self.pending_count())
            .field("zoom_levels", &self.zoom_levels)
            .field("debounce", &self.debounce)
            .finish()
    }
}
