//! Tile fetch and render orchestration.
//!
//! [`TilePipeline`] sits in front of the tile cache and the renderer:
//!
//! ```text
//! get_tile ──► hot/warm ──► cold (blocking pool) ──► render_tile
//!                                                       │
//!                              coalesce per coordinate ─┤
//!                              render permit ───────────┤
//!                              render_full (blocking) ──┴──► hot + store
//! ```
//!
//! At most `render_threads` renders run at once. Concurrent requests for the
//! same coordinate share a single render and all receive its result.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, instrument, warn};

use crate::config::MapConfig;
use crate::error::PipelineError;
use crate::render::{ColorMapper, PixelBufferPool, TileRenderer};
use crate::tile::{
    ChunkPos, DirtyTracker, DiskTileStore, TileCache, TileCoord, TileImage, TileStorage,
    TileStoreError,
};
use crate::world::{BlockRegistry, RegionCache, RegionDecoder, WorldPaths};

type RenderOutcome = Result<Arc<TileImage>, PipelineError>;

/// Point-in-time pipeline counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineStats {
    pub renders_completed: u64,
    pub renders_failed: u64,
    /// Requests that joined a render already in flight.
    pub renders_coalesced: u64,
    pub in_flight: usize,
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "renders completed={} failed={} coalesced={} in_flight={}",
            self.renders_completed, self.renders_failed, self.renders_coalesced, self.in_flight
        )
    }
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    coalesced: AtomicU64,
}

enum Registration<'a> {
    /// This request owns the render and must complete the guard.
    Leader(LeaderGuard<'a>),
    /// Another request is rendering; wait for its outcome.
    Follower(broadcast::Receiver<RenderOutcome>),
}

/// Owns an in-flight slot. Dropping it without completing closes the channel,
/// which wakes followers with [`PipelineError::Abandoned`].
struct LeaderGuard<'a> {
    in_flight: &'a DashMap<TileCoord, broadcast::Sender<RenderOutcome>>,
    coord: TileCoord,
    done: bool,
}

impl LeaderGuard<'_> {
    fn complete(mut self, outcome: RenderOutcome) {
        self.done = true;
        // Removed before sending so a late request starts a fresh render
        // instead of subscribing to a channel that already fired.
        if let Some((_, sender)) = self.in_flight.remove(&self.coord) {
            let _ = sender.send(outcome);
        }
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.in_flight.remove(&self.coord);
        }
    }
}

/// Fetches tiles from the cache tiers and renders the ones that are missing.
pub struct TilePipeline {
    cache: Arc<TileCache>,
    renderer: Arc<TileRenderer>,
    dirty: Arc<DirtyTracker>,
    permits: Arc<Semaphore>,
    in_flight: DashMap<TileCoord, broadcast::Sender<RenderOutcome>>,
    counters: Counters,
}

impl TilePipeline {
    pub fn new(
        cache: Arc<TileCache>,
        renderer: Arc<TileRenderer>,
        dirty: Arc<DirtyTracker>,
        render_threads: usize,
    ) -> Self {
        Self {
            cache,
            renderer,
            dirty,
            permits: Arc::new(Semaphore::new(render_threads.max(1))),
            in_flight: DashMap::new(),
            counters: Counters::default(),
        }
    }

    /// Wires up the full stack from configuration: disk store, tile cache,
    /// region cache, decoder and renderer.
    pub fn from_config(config: &MapConfig) -> Result<Self, TileStoreError> {
        let store: Arc<dyn TileStorage> = Arc::new(DiskTileStore::new(&config.tiles_root)?);
        let cache = Arc::new(TileCache::new(store, config.tile_cache.clone()));

        let registry = Arc::new(BlockRegistry::new());
        let decoder = Arc::new(RegionDecoder::new(Arc::clone(&registry), config.decode));
        let regions = Arc::new(RegionCache::new(
            WorldPaths::new(&config.worlds_root),
            decoder,
            config.region_cache.clone(),
        ));
        let renderer = Arc::new(TileRenderer::new(
            regions,
            ColorMapper::new(registry),
            PixelBufferPool::new(config.pool_size()),
        ));

        info!(
            tiles_root = %config.tiles_root.display(),
            worlds_root = %config.worlds_root.display(),
            render_threads = config.render_threads,
            "Tile pipeline ready"
        );

        Ok(Self::new(
            cache,
            renderer,
            Arc::new(DirtyTracker::new()),
            config.render_threads,
        ))
    }

    pub fn cache(&self) -> &Arc<TileCache> {
        &self.cache
    }

    pub fn renderer(&self) -> &Arc<TileRenderer> {
        &self.renderer
    }

    pub fn dirty(&self) -> &Arc<DirtyTracker> {
        &self.dirty
    }

    /// Returns a tile, rendering it if no tier holds it.
    pub async fn get_tile(&self, coord: &TileCoord) -> RenderOutcome {
        match self.cached_tile(coord).await? {
            Some(tile) => Ok(tile),
            None => self.render_tile(coord).await,
        }
    }

    /// Looks a tile up in every tier without rendering it.
    pub async fn cached_tile(
        &self,
        coord: &TileCoord,
    ) -> Result<Option<Arc<TileImage>>, PipelineError> {
        if let Some(tile) = self.cache.get_memory(coord) {
            return Ok(Some(tile));
        }

        let cache = Arc::clone(&self.cache);
        let key = coord.clone();
        tokio::task::spawn_blocking(move || cache.get_cold(&key))
            .await
            .map_err(|e| PipelineError::task(coord, &e))
    }

    /// Renders a tile from its region file, puts it into hot and saves it.
    ///
    /// Joins an in-flight render of the same coordinate if there is one. A
    /// failed save is logged and the rendered tile is still returned.
    #[instrument(skip_all, fields(tile = %coord))]
    pub async fn render_tile(&self, coord: &TileCoord) -> RenderOutcome {
        match self.register(coord) {
            Registration::Follower(mut rx) => {
                self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!("Render coalesced onto in-flight request");
                rx.recv()
                    .await
                    .unwrap_or_else(|_| Err(PipelineError::Abandoned(coord.clone())))
            }
            Registration::Leader(guard) => {
                let outcome = self.render_exclusive(coord).await;
                guard.complete(outcome.clone());
                outcome
            }
        }
    }

    fn register(&self, coord: &TileCoord) -> Registration<'_> {
        match self.in_flight.entry(coord.clone()) {
            Entry::Occupied(entry) => Registration::Follower(entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (sender, _) = broadcast::channel(1);
                entry.insert(sender);
                Registration::Leader(LeaderGuard {
                    in_flight: &self.in_flight,
                    coord: coord.clone(),
                    done: false,
                })
            }
        }
    }

    async fn render_exclusive(&self, coord: &TileCoord) -> RenderOutcome {
        let outcome = self.render_with_permit(coord).await;
        match &outcome {
            Ok(_) => {
                self.dirty.mark_clean(coord);
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "Tile render failed");
            }
        }
        outcome
    }

    async fn render_with_permit(&self, coord: &TileCoord) -> RenderOutcome {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::Closed)?;

        let cache = Arc::clone(&self.cache);
        let renderer = Arc::clone(&self.renderer);
        let key = coord.clone();
        tokio::task::spawn_blocking(move || -> RenderOutcome {
            let _permit = permit;
            let tile = Arc::new(
                renderer
                    .render_full(&key)
                    .map_err(|e| PipelineError::render(&key, &e))?,
            );
            if let Err(e) = cache.store().save(&tile) {
                warn!(tile = %key, error = %e, "Rendered tile could not be saved");
            }
            // A stale copy left in warm must not be saved over this one on eviction
            if cache.is_in_warm(&key) {
                cache.put_warm(Arc::clone(&tile));
            }
            cache.put(Arc::clone(&tile));
            Ok(tile)
        })
        .await
        .unwrap_or_else(|e| Err(PipelineError::task(coord, &e)))
    }

    /// Returns the encoded PNG for a tile, rendering it first if needed.
    ///
    /// A tile with unsaved edits is saved before its bytes are read.
    pub async fn fetch_png(&self, coord: &TileCoord) -> Result<Bytes, PipelineError> {
        let tile = self.get_tile(coord).await?;

        let cache = Arc::clone(&self.cache);
        let key = coord.clone();
        tokio::task::spawn_blocking(move || -> Result<Bytes, PipelineError> {
            let store = cache.store();
            if tile.is_dirty() || !store.exists(&key) {
                store
                    .save(&tile)
                    .map_err(|e| PipelineError::store(&key, &e))?;
            }
            match store.read_bytes(&key) {
                Ok(Some(bytes)) => Ok(Bytes::from(bytes)),
                Ok(None) => Err(PipelineError::Store {
                    tile: key.clone(),
                    message: "tile missing from store after save".to_string(),
                }),
                Err(e) => Err(PipelineError::store(&key, &e)),
            }
        })
        .await
        .map_err(|e| PipelineError::task(coord, &e))?
    }

    /// Re-renders one edited chunk into its tile if the tile is in memory.
    ///
    /// Returns `Ok(true)` when pixels were patched. The patched tile is dirty
    /// and is placed in warm so it is saved when evicted.
    pub async fn apply_chunk_edit(
        &self,
        world: &str,
        chunk_x: i32,
        chunk_z: i32,
        zoom: u8,
    ) -> Result<bool, PipelineError> {
        let chunk = ChunkPos::new(chunk_x, chunk_z);
        let coord = TileCoord::for_chunk(world, zoom, chunk);
        let Some(tile) = self.cache.get_memory(&coord) else {
            return Ok(false);
        };

        let renderer = Arc::clone(&self.renderer);
        let cache = Arc::clone(&self.cache);
        let key = coord.clone();
        tokio::task::spawn_blocking(move || -> Result<bool, PipelineError> {
            let patched = renderer
                .render_chunk(&tile, chunk)
                .map_err(|e| PipelineError::render(&key, &e))?;
            if patched {
                cache.put_warm(tile);
            }
            Ok(patched)
        })
        .await
        .map_err(|e| PipelineError::task(&coord, &e))?
    }

    /// Removes a tile from every tier, including disk.
    pub async fn invalidate(&self, coord: &TileCoord) -> Result<bool, PipelineError> {
        self.dirty.mark_clean(coord);
        let cache = Arc::clone(&self.cache);
        let key = coord.clone();
        tokio::task::spawn_blocking(move || cache.invalidate(&key))
            .await
            .map_err(|e| PipelineError::task(coord, &e))?
            .map_err(|e| PipelineError::store(coord, &e))
    }

    /// Saves every dirty tile held in memory.
    pub async fn flush(&self) -> usize {
        let cache = Arc::clone(&self.cache);
        match tokio::task::spawn_blocking(move || cache.flush_dirty()).await {
            Ok(saved) => saved,
            Err(e) => {
                error!(error = %e, "Flush task failed");
                0
            }
        }
    }

    /// Stops accepting renders. Renders already holding a permit finish.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            renders_completed: self.counters.completed.load(Ordering::Relaxed),
            renders_failed: self.counters.failed.load(Ordering::Relaxed),
            renders_coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            in_flight: self.in_flight.len(),
        }
    }
}

impl fmt::Debug for TilePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TilePipeline")
            .field("stats", &self.stats())
            .finish()
    }
}
