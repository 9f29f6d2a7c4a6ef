//! Three-tier tile cache.
//!
//! - **Hot**: small, short idle expiry, holds what viewers are looking at now.
//! - **Warm**: larger, longer idle expiry. Evicted dirty tiles are written to
//!   the store so their pixels survive.
//! - **Cold**: the [`TileStorage`] backend, unbounded.
//!
//! Both memory tiers are `moka` caches of `Arc<TileImage>`, so a tile promoted
//! from warm to hot is the same object in both tiers and a patch through one
//! is visible through the other.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::notification::RemovalCause;
use moka::sync::Cache;
use tracing::{debug, error, warn};

use super::coord::TileCoord;
use super::image::TileImage;
use super::store::{TileStorage, TileStoreError};

/// Sizing and expiry of the memory tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileCacheConfig {
    pub hot_capacity: u64,
    pub hot_idle: Duration,
    pub warm_capacity: u64,
    pub warm_idle: Duration,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            hot_capacity: 500,
            hot_idle: Duration::from_secs(5 * 60),
            warm_capacity: 2000,
            warm_idle: Duration::from_secs(30 * 60),
        }
    }
}

impl TileCacheConfig {
    pub fn with_hot(mut self, capacity: u64, idle: Duration) -> Self {
        self.hot_capacity = capacity;
        self.hot_idle = idle;
        self
    }

    pub fn with_warm(mut self, capacity: u64, idle: Duration) -> Self {
        self.warm_capacity = capacity;
        self.warm_idle = idle;
        self
    }
}

#[derive(Debug, Default)]
struct Counters {
    hot_hits: AtomicU64,
    warm_hits: AtomicU64,
    cold_hits: AtomicU64,
    misses: AtomicU64,
    eviction_saves: AtomicU64,
    eviction_save_failures: AtomicU64,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TileCacheStats {
    pub hot_size: u64,
    pub warm_size: u64,
    pub hot_hits: u64,
    pub warm_hits: u64,
    pub cold_hits: u64,
    pub misses: u64,
    pub eviction_saves: u64,
    pub eviction_save_failures: u64,
}

impl TileCacheStats {
    pub fn total_hits(&self) -> u64 {
        self.hot_hits + self.warm_hits + self.cold_hits
    }

    pub fn total_requests(&self) -> u64 {
        self.total_hits() + self.misses
    }

    /// Fraction of lookups served from any tier, `0.0` with no lookups.
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.total_hits() as f64 / total as f64
        }
    }
}

impl fmt::Display for TileCacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hot={} warm={} hits={}/{} ({:.2}%)",
            self.hot_size,
            self.warm_size,
            self.total_hits(),
            self.total_requests(),
            self.hit_rate() * 100.0
        )
    }
}

/// Hot/warm/cold tile lookup.
pub struct TileCache {
    hot: Cache<TileCoord, Arc<TileImage>>,
    warm: Cache<TileCoord, Arc<TileImage>>,
    store: Arc<dyn TileStorage>,
    counters: Arc<Counters>,
}

impl TileCache {
    pub fn new(store: Arc<dyn TileStorage>, config: TileCacheConfig) -> Self {
        let counters = Arc::new(Counters::default());

        let hot = Cache::builder()
            .max_capacity(config.hot_capacity)
            .time_to_idle(config.hot_idle)
            .build();

        let listener_store = Arc::clone(&store);
        let listener_counters = Arc::clone(&counters);
        let warm = Cache::builder()
            .max_capacity(config.warm_capacity)
            .time_to_idle(config.warm_idle)
            .eviction_listener(
                move |coord: Arc<TileCoord>, tile: Arc<TileImage>, cause: RemovalCause| {
                    if !cause.was_evicted() || !tile.is_dirty() {
                        return;
                    }
                    match listener_store.save(&tile) {
                        Ok(()) => {
                            listener_counters.eviction_saves.fetch_add(1, Ordering::Relaxed);
                            debug!(tile = %coord, ?cause, "Persisted dirty tile on eviction");
                        }
                        Err(e) => {
                            listener_counters
                                .eviction_save_failures
                                .fetch_add(1, Ordering::Relaxed);
                            error!(
                                tile = %coord,
                                error = %e,
                                "Dirty tile evicted but could not be saved, changes lost"
                            );
                        }
                    }
                },
            )
            .build();

        Self {
            hot,
            warm,
            store,
            counters,
        }
    }

    /// Looks in the memory tiers only. A warm hit is promoted into hot.
    pub fn get_memory(&self, coord: &TileCoord) -> Option<Arc<TileImage>> {
        if let Some(tile) = self.hot.get(coord) {
            self.counters.hot_hits.fetch_add(1, Ordering::Relaxed);
            return Some(tile);
        }

        if let Some(tile) = self.warm.get(coord) {
            self.counters.warm_hits.fetch_add(1, Ordering::Relaxed);
            // Left in warm as well; it ages out on its own
            self.hot.insert(coord.clone(), Arc::clone(&tile));
            return Some(tile);
        }

        None
    }

    /// Loads from the store into warm. Counts a miss when nothing is stored.
    ///
    /// This does blocking I/O.
    pub fn get_cold(&self, coord: &TileCoord) -> Option<Arc<TileImage>> {
        match self.store.load(coord) {
            Ok(Some(tile)) => {
                self.counters.cold_hits.fetch_add(1, Ordering::Relaxed);
                let tile = Arc::new(tile);
                self.warm.insert(coord.clone(), Arc::clone(&tile));
                Some(tile)
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                // Unreadable tile is treated as a miss so it gets re-rendered
                warn!(tile = %coord, error = %e, "Failed to load stored tile");
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Full hot → warm → cold lookup. `None` means the caller must render.
    pub fn get(&self, coord: &TileCoord) -> Option<Arc<TileImage>> {
        self.get_memory(coord).or_else(|| self.get_cold(coord))
    }

    /// Inserts a freshly rendered tile into hot.
    pub fn put(&self, tile: Arc<TileImage>) {
        self.hot.insert(tile.coord().clone(), tile);
    }

    /// Inserts a tile into warm, for background renders.
    pub fn put_warm(&self, tile: Arc<TileImage>) {
        self.warm.insert(tile.coord().clone(), tile);
    }

    /// Removes a tile from both memory tiers and deletes it from the store.
    pub fn invalidate(&self, coord: &TileCoord) -> Result<bool, TileStoreError> {
        self.hot.invalidate(coord);
        self.warm.invalidate(coord);
        self.store.delete(coord)
    }

    /// Membership checks that do not touch hit counters or expiry.
    pub fn is_in_hot(&self, coord: &TileCoord) -> bool {
        self.hot.contains_key(coord)
    }

    pub fn is_in_warm(&self, coord: &TileCoord) -> bool {
        self.warm.contains_key(coord)
    }

    /// Saves every dirty tile held in memory. Returns how many were written.
    pub fn flush_dirty(&self) -> usize {
        let mut saved = 0;
        for (coord, tile) in self.hot.iter().chain(self.warm.iter()) {
            if !tile.is_dirty() {
                continue;
            }
            match self.store.save(&tile) {
                Ok(()) => saved += 1,
                Err(e) => error!(tile = %coord, error = %e, "Failed to flush dirty tile"),
            }
        }
        saved
    }

    /// Drops both memory tiers and resets counters. Stored tiles are kept.
    ///
    /// Explicit removal does not trigger eviction persistence; call
    /// [`flush_dirty`](Self::flush_dirty) first to keep unsaved edits.
    pub fn clear_memory(&self) {
        self.hot.invalidate_all();
        self.warm.invalidate_all();
        self.hot.run_pending_tasks();
        self.warm.run_pending_tasks();
        for counter in [
            &self.counters.hot_hits,
            &self.counters.warm_hits,
            &self.counters.cold_hits,
            &self.counters.misses,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Runs pending expiry and eviction work on both tiers.
    pub fn run_pending_tasks(&self) {
        self.hot.run_pending_tasks();
        self.warm.run_pending_tasks();
    }

    /// Estimated pixel memory held by both tiers in bytes.
    pub fn memory_usage(&self) -> u64 {
        let per_tile = super::coord::TILE_PIXELS as u64 * 4;
        (self.hot.entry_count() + self.warm.entry_count()) * per_tile
    }

    pub fn stats(&self) -> TileCacheStats {
        TileCacheStats {
            hot_size: self.hot.entry_count(),
            warm_size: self.warm.entry_count(),
            hot_hits: self.counters.hot_hits.load(Ordering::Relaxed),
            warm_hits: self.counters.warm_hits.load(Ordering::Relaxed),
            cold_hits: self.counters.cold_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            eviction_saves: self.counters.eviction_saves.load(Ordering::Relaxed),
            eviction_save_failures: self.counters.eviction_save_failures.load(Ordering::Relaxed),
        }
    }

    pub fn store(&self) -> &Arc<dyn TileStorage> {
        &self.store
    }
}

impl fmt::Debug for TileCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileCache")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::tile::coord::TILE_PIXELS;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::io;
    use std::thread;
    use std::time::SystemTime;

    /// In-memory store that counts saves.
    #[derive(Default)]
    pub(crate) struct CountingStore {
        pub tiles: Mutex<HashMap<TileCoord, Vec<u32>>>,
        pub saves: AtomicU64,
        pub fail_saves: std::sync::atomic::AtomicBool,
    }

    impl CountingStore {
        pub fn save_count(&self) -> u64 {
            self.saves.load(Ordering::SeqCst)
        }
    }

    impl TileStorage for CountingStore {
        fn save(&self, tile: &TileImage) -> Result<(), TileStoreError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(TileStoreError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "disk full",
                )));
            }
            self.tiles
                .lock()
                .insert(tile.coord().clone(), tile.snapshot());
            tile.mark_clean();
            Ok(())
        }

        fn load(&self, coord: &TileCoord) -> Result<Option<TileImage>, TileStoreError> {
            Ok(self
                .tiles
                .lock()
                .get(coord)
                .map(|pixels| TileImage::from_pixels(coord.clone(), pixels.clone()))
                .transpose()
                .ok()
                .flatten())
        }

        fn delete(&self, coord: &TileCoord) -> Result<bool, TileStoreError> {
            Ok(self.tiles.lock().remove(coord).is_some())
        }

        fn exists(&self, coord: &TileCoord) -> bool {
            self.tiles.lock().contains_key(coord)
        }

        fn last_modified(&self, _coord: &TileCoord) -> Option<SystemTime> {
            None
        }

        fn size(&self, coord: &TileCoord) -> Option<u64> {
            self.exists(coord).then_some(TILE_PIXELS as u64 * 4)
        }

        fn read_bytes(&self, _coord: &TileCoord) -> Result<Option<Vec<u8>>, TileStoreError> {
            Ok(None)
        }
    }

    fn coord(x: i32) -> TileCoord {
        TileCoord::new("world", 0, x, 0)
    }

    fn cache_with(store: Arc<CountingStore>, config: TileCacheConfig) -> TileCache {
        TileCache::new(store, config)
    }

    fn short_warm() -> TileCacheConfig {
        TileCacheConfig::default().with_warm(100, Duration::from_millis(50))
    }

    #[test]
    fn test_miss_everywhere() {
        let store = Arc::new(CountingStore::default());
        let cache = cache_with(store, TileCacheConfig::default());

        assert!(cache.get(&coord(0)).is_none());
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_put_then_hot_hit() {
        let store = Arc::new(CountingStore::default());
        let cache = cache_with(store, TileCacheConfig::default());

        cache.put(Arc::new(TileImage::new(coord(1))));
        assert!(cache.get(&coord(1)).is_some());
        assert_eq!(cache.stats().hot_hits, 1);
    }

    #[test]
    fn test_warm_hit_promotes_to_hot_without_leaving_warm() {
        let store = Arc::new(CountingStore::default());
        let cache = cache_with(store, TileCacheConfig::default());
        let tile = Arc::new(TileImage::new(coord(2)));

        cache.put_warm(Arc::clone(&tile));
        assert!(!cache.is_in_hot(&coord(2)));

        let first = cache.get(&coord(2)).unwrap();
        assert!(Arc::ptr_eq(&first, &tile));
        assert!(cache.is_in_hot(&coord(2)));
        assert!(cache.is_in_warm(&coord(2)));

        cache.get(&coord(2)).unwrap();
        let stats = cache.stats();
        assert_eq!(stats.warm_hits, 1);
        assert_eq!(stats.hot_hits, 1);
    }

    #[test]
    fn test_cold_hit_lands_in_warm() {
        let store = Arc::new(CountingStore::default());
        store.tiles.lock().insert(coord(3), vec![5; TILE_PIXELS]);
        let cache = cache_with(Arc::clone(&store), TileCacheConfig::default());

        let tile = cache.get(&coord(3)).unwrap();
        assert!(!tile.is_dirty());
        assert_eq!(tile.pixel(0, 0), Some(5));
        assert!(cache.is_in_warm(&coord(3)));
        assert!(!cache.is_in_hot(&coord(3)));
        assert_eq!(cache.stats().cold_hits, 1);
    }

    #[test]
    fn test_dirty_warm_eviction_saves_once() {
        let store = Arc::new(CountingStore::default());
        let cache = cache_with(Arc::clone(&store), short_warm());

        let tile = Arc::new(TileImage::new(coord(4)));
        assert!(tile.is_dirty());
        cache.put_warm(tile);

        thread::sleep(Duration::from_millis(150));
        cache.run_pending_tasks();

        assert_eq!(store.save_count(), 1);
        assert_eq!(cache.stats().eviction_saves, 1);
        assert!(store.exists(&coord(4)));
    }

    #[test]
    fn test_clean_warm_eviction_saves_nothing() {
        let store = Arc::new(CountingStore::default());
        let cache = cache_with(Arc::clone(&store), short_warm());

        let tile = TileImage::from_pixels(coord(5), vec![0; TILE_PIXELS]).unwrap();
        cache.put_warm(Arc::new(tile));

        thread::sleep(Duration::from_millis(150));
        cache.run_pending_tasks();

        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn test_failed_eviction_save_is_counted() {
        let store = Arc::new(CountingStore::default());
        store.fail_saves.store(true, Ordering::SeqCst);
        let cache = cache_with(Arc::clone(&store), short_warm());

        cache.put_warm(Arc::new(TileImage::new(coord(6))));
        thread::sleep(Duration::from_millis(150));
        cache.run_pending_tasks();

        let stats = cache.stats();
        assert_eq!(stats.eviction_saves, 0);
        assert_eq!(stats.eviction_save_failures, 1);
        assert!(!cache.is_in_warm(&coord(6)));
    }

    #[test]
    fn test_explicit_invalidate_does_not_save() {
        let store = Arc::new(CountingStore::default());
        store.tiles.lock().insert(coord(7), vec![1; TILE_PIXELS]);
        let cache = cache_with(Arc::clone(&store), TileCacheConfig::default());

        cache.put(Arc::new(TileImage::new(coord(7))));
        cache.put_warm(Arc::new(TileImage::new(coord(7))));

        assert!(cache.invalidate(&coord(7)).unwrap());
        cache.run_pending_tasks();

        assert!(!cache.is_in_hot(&coord(7)));
        assert!(!cache.is_in_warm(&coord(7)));
        assert!(!store.exists(&coord(7)));
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn test_flush_dirty_saves_only_dirty_tiles() {
        let store = Arc::new(CountingStore::default());
        let cache = cache_with(Arc::clone(&store), TileCacheConfig::default());

        cache.put(Arc::new(TileImage::new(coord(8))));
        cache.put_warm(Arc::new(
            TileImage::from_pixels(coord(9), vec![0; TILE_PIXELS]).unwrap(),
        ));

        assert_eq!(cache.flush_dirty(), 1);
        assert_eq!(store.save_count(), 1);
        assert_eq!(cache.flush_dirty(), 0);
    }

    #[test]
    fn test_clear_memory_resets_counters() {
        let store = Arc::new(CountingStore::default());
        let cache = cache_with(store, TileCacheConfig::default());

        cache.put(Arc::new(TileImage::new(coord(10))));
        cache.get(&coord(10));
        cache.clear_memory();

        assert_eq!(cache.stats().hot_hits, 0);
        assert!(cache.get_memory(&coord(10)).is_none());
    }

    #[test]
    fn test_stats_display() {
        let stats = TileCacheStats {
            hot_hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert_eq!(stats.to_string(), "hot=0 warm=0 hits=3/4 (75.00%)");
    }
}
