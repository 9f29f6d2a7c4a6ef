//! Cache of opened region documents.
//!
//! Decoded regions are derived data, so eviction is silent: an evicted region
//! is simply reopened and re-decoded on its next use.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::notification::RemovalCause;
use moka::sync::Cache;
use tracing::{debug, trace};

use super::chunk::ChunkSurface;
use super::document::RegionDocument;
use super::paths::WorldPaths;
use super::region::{RegionDecoder, RegionError};
use crate::tile::ChunkPos;

/// Region cache bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionCacheConfig {
    pub max_regions: u64,
    pub idle_expiry: Duration,
}

impl Default for RegionCacheConfig {
    fn default() -> Self {
        Self {
            max_regions: 50,
            idle_expiry: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RegionKey {
    world: String,
    region_x: i32,
    region_z: i32,
}

/// Point-in-time region cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RegionCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: u64,
}

impl RegionCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Display for RegionCacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} hit_rate={:.2}% size={}",
            self.hits,
            self.misses,
            self.hit_rate() * 100.0,
            self.size
        )
    }
}

/// Bounded, idle-expiring cache of [`RegionDocument`]s keyed by world and
/// region coordinate.
pub struct RegionCache {
    cache: Cache<RegionKey, Arc<RegionDocument>>,
    paths: WorldPaths,
    decoder: Arc<RegionDecoder>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RegionCache {
    pub fn new(paths: WorldPaths, decoder: Arc<RegionDecoder>, config: RegionCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_regions)
            .time_to_idle(config.idle_expiry)
            .eviction_listener(
                |key: Arc<RegionKey>, _doc: Arc<RegionDocument>, cause: RemovalCause| {
                    trace!(
                        world = %key.world,
                        region_x = key.region_x,
                        region_z = key.region_z,
                        ?cause,
                        "Region left cache"
                    );
                },
            )
            .build();

        Self {
            cache,
            paths,
            decoder,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn paths(&self) -> &WorldPaths {
        &self.paths
    }

    pub fn decoder(&self) -> &Arc<RegionDecoder> {
        &self.decoder
    }

    /// Returns the cached document for a region, opening it on a miss.
    ///
    /// Opening only reads the location table; chunks decode on demand. A
    /// failed open is not cached.
    pub fn get(
        &self,
        world: &str,
        region_x: i32,
        region_z: i32,
    ) -> Result<Arc<RegionDocument>, RegionError> {
        let key = RegionKey {
            world: world.to_string(),
            region_x,
            region_z,
        };

        if let Some(doc) = self.cache.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(doc);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let path = self.paths.region_file(world, region_x, region_z);
        let doc = Arc::new(RegionDocument::open(
            world,
            region_x,
            region_z,
            path,
            Arc::clone(&self.decoder),
        )?);

        // A concurrent open of the same region may win; use whichever landed
        let entry = self.cache.entry(key).or_insert_with(|| Arc::clone(&doc));
        Ok(entry.into_value())
    }

    /// Surface of a chunk by global chunk position.
    pub fn chunk(
        &self,
        world: &str,
        chunk: ChunkPos,
    ) -> Result<Option<Arc<ChunkSurface>>, RegionError> {
        let (region_x, region_z) = chunk.region();
        let (local_x, local_z) = chunk.local();
        self.get(world, region_x, region_z)?.chunk(local_x, local_z)
    }

    /// Drops one region so its next use re-reads the file.
    pub fn invalidate(&self, world: &str, region_x: i32, region_z: i32) {
        self.cache.invalidate(&RegionKey {
            world: world.to_string(),
            region_x,
            region_z,
        });
        debug!(world, region_x, region_z, "Region invalidated");
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
        debug!("All regions invalidated");
    }

    pub fn contains(&self, world: &str, region_x: i32, region_z: i32) -> bool {
        self.cache.contains_key(&RegionKey {
            world: world.to_string(),
            region_x,
            region_z,
        })
    }

    pub fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks();
    }

    pub fn stats(&self) -> RegionCacheStats {
        RegionCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.cache.entry_count(),
        }
    }
}

impl fmt::Debug for RegionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionCache")
            .field("worlds_root", &self.paths.worlds_root())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::block::BlockRegistry;
    use crate::world::chunk::DecodeOptions;
    use crate::world::region::fixture::uniform_region;
    use std::fs;
    use tempfile::TempDir;

    fn cache(dir: &TempDir, config: RegionCacheConfig) -> RegionCache {
        let decoder = Arc::new(RegionDecoder::new(
            Arc::new(BlockRegistry::new()),
            DecodeOptions::default(),
        ));
        RegionCache::new(WorldPaths::new(dir.path()), decoder, config)
    }

    fn write_region(dir: &TempDir, world: &str, x: i32, z: i32, bytes: Vec<u8>) {
        let paths = WorldPaths::new(dir.path());
        fs::create_dir_all(paths.region_dir(world)).unwrap();
        fs::write(paths.region_file(world, x, z), bytes).unwrap();
    }

    #[test]
    fn test_hit_after_miss() {
        let dir = TempDir::new().unwrap();
        write_region(&dir, "world", 0, 0, uniform_region(&[(0, 0, "minecraft:stone", 0)]));
        let cache = cache(&dir, RegionCacheConfig::default());

        let a = cache.get("world", 0, 0).unwrap();
        let b = cache.get("world", 0, 0).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_worlds_are_separate_keys() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir, RegionCacheConfig::default());

        let a = cache.get("world", 0, 0).unwrap();
        let b = cache.get("world_nether", 0, 0).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!a.exists());
    }

    #[test]
    fn test_chunk_by_global_position() {
        let dir = TempDir::new().unwrap();
        write_region(&dir, "world", -1, 0, uniform_region(&[(31, 2, "minecraft:sand", 1)]));
        let cache = cache(&dir, RegionCacheConfig::default());

        let surface = cache.chunk("world", ChunkPos::new(-1, 2)).unwrap().unwrap();
        assert_eq!(surface.sample(8, 8).unwrap().elevation, 31);
        assert!(cache.chunk("world", ChunkPos::new(-2, 2)).unwrap().is_none());
    }

    #[test]
    fn test_invalidate_rereads_file() {
        let dir = TempDir::new().unwrap();
        write_region(&dir, "world", 0, 0, uniform_region(&[(0, 0, "minecraft:stone", 0)]));
        let cache = cache(&dir, RegionCacheConfig::default());

        let before = cache.chunk("world", ChunkPos::new(0, 0)).unwrap().unwrap();
        assert_eq!(before.sample(0, 0).unwrap().elevation, 15);

        write_region(&dir, "world", 0, 0, uniform_region(&[(0, 0, "minecraft:stone", 2)]));
        // Still the cached decode
        let stale = cache.chunk("world", ChunkPos::new(0, 0)).unwrap().unwrap();
        assert_eq!(stale.sample(0, 0).unwrap().elevation, 15);

        cache.invalidate("world", 0, 0);
        let fresh = cache.chunk("world", ChunkPos::new(0, 0)).unwrap().unwrap();
        assert_eq!(fresh.sample(0, 0).unwrap().elevation, 47);
    }

    #[test]
    fn test_idle_expiry() {
        let dir = TempDir::new().unwrap();
        let cache = cache(
            &dir,
            RegionCacheConfig {
                max_regions: 10,
                idle_expiry: Duration::from_millis(50),
            },
        );

        cache.get("world", 3, 3).unwrap();
        assert!(cache.contains("world", 3, 3));

        std::thread::sleep(Duration::from_millis(120));
        cache.run_pending_tasks();
        assert!(!cache.contains("world", 3, 3));
    }

    #[test]
    fn test_invalidate_all() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir, RegionCacheConfig::default());
        cache.get("world", 0, 0).unwrap();
        cache.get("world", 1, 0).unwrap();

        cache.invalidate_all();
        cache.get("world", 0, 0).unwrap();
        cache.get("world", 1, 0).unwrap();
        assert_eq!(cache.stats().misses, 4);
    }
}
